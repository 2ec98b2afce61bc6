//! Region reductions over rasters at a requested scale.
//!
//! The substrate's zonal statistics are modelled by [`RegionReducer`]. [`GridReducer`]
//! is the in-process implementation: it aggregates native pixels into square blocks of
//! the requested scale, keeps the blocks whose centre lies inside the region and reduces
//! them. When the block count exceeds the pixel budget it either fails (exact mode) or
//! samples blocks on a coarser lattice and reports the result as approximate.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::params::AreaOfInterest;
use crate::types::{FloodError, FloodResult, MaskedRaster, RasterGrid};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const SCALE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Sum,
    Mean,
}

/// Behaviour when a reduction needs more pixels than allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionMode {
    /// Fail with `PixelBudgetExceeded`
    Exact,
    /// Coarsen the effective scale until the budget is met
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Exactness {
    Exact,
    Approximate { requested_scale: f64, effective_scale: f64 },
}

impl Exactness {
    pub fn is_approximate(&self) -> bool {
        matches!(self, Exactness::Approximate { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReductionOutcome {
    pub value: f64,
    /// Blocks that contributed at the effective scale
    pub pixels: u64,
    pub exactness: Exactness,
}

/// A raster with optional per-pixel weights in `0..=1`
#[derive(Debug, Clone)]
pub struct WeightedRaster<'a> {
    pub raster: &'a MaskedRaster,
    pub weights: Option<Array2<f32>>,
}

impl<'a> WeightedRaster<'a> {
    pub fn unmasked(raster: &'a MaskedRaster) -> Self {
        Self { raster, weights: None }
    }

    pub fn masked(raster: &'a MaskedRaster, weights: Array2<f32>) -> FloodResult<Self> {
        if weights.dim() != raster.dim() {
            return Err(FloodError::GridMismatch(format!(
                "weights {:?} do not match raster {:?}",
                weights.dim(),
                raster.dim()
            )));
        }
        Ok(Self { raster, weights: Some(weights) })
    }

    /// Weighted value, `None` for no-data
    pub fn weighted_at(&self, row: usize, col: usize) -> Option<f64> {
        let value = f64::from(self.raster.get(row, col)?);
        let weight = match &self.weights {
            Some(w) => f64::from(*w.get((row, col))?),
            None => 1.0,
        };
        Some(value * weight)
    }
}

/// Zonal reduction seam
pub trait RegionReducer: Send + Sync {
    fn reduce_region(
        &self,
        input: &WeightedRaster<'_>,
        aoi: &AreaOfInterest,
        reducer: Reducer,
        scale: f64,
        max_pixels: u64,
        mode: ReductionMode,
    ) -> FloodResult<ReductionOutcome>;
}

/// Block-aggregating reducer over in-memory rasters
#[derive(Debug, Clone, Copy, Default)]
pub struct GridReducer;

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    sum: f64,
    count: u64,
    blocks: u64,
}

impl Accumulator {
    fn merge(self, other: Accumulator) -> Accumulator {
        Accumulator {
            sum: self.sum + other.sum,
            count: self.count + other.count,
            blocks: self.blocks + other.blocks,
        }
    }
}

impl GridReducer {
    pub fn new() -> Self {
        Self
    }

    /// Native pixels per block side for `scale`
    fn block_factor(grid: &RasterGrid, scale: f64) -> FloodResult<usize> {
        let native = grid.pixel_size();
        if !(scale.is_finite() && scale > 0.0) {
            return Err(FloodError::Config(format!("invalid reduction scale {}", scale)));
        }
        let ratio = scale / native;
        let factor = ratio.round();
        if factor < 1.0 || (ratio - factor).abs() > SCALE_TOLERANCE * ratio.max(1.0) {
            return Err(FloodError::Config(format!(
                "scale {} m is not a whole multiple of the {} m native pixel",
                scale, native
            )));
        }
        Ok(factor as usize)
    }

    fn block_included(grid: &RasterGrid, aoi: &AreaOfInterest, factor: usize, br: usize, bc: usize) -> bool {
        let t = &grid.transform;
        let half = factor as f64 / 2.0;
        let x = t.top_left_x + ((bc * factor) as f64 + half) * t.pixel_width;
        let y = t.top_left_y + ((br * factor) as f64 + half) * t.pixel_height;
        aoi.contains_point(x, y)
    }

    fn reduce_block_row(
        input: &WeightedRaster<'_>,
        aoi: &AreaOfInterest,
        factor: usize,
        stride: usize,
        br: usize,
        block_cols: usize,
    ) -> Accumulator {
        let grid = &input.raster.grid;
        let mut acc = Accumulator::default();
        for bc in (0..block_cols).step_by(stride) {
            if !Self::block_included(grid, aoi, factor, br, bc) {
                continue;
            }
            acc.blocks += 1;
            let rows = (br * factor)..((br + 1) * factor).min(grid.rows);
            for row in rows {
                let cols = (bc * factor)..((bc + 1) * factor).min(grid.cols);
                for col in cols {
                    if let Some(v) = input.weighted_at(row, col) {
                        acc.sum += v;
                        acc.count += 1;
                    }
                }
            }
        }
        acc
    }

    fn count_blocks(
        grid: &RasterGrid,
        aoi: &AreaOfInterest,
        factor: usize,
        stride: usize,
        block_rows: usize,
        block_cols: usize,
    ) -> u64 {
        let mut count = 0u64;
        for br in (0..block_rows).step_by(stride) {
            for bc in (0..block_cols).step_by(stride) {
                if Self::block_included(grid, aoi, factor, br, bc) {
                    count += 1;
                }
            }
        }
        count
    }

    #[cfg(feature = "parallel")]
    fn accumulate(
        input: &WeightedRaster<'_>,
        aoi: &AreaOfInterest,
        factor: usize,
        stride: usize,
        block_rows: usize,
        block_cols: usize,
    ) -> Accumulator {
        let rows: Vec<usize> = (0..block_rows).step_by(stride).collect();
        rows.par_iter()
            .map(|&br| Self::reduce_block_row(input, aoi, factor, stride, br, block_cols))
            .reduce(Accumulator::default, Accumulator::merge)
    }

    #[cfg(not(feature = "parallel"))]
    fn accumulate(
        input: &WeightedRaster<'_>,
        aoi: &AreaOfInterest,
        factor: usize,
        stride: usize,
        block_rows: usize,
        block_cols: usize,
    ) -> Accumulator {
        (0..block_rows)
            .step_by(stride)
            .map(|br| Self::reduce_block_row(input, aoi, factor, stride, br, block_cols))
            .fold(Accumulator::default(), Accumulator::merge)
    }
}

impl RegionReducer for GridReducer {
    fn reduce_region(
        &self,
        input: &WeightedRaster<'_>,
        aoi: &AreaOfInterest,
        reducer: Reducer,
        scale: f64,
        max_pixels: u64,
        mode: ReductionMode,
    ) -> FloodResult<ReductionOutcome> {
        let grid = &input.raster.grid;
        let region = aoi.bounds();
        let extent = grid.bounds();
        let (r0, r1, e0, e1) = (region.min(), region.max(), extent.min(), extent.max());
        if r1.x <= e0.x || r0.x >= e1.x || r1.y <= e0.y || r0.y >= e1.y {
            return Err(FloodError::Processing(
                "reduction region does not overlap the raster".to_string(),
            ));
        }

        let factor = Self::block_factor(grid, scale)?;
        let block_rows = (grid.rows + factor - 1) / factor;
        let block_cols = (grid.cols + factor - 1) / factor;
        let candidates = Self::count_blocks(grid, aoi, factor, 1, block_rows, block_cols);

        let (stride, exactness) = if candidates > max_pixels {
            match mode {
                ReductionMode::Exact => {
                    return Err(FloodError::PixelBudgetExceeded { pixels: candidates, max_pixels });
                }
                ReductionMode::BestEffort => {
                    let mut stride = (candidates as f64 / max_pixels.max(1) as f64).sqrt().ceil().max(1.0) as usize;
                    while Self::count_blocks(grid, aoi, factor, stride, block_rows, block_cols) > max_pixels {
                        stride += 1;
                    }
                    let effective_scale = scale * stride as f64;
                    log::debug!(
                        "Reduction over {} blocks exceeds {}, sampling at {} m instead of {} m",
                        candidates,
                        max_pixels,
                        effective_scale,
                        scale
                    );
                    (stride, Exactness::Approximate { requested_scale: scale, effective_scale })
                }
            }
        } else {
            (1, Exactness::Exact)
        };

        let acc = Self::accumulate(input, aoi, factor, stride, block_rows, block_cols);
        let value = match reducer {
            Reducer::Sum => acc.sum * (stride * stride) as f64,
            Reducer::Mean if acc.count > 0 => acc.sum / acc.count as f64,
            Reducer::Mean => f64::NAN,
        };

        Ok(ReductionOutcome {
            value,
            pixels: acc.blocks,
            exactness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn raster() -> MaskedRaster {
        MaskedRaster::filled(RasterGrid::north_up(0.0, 1000.0, 100.0, 10, 10), 10.0)
    }

    fn aoi() -> AreaOfInterest {
        AreaOfInterest::from_bounds(0.0, 0.0, 1000.0, 1000.0).unwrap()
    }

    #[test]
    fn test_sum_at_native_scale() {
        let r = raster();
        let out = GridReducer
            .reduce_region(&WeightedRaster::unmasked(&r), &aoi(), Reducer::Sum, 100.0, 1_000, ReductionMode::Exact)
            .unwrap();
        assert_abs_diff_eq!(out.value, 1000.0);
        assert_eq!(out.pixels, 100);
        assert_eq!(out.exactness, Exactness::Exact);
    }

    #[test]
    fn test_sum_at_coarser_scale_preserves_total() {
        let r = raster();
        let out = GridReducer
            .reduce_region(&WeightedRaster::unmasked(&r), &aoi(), Reducer::Sum, 500.0, 1_000, ReductionMode::Exact)
            .unwrap();
        assert_abs_diff_eq!(out.value, 1000.0);
        assert_eq!(out.pixels, 4);
    }

    #[test]
    fn test_weights_and_mean() {
        let r = raster();
        let mut weights = Array2::zeros(r.dim());
        weights.row_mut(0).fill(1.0);
        let input = WeightedRaster::masked(&r, weights).unwrap();
        let sum = GridReducer
            .reduce_region(&input, &aoi(), Reducer::Sum, 100.0, 1_000, ReductionMode::Exact)
            .unwrap();
        assert_abs_diff_eq!(sum.value, 100.0);

        let mean = GridReducer
            .reduce_region(&WeightedRaster::unmasked(&r), &aoi(), Reducer::Mean, 100.0, 1_000, ReductionMode::Exact)
            .unwrap();
        assert_abs_diff_eq!(mean.value, 10.0);
    }

    #[test]
    fn test_pixel_budget() {
        let r = raster();
        let input = WeightedRaster::unmasked(&r);
        let exact = GridReducer.reduce_region(&input, &aoi(), Reducer::Sum, 100.0, 25, ReductionMode::Exact);
        assert_eq!(exact.unwrap_err(), FloodError::PixelBudgetExceeded { pixels: 100, max_pixels: 25 });

        let approx = GridReducer
            .reduce_region(&input, &aoi(), Reducer::Sum, 100.0, 25, ReductionMode::BestEffort)
            .unwrap();
        assert_eq!(
            approx.exactness,
            Exactness::Approximate { requested_scale: 100.0, effective_scale: 200.0 }
        );
        assert_eq!(approx.pixels, 25);
        assert_abs_diff_eq!(approx.value, 1000.0);
    }

    #[test]
    fn test_finer_than_native_is_rejected() {
        let r = raster();
        let input = WeightedRaster::unmasked(&r);
        assert!(GridReducer
            .reduce_region(&input, &aoi(), Reducer::Sum, 50.0, 1_000, ReductionMode::Exact)
            .is_err());
        assert!(GridReducer
            .reduce_region(&input, &aoi(), Reducer::Sum, 150.0, 1_000, ReductionMode::Exact)
            .is_err());
    }

    #[test]
    fn test_disjoint_region_is_an_error() {
        let r = raster();
        let far = AreaOfInterest::from_bounds(5000.0, 5000.0, 6000.0, 6000.0).unwrap();
        let result = GridReducer.reduce_region(
            &WeightedRaster::unmasked(&r),
            &far,
            Reducer::Sum,
            100.0,
            1_000,
            ReductionMode::Exact,
        );
        assert!(matches!(result, Err(FloodError::Processing(_))));
    }
}
