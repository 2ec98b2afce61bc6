//! Population exposure: people living under high-confidence flooding.
//!
//! Each population source is reduced over the AOI at its own scale, once weighted by the
//! share of each population pixel covered by class-3 flood pixels and once unweighted for
//! the AOI total. Counts are rounded to the nearest person.

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::Array2;

use crate::core::classify::FloodRaster;
use crate::core::reduce::{Exactness, Reducer, ReductionMode, RegionReducer, WeightedRaster};
use crate::io::population::PopulationLayer;
use crate::params::AreaOfInterest;
use crate::types::{FloodResult, RasterGrid, ValidityMask};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Estimate for one population source
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationEstimate {
    pub band: String,
    /// Persons inside class-3 flood pixels
    pub count: u64,
    /// Persons in the whole AOI, regardless of flooding
    pub aoi_total: u64,
    pub scale: f64,
    pub exactness: Exactness,
}

/// Estimates keyed by source name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExposureResult {
    pub estimates: BTreeMap<String, PopulationEstimate>,
}

impl ExposureResult {
    pub fn get(&self, source: &str) -> Option<&PopulationEstimate> {
        self.estimates.get(source)
    }

    pub fn count(&self, source: &str) -> Option<u64> {
        self.get(source).map(|e| e.count)
    }

    pub fn is_approximate(&self) -> bool {
        self.estimates.values().any(|e| e.exactness.is_approximate())
    }
}

/// Fraction of each `target_grid` pixel covered by `mask`.
///
/// Coarser targets count the covered fine pixels by centre; finer or equal targets take
/// the mask value at their own centre.
pub fn coverage_weights(mask: &ValidityMask, mask_grid: &RasterGrid, target_grid: &RasterGrid) -> Array2<f32> {
    let fine_area = mask_grid.pixel_area();
    let target_area = target_grid.pixel_area();

    if target_area > fine_area {
        let cells_per_target = target_area / fine_area;
        let mut covered = Array2::<f64>::zeros(target_grid.dim());
        for ((row, col), &flooded) in mask.indexed_iter() {
            if !flooded {
                continue;
            }
            let (x, y) = mask_grid.pixel_center(row, col);
            if let Some(cell) = target_grid.locate(x, y) {
                covered[cell] += 1.0;
            }
        }
        covered.mapv(|n| (n / cells_per_target).min(1.0) as f32)
    } else {
        Array2::from_shape_fn(target_grid.dim(), |(row, col)| {
            let (x, y) = target_grid.pixel_center(row, col);
            match mask_grid.locate(x, y) {
                Some(cell) if mask[cell] => 1.0,
                _ => 0.0,
            }
        })
    }
}

/// Population exposure over a flood raster
pub struct ExposureAggregator {
    reducer: Arc<dyn RegionReducer>,
    max_pixels: u64,
    mode: ReductionMode,
}

impl ExposureAggregator {
    pub fn new(reducer: Arc<dyn RegionReducer>, max_pixels: u64, mode: ReductionMode) -> Self {
        Self { reducer, max_pixels, mode }
    }

    pub fn compute(
        &self,
        flood: &FloodRaster,
        aoi: &AreaOfInterest,
        layers: &[PopulationLayer],
    ) -> FloodResult<ExposureResult> {
        let flooded = flood.high_confidence_mask();
        log::info!(
            "Computing exposure for {} population sources over {} high-confidence pixels",
            layers.len(),
            flooded.iter().filter(|f| **f).count()
        );

        let estimates = self.estimate_all(&flooded, &flood.grid, aoi, layers)?;
        let result = ExposureResult {
            estimates: estimates.into_iter().collect(),
        };
        for (name, estimate) in &result.estimates {
            if let Exactness::Approximate { requested_scale, effective_scale } = estimate.exactness {
                log::warn!(
                    "{} exposure is approximate: reduced at {} m instead of {} m",
                    name,
                    effective_scale,
                    requested_scale
                );
            }
            log::info!("{}: {} exposed of {} in AOI", name, estimate.count, estimate.aoi_total);
        }
        Ok(result)
    }

    #[cfg(feature = "parallel")]
    fn estimate_all(
        &self,
        flooded: &ValidityMask,
        grid: &RasterGrid,
        aoi: &AreaOfInterest,
        layers: &[PopulationLayer],
    ) -> FloodResult<Vec<(String, PopulationEstimate)>> {
        layers
            .par_iter()
            .map(|layer| self.estimate(flooded, grid, aoi, layer))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn estimate_all(
        &self,
        flooded: &ValidityMask,
        grid: &RasterGrid,
        aoi: &AreaOfInterest,
        layers: &[PopulationLayer],
    ) -> FloodResult<Vec<(String, PopulationEstimate)>> {
        layers
            .iter()
            .map(|layer| self.estimate(flooded, grid, aoi, layer))
            .collect()
    }

    fn estimate(
        &self,
        flooded: &ValidityMask,
        grid: &RasterGrid,
        aoi: &AreaOfInterest,
        layer: &PopulationLayer,
    ) -> FloodResult<(String, PopulationEstimate)> {
        let scale = layer.native_scale();
        let weights = coverage_weights(flooded, grid, &layer.raster.grid);

        let exposed = self.reducer.reduce_region(
            &WeightedRaster::masked(&layer.raster, weights)?,
            aoi,
            Reducer::Sum,
            scale,
            self.max_pixels,
            self.mode,
        )?;
        let total = self.reducer.reduce_region(
            &WeightedRaster::unmasked(&layer.raster),
            aoi,
            Reducer::Sum,
            scale,
            self.max_pixels,
            self.mode,
        )?;

        let aoi_total = round_count(total.value);
        let count = round_count(exposed.value).min(aoi_total);
        log::debug!(
            "{} at {} m: {} blocks, exposed {:.1}, total {:.1}",
            layer.source.name,
            scale,
            exposed.pixels,
            exposed.value,
            total.value
        );

        Ok((
            layer.source.name.clone(),
            PopulationEstimate {
                band: layer.source.band.clone(),
                count,
                aoi_total,
                scale,
                exactness: exposed.exactness,
            },
        ))
    }
}

fn round_count(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}
