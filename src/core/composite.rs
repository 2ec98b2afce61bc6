use ndarray::{Array2, Zip};

use crate::core::scene_filter::SceneCollection;
use crate::params::AreaOfInterest;
use crate::types::{
    FloodError, FloodResult, MaskedRaster, Polarization, RasterGrid, SarRealImage, Sensor, WindowKind,
};

/// Positional band order of the radar composite. VH occupies bands 0 and 2; consumers
/// index bands by position.
pub const COMPOSITE_BAND_ORDER: [Polarization; 3] = [Polarization::VH, Polarization::VV, Polarization::VH];

/// Temporal-mean radar composite for one window, clipped to the AOI
#[derive(Debug, Clone)]
pub struct Composite {
    pub window: WindowKind,
    pub grid: RasterGrid,
    pub bands: [MaskedRaster; 3],
    pub scene_count: usize,
}

impl Composite {
    pub fn band(&self, index: usize) -> Option<&MaskedRaster> {
        self.bands.get(index)
    }

    /// First band carrying `polarization`
    pub fn channel(&self, polarization: Polarization) -> Option<&MaskedRaster> {
        COMPOSITE_BAND_ORDER
            .iter()
            .position(|p| *p == polarization)
            .map(|i| &self.bands[i])
    }
}

/// Builds per-window composites
pub struct CompositeBuilder;

impl CompositeBuilder {
    pub fn build(collection: &SceneCollection, aoi: &AreaOfInterest, window: WindowKind) -> FloodResult<Composite> {
        let first = collection
            .iter()
            .next()
            .ok_or(FloodError::EmptyCollection { window, sensor: Sensor::Sentinel1 })?;
        let grid = first.band(Polarization::VV)?.grid.clone();

        log::info!(
            "Building {} composite from {} scenes on a {}x{} grid",
            window,
            collection.len(),
            grid.rows,
            grid.cols
        );

        let aoi_mask = aoi.pixel_mask(&grid);
        let mut means: Vec<(Polarization, MaskedRaster)> = Vec::new();
        for pol in COMPOSITE_BAND_ORDER {
            if means.iter().any(|(p, _)| *p == pol) {
                continue;
            }
            let rasters = collection
                .iter()
                .map(|scene| scene.band(pol))
                .collect::<FloodResult<Vec<_>>>()?;
            let mean = temporal_mean(&rasters, &grid)?.clip(&aoi_mask)?;
            log::debug!("{} {} mean: {} valid pixels", window, pol, mean.valid_count());
            means.push((pol, mean));
        }

        let lookup = |pol: Polarization| -> FloodResult<MaskedRaster> {
            means
                .iter()
                .find(|(p, _)| *p == pol)
                .map(|(_, r)| r.clone())
                .ok_or_else(|| FloodError::Processing(format!("missing {} mean", pol)))
        };
        let bands = [
            lookup(COMPOSITE_BAND_ORDER[0])?,
            lookup(COMPOSITE_BAND_ORDER[1])?,
            lookup(COMPOSITE_BAND_ORDER[2])?,
        ];

        Ok(Composite {
            window,
            grid,
            bands,
            scene_count: collection.len(),
        })
    }
}

/// Per-pixel mean over every valid observation.
///
/// Accumulates in f64 so the result does not depend on input order beyond rounding of
/// the final division. Pixels never observed stay masked.
pub fn temporal_mean(rasters: &[&MaskedRaster], grid: &RasterGrid) -> FloodResult<MaskedRaster> {
    if rasters.is_empty() {
        return Err(FloodError::Processing("temporal mean of zero rasters".to_string()));
    }

    let mut sum = Array2::<f64>::zeros(grid.dim());
    let mut count = Array2::<u32>::zeros(grid.dim());
    for raster in rasters {
        grid.ensure_aligned(&raster.grid, "temporal mean input")?;
        Zip::from(&mut sum)
            .and(&mut count)
            .and(&raster.values)
            .and(&raster.valid)
            .for_each(|s, n, &v, &ok| {
                if ok && v.is_finite() {
                    *s += f64::from(v);
                    *n += 1;
                }
            });
    }

    let values = finish_mean(&sum, &count);
    let valid = count.mapv(|n| n > 0);
    MaskedRaster::new(grid.clone(), values, valid)
}

#[cfg(feature = "parallel")]
fn finish_mean(sum: &Array2<f64>, count: &Array2<u32>) -> SarRealImage {
    Zip::from(sum).and(count).par_map_collect(|&s, &n| {
        if n > 0 {
            (s / f64::from(n)) as f32
        } else {
            f32::NAN
        }
    })
}

#[cfg(not(feature = "parallel"))]
fn finish_mean(sum: &Array2<f64>, count: &Array2<u32>) -> SarRealImage {
    Zip::from(sum).and(count).map_collect(|&s, &n| {
        if n > 0 {
            (s / f64::from(n)) as f32
        } else {
            f32::NAN
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scene_filter::SceneRecord;
    use crate::params::rectangle;
    use crate::types::{AcquisitionMode, OrbitPass};
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn grid() -> RasterGrid {
        RasterGrid::north_up(0.0, 40.0, 10.0, 4, 4)
    }

    fn scene(id: &str, vv: f32, vh: f32) -> SceneRecord {
        let mut bands = HashMap::new();
        bands.insert(Polarization::VV, MaskedRaster::filled(grid(), vv));
        bands.insert(Polarization::VH, MaskedRaster::filled(grid(), vh));
        SceneRecord {
            id: id.to_string(),
            mode: AcquisitionMode::IW,
            pass: OrbitPass::Descending,
            relative_orbit: 1,
            polarizations: vec![Polarization::VV, Polarization::VH],
            resolution_meters: 10,
            acquired: Utc.with_ymd_and_hms(2020, 5, 3, 0, 0, 0).unwrap(),
            footprint: rectangle(0.0, 0.0, 40.0, 40.0),
            bands,
        }
    }

    #[test]
    fn test_band_order_and_mean() {
        let aoi = AreaOfInterest::from_bounds(0.0, 0.0, 40.0, 40.0).unwrap();
        let collection = SceneCollection::new(vec![scene("a", -10.0, -20.0), scene("b", -14.0, -24.0)]);
        let composite = CompositeBuilder::build(&collection, &aoi, WindowKind::Baseline).unwrap();

        assert_eq!(composite.scene_count, 2);
        assert_abs_diff_eq!(composite.bands[0].get(1, 1).unwrap(), -22.0);
        assert_abs_diff_eq!(composite.bands[1].get(1, 1).unwrap(), -12.0);
        assert_abs_diff_eq!(composite.bands[2].get(1, 1).unwrap(), -22.0);
        assert_abs_diff_eq!(composite.channel(Polarization::VV).unwrap().get(0, 0).unwrap(), -12.0);
    }

    #[test]
    fn test_empty_collection_is_distinct_error() {
        let aoi = AreaOfInterest::from_bounds(0.0, 0.0, 40.0, 40.0).unwrap();
        let result = CompositeBuilder::build(&SceneCollection::default(), &aoi, WindowKind::Event);
        assert_eq!(
            result.unwrap_err(),
            FloodError::EmptyCollection { window: WindowKind::Event, sensor: Sensor::Sentinel1 }
        );
    }

    #[test]
    fn test_clip_masks_outside_aoi() {
        let aoi = AreaOfInterest::from_bounds(0.0, 20.0, 20.0, 40.0).unwrap();
        let collection = SceneCollection::new(vec![scene("a", -10.0, -20.0)]);
        let composite = CompositeBuilder::build(&collection, &aoi, WindowKind::Baseline).unwrap();
        assert_eq!(composite.bands[1].valid_count(), 4);
        assert!(composite.bands[1].get(3, 3).is_none());
    }

    #[test]
    fn test_mean_skips_invalid_observations() {
        let mut partial = MaskedRaster::filled(grid(), -8.0);
        partial.valid[[0, 0]] = false;
        let full = MaskedRaster::filled(grid(), -12.0);
        let mut gap = MaskedRaster::filled(grid(), 0.0);
        gap.valid.fill(false);

        let mean = temporal_mean(&[&partial, &full], &grid()).unwrap();
        assert_abs_diff_eq!(mean.get(0, 0).unwrap(), -12.0);
        assert_abs_diff_eq!(mean.get(1, 1).unwrap(), -10.0);

        let unobserved = temporal_mean(&[&gap], &grid()).unwrap();
        assert_eq!(unobserved.valid_count(), 0);
    }
}
