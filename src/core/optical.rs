//! Cloud-masked Sentinel-2 composite shown alongside the radar layers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use geo::Polygon;
use ndarray::Array2;

use crate::config::OpticalConfig;
use crate::core::composite::temporal_mean;
use crate::params::{AreaOfInterest, TimeWindow};
use crate::types::{FloodError, FloodResult, MaskedRaster, RasterGrid, Sensor, ValidityMask, WindowKind};

/// One Sentinel-2 scene (reflectance bands plus the QA60 bitmask)
#[derive(Debug, Clone)]
pub struct OpticalScene {
    pub id: String,
    pub acquired: DateTime<Utc>,
    pub footprint: Polygon<f64>,
    pub cloudy_pixel_percentage: f32,
    pub qa60: Array2<u16>,
    pub bands: HashMap<String, MaskedRaster>,
}

impl OpticalScene {
    pub fn band(&self, name: &str) -> FloodResult<&MaskedRaster> {
        self.bands
            .get(name)
            .ok_or_else(|| FloodError::Substrate(format!("optical scene {} has no band {}", self.id, name)))
    }
}

#[derive(Debug, Clone)]
pub struct OpticalQuery {
    pub window: TimeWindow,
    pub aoi: AreaOfInterest,
    pub max_cloudy_pixel_percentage: f32,
}

impl OpticalQuery {
    pub fn new(window: TimeWindow, aoi: AreaOfInterest, config: &OpticalConfig) -> Self {
        Self {
            window,
            aoi,
            max_cloudy_pixel_percentage: config.max_cloudy_pixel_percentage,
        }
    }

    pub fn matches(&self, scene: &OpticalScene) -> bool {
        scene.cloudy_pixel_percentage < self.max_cloudy_pixel_percentage
            && self.window.contains(&scene.acquired)
            && self.aoi.intersects(&scene.footprint)
    }
}

/// Mean of the clear observations per band, clipped to the AOI
#[derive(Debug, Clone)]
pub struct OpticalComposite {
    pub window: WindowKind,
    pub grid: RasterGrid,
    pub bands: Vec<(String, MaskedRaster)>,
    pub scene_count: usize,
}

impl OpticalComposite {
    pub fn band(&self, name: &str) -> Option<&MaskedRaster> {
        self.bands.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }
}

pub struct OpticalCompositor {
    config: OpticalConfig,
}

impl OpticalCompositor {
    pub fn new(config: OpticalConfig) -> Self {
        Self { config }
    }

    pub fn standard() -> Self {
        Self::new(OpticalConfig::default())
    }

    /// True where both the cloud and the cirrus bit are clear
    pub fn cloud_mask(&self, qa60: &Array2<u16>) -> ValidityMask {
        let flags = (1u16 << self.config.cloud_bit) | (1u16 << self.config.cirrus_bit);
        qa60.mapv(|qa| qa & flags == 0)
    }

    pub fn build(
        &self,
        scenes: &[Arc<OpticalScene>],
        aoi: &AreaOfInterest,
        window: WindowKind,
    ) -> FloodResult<OpticalComposite> {
        let first = scenes
            .first()
            .ok_or(FloodError::EmptyCollection { window, sensor: Sensor::Sentinel2 })?;
        let grid = first.band(self.band_name(0)?)?.grid.clone();
        let aoi_mask = aoi.pixel_mask(&grid);

        let mut masked_scenes: Vec<HashMap<&str, MaskedRaster>> = Vec::with_capacity(scenes.len());
        for scene in scenes {
            if scene.qa60.dim() != grid.dim() {
                return Err(FloodError::GridMismatch(format!("QA60 band of {} is off-grid", scene.id)));
            }
            let clear = self.cloud_mask(&scene.qa60);
            let mut bands = HashMap::new();
            for name in &self.config.bands {
                bands.insert(name.as_str(), scene.band(name)?.clip(&clear)?);
            }
            masked_scenes.push(bands);
        }

        let mut bands = Vec::with_capacity(self.config.bands.len());
        for name in &self.config.bands {
            let rasters: Vec<&MaskedRaster> = masked_scenes
                .iter()
                .filter_map(|b| b.get(name.as_str()))
                .collect();
            let mean = temporal_mean(&rasters, &grid)?.clip(&aoi_mask)?;
            bands.push((name.clone(), mean));
        }

        log::info!("Built {} optical composite from {} scenes", window, scenes.len());
        Ok(OpticalComposite {
            window,
            grid,
            bands,
            scene_count: scenes.len(),
        })
    }

    fn band_name(&self, index: usize) -> FloodResult<&str> {
        self.config
            .bands
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| FloodError::Config("no optical bands configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::rectangle;
    use chrono::{NaiveDate, TimeZone};

    fn grid() -> RasterGrid {
        RasterGrid::north_up(0.0, 20.0, 10.0, 2, 2)
    }

    fn scene(id: &str, reflectance: f32, qa: u16, cloudy: f32) -> OpticalScene {
        let bands = ["B4", "B3", "B2"]
            .iter()
            .map(|b| (b.to_string(), MaskedRaster::filled(grid(), reflectance)))
            .collect();
        OpticalScene {
            id: id.to_string(),
            acquired: Utc.with_ymd_and_hms(2020, 7, 22, 10, 0, 0).unwrap(),
            footprint: rectangle(0.0, 0.0, 20.0, 20.0),
            cloudy_pixel_percentage: cloudy,
            qa60: Array2::from_elem((2, 2), qa),
            bands,
        }
    }

    #[test]
    fn test_cloud_and_cirrus_bits_are_masked() {
        let compositor = OpticalCompositor::standard();
        let qa = Array2::from_shape_vec((2, 2), vec![0u16, 1 << 10, 1 << 11, 1 << 3]).unwrap();
        let mask = compositor.cloud_mask(&qa);
        assert_eq!(mask.iter().copied().collect::<Vec<_>>(), vec![true, false, false, true]);
    }

    #[test]
    fn test_composite_averages_clear_scenes_only() {
        let aoi = AreaOfInterest::from_bounds(0.0, 0.0, 20.0, 20.0).unwrap();
        let scenes = vec![
            Arc::new(scene("clear", 1000.0, 0, 10.0)),
            Arc::new(scene("cloud", 9000.0, 1 << 10, 10.0)),
        ];
        let composite = OpticalCompositor::standard().build(&scenes, &aoi, WindowKind::Event).unwrap();
        assert_eq!(composite.band("B4").unwrap().get(0, 0), Some(1000.0));
        assert_eq!(composite.bands.len(), 3);
    }

    #[test]
    fn test_query_drops_cloudy_scenes() {
        let query = OpticalQuery::new(
            TimeWindow::new(NaiveDate::from_ymd_opt(2020, 7, 20).unwrap(), 8),
            AreaOfInterest::from_bounds(0.0, 0.0, 20.0, 20.0).unwrap(),
            &OpticalConfig::default(),
        );
        assert!(query.matches(&scene("a", 1.0, 0, 69.9)));
        assert!(!query.matches(&scene("b", 1.0, 0, 70.0)));
    }

    #[test]
    fn test_empty_optical_collection() {
        let aoi = AreaOfInterest::from_bounds(0.0, 0.0, 20.0, 20.0).unwrap();
        let result = OpticalCompositor::standard().build(&[], &aoi, WindowKind::Baseline);
        assert_eq!(
            result.unwrap_err(),
            FloodError::EmptyCollection { window: WindowKind::Baseline, sensor: Sensor::Sentinel2 }
        );
    }
}
