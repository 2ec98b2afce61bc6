use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::params::AreaOfInterest;
use crate::types::{FloodError, FloodResult, MaskedRaster};

/// A population count dataset and the band holding counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSource {
    pub name: String,
    pub band: String,
    /// Reduction scale in meters; the layer's own pixel size when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_scale: Option<f64>,
}

impl PopulationSource {
    pub fn new(name: &str, band: &str, native_scale: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            band: band.to_string(),
            native_scale,
        }
    }
}

/// GHSL (100 m), GPW (~1 km) and LandScan (~1 km)
pub fn default_sources() -> Vec<PopulationSource> {
    vec![
        PopulationSource::new("GHSL", "population_count", Some(100.0)),
        PopulationSource::new("GPW", "unwpp-adjusted_population_count", None),
        PopulationSource::new("LandScan", "b1", None),
    ]
}

/// Population counts for one source on the source's own grid
#[derive(Debug, Clone)]
pub struct PopulationLayer {
    pub source: PopulationSource,
    pub raster: MaskedRaster,
}

impl PopulationLayer {
    /// Negative and non-finite counts are treated as no-data
    pub fn new(source: PopulationSource, mut raster: MaskedRaster) -> Self {
        ndarray::Zip::from(&mut raster.valid)
            .and(&raster.values)
            .for_each(|ok, &v| *ok = *ok && v.is_finite() && v >= 0.0);
        Self { source, raster }
    }

    pub fn native_scale(&self) -> f64 {
        self.source.native_scale.unwrap_or_else(|| self.raster.grid.pixel_size())
    }
}

/// Loads population layers for an AOI
pub trait PopulationProvider: Send + Sync {
    fn load(&self, source: &PopulationSource, aoi: &AreaOfInterest) -> FloodResult<PopulationLayer>;
}

/// Population layers held in memory, keyed by source name
#[derive(Debug, Clone, Default)]
pub struct InMemoryPopulation {
    layers: HashMap<String, MaskedRaster>,
}

impl InMemoryPopulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, name: &str, raster: MaskedRaster) -> Self {
        self.layers.insert(name.to_string(), raster);
        self
    }
}

impl PopulationProvider for InMemoryPopulation {
    fn load(&self, source: &PopulationSource, aoi: &AreaOfInterest) -> FloodResult<PopulationLayer> {
        let raster = self
            .layers
            .get(&source.name)
            .ok_or_else(|| FloodError::LayerNotFound(format!("population source '{}'", source.name)))?;
        log::debug!(
            "Loaded {} ({}) for AOI of {:.0} m2 on a {}x{} grid",
            source.name,
            source.band,
            aoi.area(),
            raster.grid.rows,
            raster.grid.cols
        );
        Ok(PopulationLayer::new(source.clone(), raster.clone()))
    }
}
