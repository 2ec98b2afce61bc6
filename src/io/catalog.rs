use std::sync::Arc;

use crate::core::classify::AncillaryLayers;
use crate::core::optical::{OpticalQuery, OpticalScene};
use crate::core::scene_filter::{SceneQuery, SceneRecord};
use crate::params::AreaOfInterest;
use crate::types::{FloodResult, RasterGrid};

/// Imagery substrate: scene metadata queries and pixel access.
///
/// Implementations may return a superset of the matching scenes; callers re-apply the
/// query predicate.
pub trait SceneCatalog: Send + Sync {
    fn query_scenes(&self, query: &SceneQuery) -> FloodResult<Vec<Arc<SceneRecord>>>;

    fn query_optical(&self, query: &OpticalQuery) -> FloodResult<Vec<Arc<OpticalScene>>>;

    /// Water history, elevation and slope on `grid`, when the substrate has them
    fn ancillary(&self, _aoi: &AreaOfInterest, _grid: &RasterGrid) -> FloodResult<Option<AncillaryLayers>> {
        Ok(None)
    }
}

/// Scenes held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    scenes: Vec<Arc<SceneRecord>>,
    optical: Vec<Arc<OpticalScene>>,
    ancillary: Option<AncillaryLayers>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scene(mut self, scene: SceneRecord) -> Self {
        self.scenes.push(Arc::new(scene));
        self
    }

    pub fn with_scenes<I: IntoIterator<Item = SceneRecord>>(mut self, scenes: I) -> Self {
        self.scenes.extend(scenes.into_iter().map(Arc::new));
        self
    }

    pub fn with_optical(mut self, scene: OpticalScene) -> Self {
        self.optical.push(Arc::new(scene));
        self
    }

    pub fn with_ancillary(mut self, layers: AncillaryLayers) -> Self {
        self.ancillary = Some(layers);
        self
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }
}

impl SceneCatalog for InMemoryCatalog {
    fn query_scenes(&self, query: &SceneQuery) -> FloodResult<Vec<Arc<SceneRecord>>> {
        Ok(self.scenes.iter().filter(|s| query.matches(s)).cloned().collect())
    }

    fn query_optical(&self, query: &OpticalQuery) -> FloodResult<Vec<Arc<OpticalScene>>> {
        Ok(self.optical.iter().filter(|s| query.matches(s)).cloned().collect())
    }

    fn ancillary(&self, _aoi: &AreaOfInterest, grid: &RasterGrid) -> FloodResult<Option<AncillaryLayers>> {
        match &self.ancillary {
            Some(layers) => {
                crate::core::classify::ensure_ancillary_grid(layers, grid)?;
                Ok(Some(layers.clone()))
            }
            None => Ok(None),
        }
    }
}
