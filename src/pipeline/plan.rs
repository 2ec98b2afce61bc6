use std::sync::Arc;

use crate::config::FloodMapperConfig;
use crate::core::classify::{AncillaryLayers, FloodClassifier, FloodRaster};
use crate::core::composite::{Composite, CompositeBuilder};
use crate::core::optical::{OpticalComposite, OpticalCompositor, OpticalQuery};
use crate::core::scene_filter::{SceneCollection, SceneFilter, SceneQuery};
use crate::core::zscore::{AnomalyStack, ZScoreEngine, ZScoreParams};
use crate::io::catalog::SceneCatalog;
use crate::params::PipelineParams;
use crate::pipeline::deferred::Node;
use crate::types::WindowKind;

/// Deferred description of every layer derived from one parameter snapshot.
///
/// Building a plan runs nothing; each node is computed when first materialized.
#[derive(Debug, Clone)]
pub struct FloodPlan {
    pub params: Arc<PipelineParams>,
    pub scenes: [Node<SceneCollection>; 2],
    pub composites: [Node<Composite>; 2],
    pub optical: [Node<OpticalComposite>; 2],
    pub anomaly: Node<AnomalyStack>,
    pub ancillary: Node<Option<AncillaryLayers>>,
    pub flood: Node<FloodRaster>,
}

impl FloodPlan {
    pub fn build(params: Arc<PipelineParams>, catalog: Arc<dyn SceneCatalog>, config: &FloodMapperConfig) -> Self {
        let version = params.version;

        let scenes = WindowKind::ALL.map(|kind| {
            let query = SceneQuery::for_window(params.window(kind), params.aoi.clone(), &config.scene_filter);
            let catalog = Arc::clone(&catalog);
            Node::new(version, &format!("{} scenes", kind), move || {
                SceneFilter::select(catalog.as_ref(), &query)
            })
        });

        let composites = WindowKind::ALL.map(|kind| {
            let aoi = params.aoi.clone();
            scenes[kind.index()].map(&format!("{} composite", kind), move |collection| {
                CompositeBuilder::build(collection, &aoi, kind)
            })
        });

        let optical = WindowKind::ALL.map(|kind| {
            let query = OpticalQuery::new(params.window(kind), params.aoi.clone(), &config.optical);
            let compositor = OpticalCompositor::new(config.optical.clone());
            let catalog = Arc::clone(&catalog);
            Node::new(version, &format!("{} optical composite", kind), move || {
                let mut selected = catalog.query_optical(&query)?;
                selected.retain(|s| query.matches(s));
                selected.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));
                compositor.build(&selected, &query.aoi, kind)
            })
        });

        let engine = ZScoreEngine::new(ZScoreParams { mode: config.scene_filter.scoring_mode });
        let aoi = params.aoi.clone();
        let anomaly = scenes[0]
            .zip(&scenes[1], "scene pair")
            .map("z-score anomaly", move |(baseline, event)| engine.compute(baseline, event, &aoi));

        let aoi = params.aoi.clone();
        let ancillary_catalog = Arc::clone(&catalog);
        let ancillary = anomaly.map("ancillary layers", move |stack| {
            ancillary_catalog.ancillary(&aoi, stack.grid())
        });

        let classifier = FloodClassifier::new(params.thresholds);
        let aoi = params.aoi.clone();
        let flood = anomaly
            .zip(&ancillary, "anomaly with context")
            .map("flood classes", move |(stack, layers)| {
                let layers: &Option<AncillaryLayers> = layers;
                classifier.classify(stack.positional(), layers.as_ref(), &aoi)
            });

        Self {
            params,
            scenes,
            composites,
            optical,
            anomaly,
            ancillary,
            flood,
        }
    }

    pub fn version(&self) -> u64 {
        self.params.version
    }
}
