//! Core flood mapping modules

pub mod scene_filter;
pub mod composite;
pub mod optical;
pub mod zscore;
pub mod terrain;
pub mod classify;
pub mod reduce;
pub mod exposure;

// Re-export main types
pub use scene_filter::{AvailabilityCount, SceneCollection, SceneFilter, SceneQuery, SceneRecord};
pub use composite::{Composite, CompositeBuilder, COMPOSITE_BAND_ORDER};
pub use optical::{OpticalComposite, OpticalCompositor, OpticalQuery, OpticalScene};
pub use zscore::{AnomalyStack, BaselineStats, GroupKey, GroupSummary, ZScoreEngine, ZScoreParams, ZScoreRaster};
pub use terrain::slope_degrees;
pub use classify::{AncillaryLayers, FloodClass, FloodClassifier, FloodRaster, HIGH_CONFIDENCE_CLASS};
pub use reduce::{Exactness, GridReducer, Reducer, ReductionMode, ReductionOutcome, RegionReducer, WeightedRaster};
pub use exposure::{coverage_weights, ExposureAggregator, ExposureResult, PopulationEstimate};
