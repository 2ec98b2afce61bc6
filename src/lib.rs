//! sarflood: Sentinel-1 change-detection flood mapping
//!
//! Builds per-window radar composites, standardizes event backscatter against a
//! pre-event baseline, classifies flooded pixels and estimates the population living
//! under high-confidence flooding. Every derived layer is described lazily and tagged
//! with the parameter version it was computed from.

pub mod types;
pub mod params;
pub mod config;
pub mod io;
pub mod core;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    AcquisitionMode, CoordinateSystem, FloodError, FloodResult, MaskedRaster, OrbitPass, Polarization,
    RasterGrid, Sensor, Versioned, WindowKind,
};

pub use params::{AreaOfInterest, FloodThresholds, ParameterStore, PipelineParams, TimeWindow};
pub use config::FloodMapperConfig;

pub use io::{InMemoryCatalog, InMemoryPopulation, PopulationProvider, PopulationSource, SceneCatalog};

pub use self::core::{
    Composite, CompositeBuilder, ExposureAggregator, ExposureResult, FloodClass, FloodClassifier, FloodRaster,
    GridReducer, RegionReducer, SceneCollection, SceneFilter, SceneRecord, ZScoreEngine,
};

pub use pipeline::{FloodMapper, FloodPlan, ParameterChange};
