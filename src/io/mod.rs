//! Substrate access: imagery catalogs and population datasets

pub mod catalog;
pub mod population;

pub use catalog::{InMemoryCatalog, SceneCatalog};
pub use population::{default_sources, InMemoryPopulation, PopulationLayer, PopulationProvider, PopulationSource};
