//! Session-level orchestration: parameter state, recomputes and published layers.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use geo::Polygon;

use crate::config::{FloodMapperConfig, VisualizationParams};
use crate::core::classify::FloodRaster;
use crate::core::composite::Composite;
use crate::core::optical::OpticalComposite;
use crate::core::exposure::{ExposureAggregator, ExposureResult};
use crate::core::reduce::{GridReducer, RegionReducer};
use crate::io::catalog::SceneCatalog;
use crate::io::population::{PopulationLayer, PopulationProvider};
use crate::params::{AreaOfInterest, FloodThresholds, ParameterStore, PipelineParams, TimeWindow};
use crate::pipeline::deferred::ResultSlot;
use crate::pipeline::events::ParameterChange;
use crate::pipeline::plan::FloodPlan;
use crate::types::{FloodError, FloodResult, Versioned, WindowKind};

type Published<T> = Result<Arc<T>, FloodError>;

/// What a recompute produced
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub version: u64,
    /// False when a newer recompute had already been requested
    pub published: bool,
    pub error: Option<FloodError>,
}

/// Flood mapping session over one catalog and population provider
pub struct FloodMapper {
    config: FloodMapperConfig,
    catalog: Arc<dyn SceneCatalog>,
    population: Arc<dyn PopulationProvider>,
    reducer: Arc<dyn RegionReducer>,
    params: Mutex<ParameterStore>,
    flood: ResultSlot<Published<FloodRaster>>,
    composites: [ResultSlot<Published<Composite>>; 2],
    optical: [ResultSlot<Published<OpticalComposite>>; 2],
}

impl FloodMapper {
    pub fn new(
        config: FloodMapperConfig,
        aoi: AreaOfInterest,
        catalog: Arc<dyn SceneCatalog>,
        population: Arc<dyn PopulationProvider>,
    ) -> FloodResult<Self> {
        config.validate()?;
        let store = ParameterStore::new(aoi, config.baseline_window, config.event_window, config.thresholds);
        log::info!(
            "Flood mapper ready: baseline {}, event {}",
            config.baseline_window,
            config.event_window
        );
        Ok(Self {
            config,
            catalog,
            population,
            reducer: Arc::new(GridReducer::new()),
            params: Mutex::new(store),
            flood: ResultSlot::new(),
            composites: [ResultSlot::new(), ResultSlot::new()],
            optical: [ResultSlot::new(), ResultSlot::new()],
        })
    }

    /// Replace the zonal reducer used for exposure
    pub fn with_reducer(mut self, reducer: Arc<dyn RegionReducer>) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn config(&self) -> &FloodMapperConfig {
        &self.config
    }

    pub fn visualization(&self) -> &VisualizationParams {
        &self.config.visualization
    }

    fn store(&self) -> MutexGuard<'_, ParameterStore> {
        self.params.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn params(&self) -> Arc<PipelineParams> {
        self.store().snapshot()
    }

    pub fn version(&self) -> u64 {
        self.store().version()
    }

    /// Validates the polygon before anything changes
    pub fn set_area_of_interest(&self, polygon: Polygon<f64>) -> FloodResult<u64> {
        let aoi = AreaOfInterest::new(polygon)?;
        Ok(self.store().set_area_of_interest(aoi))
    }

    /// `index` 0 is the baseline window, 1 the event window
    pub fn set_window(&self, index: usize, start: NaiveDate, span_days: u32) -> FloodResult<u64> {
        let kind = WindowKind::from_index(index)?;
        Ok(self.store().set_window(kind, TimeWindow::new(start, span_days)))
    }

    pub fn set_thresholds(&self, thresholds: FloodThresholds) -> FloodResult<u64> {
        self.store().set_thresholds(thresholds)
    }

    pub fn apply(&self, change: ParameterChange) -> FloodResult<u64> {
        match change {
            ParameterChange::AreaOfInterest(polygon) => self.set_area_of_interest(polygon),
            ParameterChange::Window { index, start, span_days } => self.set_window(index, start, span_days),
            ParameterChange::Thresholds(thresholds) => self.set_thresholds(thresholds),
        }
    }

    /// Deferred plan for the current parameters
    pub fn plan(&self) -> FloodPlan {
        FloodPlan::build(self.params(), Arc::clone(&self.catalog), &self.config)
    }

    /// Recompute every published layer for the current parameters
    pub async fn refresh(&self) -> RefreshOutcome {
        self.run_plan(self.plan()).await
    }

    /// Materialize `plan` and publish its layers unless a newer recompute was requested
    pub async fn run_plan(&self, plan: FloodPlan) -> RefreshOutcome {
        let version = plan.version();
        self.flood.submit(version);
        for slot in &self.composites {
            slot.submit(version);
        }
        for slot in &self.optical {
            slot.submit(version);
        }
        log::info!("Recomputing flood layers for parameters v{}", version);

        let (baseline, event, optical_baseline, optical_event, flood) = tokio::join!(
            plan.composites[0].materialize(),
            plan.composites[1].materialize(),
            plan.optical[0].materialize(),
            plan.optical[1].materialize(),
            plan.flood.materialize()
        );

        for (slot, result) in self.composites.iter().zip([baseline, event]) {
            slot.publish(Versioned { version, value: result.map(|v| v.value) });
        }
        for (slot, result) in self.optical.iter().zip([optical_baseline, optical_event]) {
            if let Err(e) = &result {
                log::debug!("Optical composite v{} unavailable: {}", version, e);
            }
            slot.publish(Versioned { version, value: result.map(|v| v.value) });
        }

        let error = flood.as_ref().err().cloned();
        let published = self.flood.publish(Versioned { version, value: flood.map(|v| v.value) });
        match (&error, published) {
            (Some(e), true) => log::warn!("Flood layer v{} failed: {}", version, e),
            (None, true) => log::info!("Published flood layer v{}", version),
            (_, false) => log::info!("Flood layer v{} superseded before publication", version),
        }

        RefreshOutcome { version, published, error }
    }

    /// Last published composite for a window
    pub fn composite(&self, kind: WindowKind) -> Option<Versioned<Published<Composite>>> {
        self.composites[kind.index()].latest()
    }

    /// Last published Sentinel-2 composite for a window
    pub fn optical_composite(&self, kind: WindowKind) -> Option<Versioned<Published<OpticalComposite>>> {
        self.optical[kind.index()].latest()
    }

    /// The flood layer for the current parameters.
    ///
    /// Fails with `LayerNotFound` until a recompute for the current version has been
    /// published.
    pub fn flood_raster(&self) -> FloodResult<Versioned<Arc<FloodRaster>>> {
        self.flood_raster_at(self.version())
    }

    fn flood_raster_at(&self, current: u64) -> FloodResult<Versioned<Arc<FloodRaster>>> {
        let latest = self
            .flood
            .latest()
            .ok_or_else(|| FloodError::LayerNotFound("flood layer has not been computed".to_string()))?;
        if latest.version != current {
            return Err(FloodError::LayerNotFound(format!(
                "flood layer v{} is stale, parameters are at v{}",
                latest.version, current
            )));
        }
        let raster = latest.value?;
        Ok(Versioned { version: latest.version, value: raster })
    }

    /// Population exposure under the current flood layer
    pub async fn compute_exposure(&self) -> FloodResult<Versioned<ExposureResult>> {
        let params = self.params();
        let flood = self.flood_raster_at(params.version)?;
        let population = Arc::clone(&self.population);
        let aggregator = self.aggregator();
        let sources = self.config.exposure.sources.clone();

        let raster = Arc::clone(&flood.value);
        let value = tokio::task::spawn_blocking(move || {
            let layers = sources
                .iter()
                .map(|source| population.load(source, &params.aoi))
                .collect::<FloodResult<Vec<PopulationLayer>>>()?;
            aggregator.compute(&raster, &params.aoi, &layers)
        })
        .await
        .map_err(|e| FloodError::Processing(format!("exposure task failed: {}", e)))??;

        Ok(Versioned { version: flood.version, value })
    }

    /// Exposure for an explicit flood raster and region, bypassing the published layer
    pub fn compute_exposure_for(&self, flood: &FloodRaster, aoi: &AreaOfInterest) -> FloodResult<ExposureResult> {
        let layers = self
            .config
            .exposure
            .sources
            .iter()
            .map(|source| self.population.load(source, aoi))
            .collect::<FloodResult<Vec<_>>>()?;
        self.aggregator().compute(flood, aoi, &layers)
    }

    fn aggregator(&self) -> ExposureAggregator {
        ExposureAggregator::new(
            Arc::clone(&self.reducer),
            self.config.exposure.max_pixels,
            self.config.exposure.mode,
        )
    }
}
