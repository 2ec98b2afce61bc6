use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use geo::Polygon;

use crate::config::SceneFilterConfig;
use crate::io::catalog::SceneCatalog;
use crate::params::{AreaOfInterest, TimeWindow};
use crate::types::{AcquisitionMode, FloodError, FloodResult, MaskedRaster, OrbitPass, Polarization};

/// One Sentinel-1 GRD scene as delivered by the substrate (backscatter in dB)
#[derive(Debug, Clone)]
pub struct SceneRecord {
    pub id: String,
    pub mode: AcquisitionMode,
    pub pass: OrbitPass,
    pub relative_orbit: u32,
    pub polarizations: Vec<Polarization>,
    pub resolution_meters: u32,
    pub acquired: DateTime<Utc>,
    pub footprint: Polygon<f64>,
    pub bands: HashMap<Polarization, MaskedRaster>,
}

impl SceneRecord {
    pub fn has_channels(&self, required: &[Polarization]) -> bool {
        required.iter().all(|p| self.polarizations.contains(p))
    }

    pub fn band(&self, polarization: Polarization) -> FloodResult<&MaskedRaster> {
        self.bands.get(&polarization).ok_or_else(|| {
            FloodError::Substrate(format!("scene {} has no {} pixels", self.id, polarization))
        })
    }
}

/// Daily acquisition counts, split by orbit direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvailabilityCount {
    pub ascending: usize,
    pub descending: usize,
}

/// Ordered scene set. Records are shared, never copied.
#[derive(Debug, Clone, Default)]
pub struct SceneCollection {
    scenes: Vec<Arc<SceneRecord>>,
}

impl SceneCollection {
    pub fn new(scenes: Vec<SceneRecord>) -> Self {
        Self::from_shared(scenes.into_iter().map(Arc::new).collect())
    }

    pub fn from_shared(scenes: Vec<Arc<SceneRecord>>) -> Self {
        Self { scenes }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SceneRecord>> {
        self.scenes.iter()
    }

    pub fn filter_mode(&self, mode: AcquisitionMode) -> SceneCollection {
        Self::from_shared(self.scenes.iter().filter(|s| s.mode == mode).cloned().collect())
    }

    /// Acquisitions per day, the series behind the availability chart
    pub fn availability(&self) -> BTreeMap<NaiveDate, AvailabilityCount> {
        let mut series: BTreeMap<NaiveDate, AvailabilityCount> = BTreeMap::new();
        for scene in &self.scenes {
            let entry = series.entry(scene.acquired.date_naive()).or_default();
            match scene.pass {
                OrbitPass::Ascending => entry.ascending += 1,
                OrbitPass::Descending => entry.descending += 1,
            }
        }
        series
    }
}

/// Metadata predicate handed to the substrate
#[derive(Debug, Clone)]
pub struct SceneQuery {
    pub window: TimeWindow,
    pub aoi: AreaOfInterest,
    pub required_polarizations: Vec<Polarization>,
    pub modes: Vec<AcquisitionMode>,
    pub resolution_meters: u32,
}

impl SceneQuery {
    pub fn for_window(window: TimeWindow, aoi: AreaOfInterest, config: &SceneFilterConfig) -> Self {
        Self {
            window,
            aoi,
            required_polarizations: config.required_polarizations.clone(),
            modes: config.modes.clone(),
            resolution_meters: config.resolution_meters,
        }
    }

    pub fn matches(&self, scene: &SceneRecord) -> bool {
        scene.has_channels(&self.required_polarizations)
            && self.modes.contains(&scene.mode)
            && scene.resolution_meters == self.resolution_meters
            && self.window.contains(&scene.acquired)
            && self.aoi.intersects(&scene.footprint)
    }
}

/// Scene selection over a catalog
pub struct SceneFilter;

impl SceneFilter {
    /// Query the catalog and keep only scenes satisfying every predicate of `query`,
    /// ordered by acquisition time then id. No match is an empty collection, not an error.
    pub fn select(catalog: &dyn SceneCatalog, query: &SceneQuery) -> FloodResult<SceneCollection> {
        let returned = catalog.query_scenes(query)?;
        let returned_count = returned.len();

        let mut scenes: Vec<Arc<SceneRecord>> = returned.iter().filter(|s| query.matches(s)).cloned().collect();
        scenes.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));

        if scenes.len() != returned_count {
            log::warn!(
                "Catalog returned {} scenes outside the query, discarded",
                returned_count - scenes.len()
            );
        }
        log::info!("Selected {} Sentinel-1 scenes for {}", scenes.len(), query.window);

        Ok(SceneCollection::from_shared(scenes))
    }

    /// Same predicate applied to an in-hand collection
    pub fn filter(collection: &SceneCollection, query: &SceneQuery) -> SceneCollection {
        let mut scenes: Vec<Arc<SceneRecord>> = collection.iter().filter(|s| query.matches(s)).cloned().collect();
        scenes.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));
        SceneCollection::from_shared(scenes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::rectangle;
    use crate::types::RasterGrid;
    use chrono::TimeZone;

    fn scene(id: &str, day: u32, mode: AcquisitionMode, pols: &[Polarization], footprint: Polygon<f64>) -> SceneRecord {
        let grid = RasterGrid::north_up(0.0, 100.0, 10.0, 10, 10);
        SceneRecord {
            id: id.to_string(),
            mode,
            pass: OrbitPass::Ascending,
            relative_orbit: 12,
            polarizations: pols.to_vec(),
            resolution_meters: 10,
            acquired: Utc.with_ymd_and_hms(2020, 7, day, 0, 30, 0).unwrap(),
            footprint,
            bands: pols.iter().map(|p| (*p, MaskedRaster::filled(grid.clone(), -12.0))).collect(),
        }
    }

    fn query() -> SceneQuery {
        SceneQuery::for_window(
            TimeWindow::new(NaiveDate::from_ymd_opt(2020, 7, 20).unwrap(), 8),
            AreaOfInterest::from_bounds(0.0, 0.0, 100.0, 100.0).unwrap(),
            &SceneFilterConfig::default(),
        )
    }

    #[test]
    fn test_predicates() {
        let dual = [Polarization::VV, Polarization::VH];
        let inside = rectangle(-50.0, -50.0, 50.0, 50.0);
        let q = query();

        assert!(q.matches(&scene("ok", 22, AcquisitionMode::IW, &dual, inside.clone())));
        assert!(q.matches(&scene("sm", 22, AcquisitionMode::SM, &dual, inside.clone())));
        assert!(!q.matches(&scene("ew", 22, AcquisitionMode::EW, &dual, inside.clone())));
        assert!(!q.matches(&scene("single", 22, AcquisitionMode::IW, &[Polarization::VV], inside.clone())));
        assert!(!q.matches(&scene("late", 29, AcquisitionMode::IW, &dual, inside.clone())));
        assert!(!q.matches(&scene("far", 22, AcquisitionMode::IW, &dual, rectangle(500.0, 500.0, 600.0, 600.0))));

        let mut coarse = scene("coarse", 22, AcquisitionMode::IW, &dual, inside);
        coarse.resolution_meters = 25;
        assert!(!q.matches(&coarse));
    }

    #[test]
    fn test_filter_orders_by_time() {
        let dual = [Polarization::VV, Polarization::VH];
        let fp = rectangle(0.0, 0.0, 100.0, 100.0);
        let collection = SceneCollection::new(vec![
            scene("b", 25, AcquisitionMode::IW, &dual, fp.clone()),
            scene("a", 21, AcquisitionMode::IW, &dual, fp.clone()),
            scene("c", 10, AcquisitionMode::IW, &dual, fp),
        ]);
        let selected = SceneFilter::filter(&collection, &query());
        let ids: Vec<&str> = selected.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_availability_counts_by_day() {
        let dual = [Polarization::VV, Polarization::VH];
        let fp = rectangle(0.0, 0.0, 100.0, 100.0);
        let mut desc = scene("d", 21, AcquisitionMode::IW, &dual, fp.clone());
        desc.pass = OrbitPass::Descending;
        let collection = SceneCollection::new(vec![
            scene("a", 21, AcquisitionMode::IW, &dual, fp.clone()),
            desc,
            scene("b", 23, AcquisitionMode::IW, &dual, fp),
        ]);

        let series = collection.availability();
        assert_eq!(series.len(), 2);
        let day = NaiveDate::from_ymd_opt(2020, 7, 21).unwrap();
        assert_eq!(series[&day], AvailabilityCount { ascending: 1, descending: 1 });
    }
}
