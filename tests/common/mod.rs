#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use ndarray::Array2;
use sarflood::core::optical::{OpticalQuery, OpticalScene};
use sarflood::core::scene_filter::{SceneQuery, SceneRecord};
use sarflood::io::{InMemoryCatalog, SceneCatalog};
use sarflood::params::rectangle;
use sarflood::types::{AcquisitionMode, FloodResult, MaskedRaster, OrbitPass, Polarization, RasterGrid};
use sarflood::AreaOfInterest;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 5, 30, 0).unwrap()
}

/// 10 x 10 grid of 10 m pixels covering (0, 0) - (100, 100)
pub fn grid() -> RasterGrid {
    RasterGrid::north_up(0.0, 100.0, 10.0, 10, 10)
}

pub fn aoi() -> AreaOfInterest {
    AreaOfInterest::from_bounds(0.0, 0.0, 100.0, 100.0).unwrap()
}

pub fn scene(id: &str, acquired: DateTime<Utc>, pass: OrbitPass, vv: MaskedRaster, vh: MaskedRaster) -> SceneRecord {
    let mut bands = HashMap::new();
    bands.insert(Polarization::VV, vv);
    bands.insert(Polarization::VH, vh);
    SceneRecord {
        id: id.to_string(),
        mode: AcquisitionMode::IW,
        pass,
        relative_orbit: 7,
        polarizations: vec![Polarization::VV, Polarization::VH],
        resolution_meters: 10,
        acquired,
        footprint: rectangle(-500.0, -500.0, 500.0, 500.0),
        bands,
    }
}

pub fn flat_scene(id: &str, acquired: DateTime<Utc>, db: f32) -> SceneRecord {
    scene(
        id,
        acquired,
        OrbitPass::Descending,
        MaskedRaster::filled(grid(), db),
        MaskedRaster::filled(grid(), db),
    )
}

/// Rows 2..5 and cols 2..5 at -16 dB, the rest at -11 dB
pub fn event_block() -> MaskedRaster {
    let values = Array2::from_shape_fn((10, 10), |(r, c)| {
        if (2..5).contains(&r) && (2..5).contains(&c) {
            -16.0
        } else {
            -11.0
        }
    });
    MaskedRaster::from_values(grid(), values).unwrap()
}

pub fn baseline_scenes() -> Vec<SceneRecord> {
    vec![
        flat_scene("S1_BASE_A", at(2020, 5, 5), -10.0),
        flat_scene("S1_BASE_B", at(2020, 5, 17), -12.0),
    ]
}

pub fn event_scene() -> SceneRecord {
    scene("S1_EVENT", at(2020, 7, 22), OrbitPass::Descending, event_block(), event_block())
}

/// Baseline mean -11 dB with unit deviation; the event block scores z = -5
pub fn flood_catalog() -> InMemoryCatalog {
    InMemoryCatalog::new().with_scenes(baseline_scenes()).with_scene(event_scene())
}

/// Catalog wrapper counting substrate queries
pub struct CountingCatalog {
    pub inner: InMemoryCatalog,
    pub queries: AtomicUsize,
}

impl CountingCatalog {
    pub fn new(inner: InMemoryCatalog) -> Self {
        Self { inner, queries: AtomicUsize::new(0) }
    }

    pub fn count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl SceneCatalog for CountingCatalog {
    fn query_scenes(&self, query: &SceneQuery) -> FloodResult<Vec<Arc<SceneRecord>>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query_scenes(query)
    }

    fn query_optical(&self, query: &OpticalQuery) -> FloodResult<Vec<Arc<OpticalScene>>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query_optical(query)
    }
}
