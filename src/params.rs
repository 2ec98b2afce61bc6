//! Pipeline parameters: area of interest, time windows and classifier thresholds.
//!
//! Every recompute reads one immutable [`PipelineParams`] snapshot. Mutations go through
//! [`ParameterStore`], which hands out a new snapshot with a higher version each time.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{coord, Area, BoundingRect, Contains, Intersects, Line, LineString, Point, Polygon, Rect};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::types::{FloodError, FloodResult, RasterGrid, ValidityMask, WindowKind};

/// Polygonal area of interest, validated on construction
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    polygon: Polygon<f64>,
    bounds: Rect<f64>,
}

impl AreaOfInterest {
    pub fn new(polygon: Polygon<f64>) -> FloodResult<Self> {
        let exterior = polygon.exterior();
        // geo closes rings on construction, so a triangle carries four coordinates
        if exterior.0.len() < 4 {
            return Err(FloodError::InvalidGeometry(format!(
                "polygon exterior has {} coordinates, at least 3 distinct vertices are required",
                exterior.0.len()
            )));
        }

        let all_coords = exterior
            .coords()
            .chain(polygon.interiors().iter().flat_map(|ring| ring.coords()));
        if all_coords.into_iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(FloodError::InvalidGeometry(
                "polygon contains non-finite coordinates".to_string(),
            ));
        }

        if polygon.unsigned_area() <= 0.0 {
            return Err(FloodError::InvalidGeometry("polygon has zero area".to_string()));
        }

        if ring_self_intersects(exterior) || polygon.interiors().iter().any(ring_self_intersects) {
            return Err(FloodError::InvalidGeometry("polygon ring self-intersects".to_string()));
        }

        let bounds = polygon
            .bounding_rect()
            .ok_or_else(|| FloodError::InvalidGeometry("polygon has no extent".to_string()))?;

        Ok(Self { polygon, bounds })
    }

    /// Axis-aligned rectangle, the shape produced by the custom-AOI drawing tool
    pub fn from_bounds(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> FloodResult<Self> {
        let ring = LineString::from(vec![
            (min_x, min_y),
            (max_x, min_y),
            (max_x, max_y),
            (min_x, max_y),
            (min_x, min_y),
        ]);
        Self::new(Polygon::new(ring, vec![]))
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    pub fn bounds(&self) -> Rect<f64> {
        self.bounds
    }

    pub fn area(&self) -> f64 {
        self.polygon.unsigned_area()
    }

    pub fn intersects(&self, footprint: &Polygon<f64>) -> bool {
        self.polygon.intersects(footprint)
    }

    /// Strict interior containment; points on the boundary are outside
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        let (min, max) = (self.bounds.min(), self.bounds.max());
        if x < min.x || x > max.x || y < min.y || y > max.y {
            return false;
        }
        self.polygon.contains(&Point::new(x, y))
    }

    /// Pixels of `grid` whose centre lies inside the AOI
    pub fn pixel_mask(&self, grid: &RasterGrid) -> ValidityMask {
        Array2::from_shape_fn(grid.dim(), |(row, col)| {
            let (x, y) = grid.pixel_center(row, col);
            self.contains_point(x, y)
        })
    }
}

fn ring_self_intersects(ring: &LineString<f64>) -> bool {
    let segments: Vec<Line<f64>> = ring.lines().filter(|l| l.start != l.end).collect();
    let n = segments.len();
    if n < 3 {
        return true;
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if adjacent {
                // Neighbours share a vertex; only a fold-back overlap is an error
                if let Some(LineIntersection::Collinear { intersection }) =
                    line_intersection(segments[i], segments[j])
                {
                    if intersection.start != intersection.end {
                        return true;
                    }
                }
                continue;
            }
            if segments[i].intersects(&segments[j]) {
                return true;
            }
        }
    }
    false
}

/// A dated analysis window: `[start, start + span_days + 1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub span_days: u32,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, span_days: u32) -> Self {
        Self { start, span_days }
    }

    /// First day outside the window
    pub fn end_exclusive(&self) -> NaiveDate {
        self.start + Duration::days(i64::from(self.span_days) + 1)
    }

    /// Half-open UTC instant range covered by the window
    pub fn date_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let midnight = |date: NaiveDate| Utc.from_utc_datetime(&NaiveDateTime::new(date, NaiveTime::MIN));
        (midnight(self.start), midnight(self.end_exclusive()))
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        let (start, end) = self.date_range();
        *instant >= start && *instant < end
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} .. {} (+{} d)", self.start, self.end_exclusive(), self.span_days)
    }
}

/// Flood classifier parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodThresholds {
    /// VV anomaly at or below which a pixel is a VV candidate (sigma units)
    pub zvv_threshold: f32,
    /// VH anomaly at or below which a pixel is a VH candidate (sigma units)
    pub zvh_threshold: f32,
    /// Share of valid water-history observations (percent) at which a pixel counts as
    /// permanent open water
    pub confidence_vote_percent: f32,
    /// Candidates above this elevation are reset to no-flood (meters)
    pub elevation_threshold_m: f32,
    /// Candidates steeper than this are reset to no-flood (degrees)
    pub slope_threshold_deg: f32,
}

impl Default for FloodThresholds {
    fn default() -> Self {
        Self {
            zvv_threshold: -3.0,
            zvh_threshold: -3.0,
            confidence_vote_percent: 75.0,
            elevation_threshold_m: 800.0,
            slope_threshold_deg: 10.0,
        }
    }
}

impl FloodThresholds {
    pub fn validate(&self) -> FloodResult<()> {
        let finite = [
            self.zvv_threshold,
            self.zvh_threshold,
            self.confidence_vote_percent,
            self.elevation_threshold_m,
            self.slope_threshold_deg,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(FloodError::Config("thresholds must be finite".to_string()));
        }
        if !(0.0..=100.0).contains(&self.confidence_vote_percent) {
            return Err(FloodError::Config(format!(
                "confidence vote percent {} outside 0..=100",
                self.confidence_vote_percent
            )));
        }
        Ok(())
    }
}

/// Immutable parameter snapshot for one recompute
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineParams {
    pub version: u64,
    pub aoi: AreaOfInterest,
    pub windows: [TimeWindow; 2],
    pub thresholds: FloodThresholds,
}

impl PipelineParams {
    pub fn window(&self, kind: WindowKind) -> TimeWindow {
        self.windows[kind.index()]
    }
}

/// Owner of the current parameters; each mutation publishes a new versioned snapshot
#[derive(Debug, Clone)]
pub struct ParameterStore {
    current: Arc<PipelineParams>,
}

impl ParameterStore {
    pub fn new(aoi: AreaOfInterest, baseline: TimeWindow, event: TimeWindow, thresholds: FloodThresholds) -> Self {
        Self {
            current: Arc::new(PipelineParams {
                version: 1,
                aoi,
                windows: [baseline, event],
                thresholds,
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<PipelineParams> {
        Arc::clone(&self.current)
    }

    pub fn version(&self) -> u64 {
        self.current.version
    }

    pub fn set_area_of_interest(&mut self, aoi: AreaOfInterest) -> u64 {
        self.update(|p| p.aoi = aoi)
    }

    pub fn set_window(&mut self, kind: WindowKind, window: TimeWindow) -> u64 {
        self.update(|p| p.windows[kind.index()] = window)
    }

    pub fn set_thresholds(&mut self, thresholds: FloodThresholds) -> FloodResult<u64> {
        thresholds.validate()?;
        Ok(self.update(|p| p.thresholds = thresholds))
    }

    fn update(&mut self, apply: impl FnOnce(&mut PipelineParams)) -> u64 {
        let mut next = (*self.current).clone();
        apply(&mut next);
        next.version = self.current.version + 1;
        log::debug!("Pipeline parameters advanced to version {}", next.version);
        self.current = Arc::new(next);
        self.current.version
    }
}

/// Polygon helper for rectangular footprints
pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            coord! { x: min_x, y: min_y },
            coord! { x: max_x, y: min_y },
            coord! { x: max_x, y: max_y },
            coord! { x: min_x, y: max_y },
            coord! { x: min_x, y: min_y },
        ]),
        vec![],
    )
}
