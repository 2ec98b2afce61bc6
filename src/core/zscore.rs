//! Standardized backscatter anomaly between an event window and a baseline window.
//!
//! Scenes are grouped by acquisition mode and orbit pass. Within a group the baseline
//! gives a per-pixel mean and standard deviation, and every event scene is expressed in
//! standard-deviation units against it. Group anomalies are ordered by their first event
//! acquisition and averaged, so one noisy orbit group cannot dominate the estimate.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::Array2;

use crate::core::composite::temporal_mean;
use crate::core::scene_filter::{SceneCollection, SceneRecord};
use crate::params::AreaOfInterest;
use crate::types::{
    AcquisitionMode, FloodError, FloodResult, MaskedRaster, OrbitPass, Polarization, RasterGrid, Sensor,
    ValidityMask, WindowKind,
};

/// Deviations at or below this fraction of max(1, |mean|) are treated as zero
pub const DEGENERATE_STD_TOLERANCE: f64 = 1e-6;

/// Per-pixel baseline distribution of one channel
#[derive(Debug, Clone)]
pub struct BaselineStats {
    pub mean: MaskedRaster,
    /// Population standard deviation; masked where zero or undefined
    pub std_dev: MaskedRaster,
    pub scene_count: usize,
}

impl BaselineStats {
    pub fn from_rasters(rasters: &[&MaskedRaster], grid: &RasterGrid) -> FloodResult<Self> {
        let mean = temporal_mean(rasters, grid)?;

        let mut sq_sum = Array2::<f64>::zeros(grid.dim());
        let mut count = Array2::<u32>::zeros(grid.dim());
        for raster in rasters {
            for ((row, col), n) in count.indexed_iter_mut() {
                if let (Some(v), Some(m)) = (raster.get(row, col), mean.get(row, col)) {
                    let d = f64::from(v) - f64::from(m);
                    sq_sum[[row, col]] += d * d;
                    *n += 1;
                }
            }
        }

        let std = Array2::from_shape_fn(grid.dim(), |(row, col)| {
            let n = count[[row, col]];
            let m = mean.get(row, col)?;
            if n == 0 {
                return None;
            }
            let sd = (sq_sum[[row, col]] / f64::from(n)).sqrt();
            let tolerance = DEGENERATE_STD_TOLERANCE * f64::from(m.abs()).max(1.0);
            (sd.is_finite() && sd > tolerance).then_some(sd as f32)
        });

        Ok(Self {
            mean,
            std_dev: MaskedRaster::from_options(grid.clone(), std)?,
            scene_count: rasters.len(),
        })
    }

    /// True where the mean is defined but the deviation was masked as zero or undefined
    pub fn degenerate_mask(&self) -> ValidityMask {
        ndarray::Zip::from(&self.mean.valid)
            .and(&self.std_dev.valid)
            .map_collect(|&has_mean, &has_std| has_mean && !has_std)
    }

    /// `(value - mean) / std`, masked wherever any input is masked
    pub fn standardize(&self, observed: &MaskedRaster) -> FloodResult<MaskedRaster> {
        self.mean.grid.ensure_aligned(&observed.grid, "standardize")?;
        let z = Array2::from_shape_fn(observed.dim(), |(row, col)| {
            let x = observed.get(row, col)?;
            let m = self.mean.get(row, col)?;
            let s = self.std_dev.get(row, col)?;
            Some((x - m) / s)
        });
        MaskedRaster::from_options(observed.grid.clone(), z)
    }
}

/// Anomaly raster for one channel
#[derive(Debug, Clone)]
pub struct ZScoreRaster {
    pub polarization: Polarization,
    pub raster: MaskedRaster,
    /// AOI pixels left masked because a baseline deviation was zero or undefined
    pub degenerate_pixels: usize,
}

/// Identity of one acquisition-mode / orbit group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey {
    pub mode: AcquisitionMode,
    pub pass: OrbitPass,
}

/// Bookkeeping for one group that contributed to the anomaly
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub key: GroupKey,
    pub first_event: DateTime<Utc>,
    pub baseline_scenes: usize,
    pub event_scenes: usize,
}

/// Mean-of-groups anomaly for both channels
#[derive(Debug, Clone)]
pub struct AnomalyStack {
    pub vv: ZScoreRaster,
    pub vh: ZScoreRaster,
    /// Contributing groups in time order
    pub groups: Vec<GroupSummary>,
}

impl AnomalyStack {
    /// The classifier's positional input, in composite band order (VH, VV, VH)
    pub fn positional(&self) -> [&MaskedRaster; 3] {
        [&self.vh.raster, &self.vv.raster, &self.vh.raster]
    }

    pub fn grid(&self) -> &RasterGrid {
        &self.vv.raster.grid
    }
}

/// Z-score parameters
#[derive(Debug, Clone)]
pub struct ZScoreParams {
    /// Acquisition mode taking part in scoring
    pub mode: AcquisitionMode,
}

impl Default for ZScoreParams {
    fn default() -> Self {
        Self { mode: AcquisitionMode::IW }
    }
}

/// Anomaly engine
pub struct ZScoreEngine {
    params: ZScoreParams,
}

struct GroupAnomaly {
    summary: GroupSummary,
    vv: MaskedRaster,
    vh: MaskedRaster,
    vv_degenerate: ValidityMask,
    vh_degenerate: ValidityMask,
}

impl ZScoreEngine {
    pub fn new(params: ZScoreParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(ZScoreParams::default())
    }

    pub fn compute(
        &self,
        baseline: &SceneCollection,
        event: &SceneCollection,
        aoi: &AreaOfInterest,
    ) -> FloodResult<AnomalyStack> {
        let mode = self.params.mode;
        let baseline = baseline.filter_mode(mode);
        let event = event.filter_mode(mode);
        log::info!(
            "Computing {} z-scores: {} baseline scenes, {} event scenes",
            mode,
            baseline.len(),
            event.len()
        );

        if baseline.is_empty() {
            return Err(FloodError::EmptyCollection { window: WindowKind::Baseline, sensor: Sensor::Sentinel1 });
        }
        if event.is_empty() {
            return Err(FloodError::EmptyCollection { window: WindowKind::Event, sensor: Sensor::Sentinel1 });
        }

        let mut groups: BTreeMap<GroupKey, (Vec<Arc<SceneRecord>>, Vec<Arc<SceneRecord>>)> = BTreeMap::new();
        for scene in baseline.iter() {
            groups.entry(group_key(scene)).or_default().0.push(Arc::clone(scene));
        }
        for scene in event.iter() {
            groups.entry(group_key(scene)).or_default().1.push(Arc::clone(scene));
        }

        let mut series = Vec::new();
        for (key, (pre, post)) in &groups {
            if pre.is_empty() || post.is_empty() {
                log::debug!(
                    "Skipping {} {} group: {} baseline / {} event scenes",
                    key.mode,
                    key.pass,
                    pre.len(),
                    post.len()
                );
                continue;
            }
            series.push(Self::group_anomaly(*key, pre, post)?);
        }

        if series.is_empty() {
            // Event scenes exist but no orbit group has a baseline to compare against
            return Err(FloodError::EmptyCollection { window: WindowKind::Baseline, sensor: Sensor::Sentinel1 });
        }
        series.sort_by(|a, b| a.summary.first_event.cmp(&b.summary.first_event));

        let grid = series[0].vv.grid.clone();
        let aoi_mask = aoi.pixel_mask(&grid);
        let vv_groups: Vec<&MaskedRaster> = series.iter().map(|g| &g.vv).collect();
        let vh_groups: Vec<&MaskedRaster> = series.iter().map(|g| &g.vh).collect();
        let vv = temporal_mean(&vv_groups, &grid)?.clip(&aoi_mask)?;
        let vh = temporal_mean(&vh_groups, &grid)?.clip(&aoi_mask)?;

        let vv = ZScoreRaster {
            polarization: Polarization::VV,
            degenerate_pixels: degenerate_count(series.iter().map(|g| &g.vv_degenerate), &vv, &aoi_mask),
            raster: vv,
        };
        let vh = ZScoreRaster {
            polarization: Polarization::VH,
            degenerate_pixels: degenerate_count(series.iter().map(|g| &g.vh_degenerate), &vh, &aoi_mask),
            raster: vh,
        };

        let aoi_pixels = aoi_mask.iter().filter(|v| **v).count();
        if vv.raster.valid_count() == 0 && vh.raster.valid_count() == 0 {
            return Err(FloodError::DegenerateStatistics {
                masked: aoi_pixels,
                total: aoi_pixels,
            });
        }
        if vv.degenerate_pixels > 0 || vh.degenerate_pixels > 0 {
            log::warn!(
                "Masked pixels with zero baseline deviation: VV {}, VH {} (of {} in AOI)",
                vv.degenerate_pixels,
                vh.degenerate_pixels,
                aoi_pixels
            );
        }

        Ok(AnomalyStack {
            vv,
            vh,
            groups: series.into_iter().map(|g| g.summary).collect(),
        })
    }

    fn group_anomaly(key: GroupKey, pre: &[Arc<SceneRecord>], post: &[Arc<SceneRecord>]) -> FloodResult<GroupAnomaly> {
        let grid = pre[0].band(Polarization::VV)?.grid.clone();
        let mut channels = Vec::with_capacity(2);
        for pol in [Polarization::VV, Polarization::VH] {
            let base: Vec<&MaskedRaster> = pre.iter().map(|s| s.band(pol)).collect::<FloodResult<_>>()?;
            let stats = BaselineStats::from_rasters(&base, &grid)?;
            let z_scenes = post
                .iter()
                .map(|s| stats.standardize(s.band(pol)?))
                .collect::<FloodResult<Vec<_>>>()?;
            let z_refs: Vec<&MaskedRaster> = z_scenes.iter().collect();
            channels.push((temporal_mean(&z_refs, &grid)?, stats.degenerate_mask()));
        }

        let first_event = post
            .iter()
            .map(|s| s.acquired)
            .min()
            .ok_or(FloodError::EmptyCollection { window: WindowKind::Event, sensor: Sensor::Sentinel1 })?;
        log::debug!(
            "{} {} group: {} baseline, {} event scenes, first event {}",
            key.mode,
            key.pass,
            pre.len(),
            post.len(),
            first_event
        );

        let (vh, vh_degenerate) =
            channels.pop().ok_or_else(|| FloodError::Processing("missing VH anomaly".to_string()))?;
        let (vv, vv_degenerate) =
            channels.pop().ok_or_else(|| FloodError::Processing("missing VV anomaly".to_string()))?;
        Ok(GroupAnomaly {
            summary: GroupSummary {
                key,
                first_event,
                baseline_scenes: pre.len(),
                event_scenes: post.len(),
            },
            vv,
            vh,
            vv_degenerate,
            vh_degenerate,
        })
    }
}

/// AOI pixels left masked in `anomaly` where some group had a mean but no usable deviation
fn degenerate_count<'a>(
    group_masks: impl Iterator<Item = &'a ValidityMask>,
    anomaly: &MaskedRaster,
    aoi_mask: &ValidityMask,
) -> usize {
    let mut degenerate = Array2::from_elem(aoi_mask.dim(), false);
    for mask in group_masks {
        degenerate.zip_mut_with(mask, |d, m| *d |= *m);
    }
    ndarray::Zip::from(&degenerate)
        .and(aoi_mask)
        .and(&anomaly.valid)
        .fold(0, |n, &d, &inside, &valid| if d && inside && !valid { n + 1 } else { n })
}

fn group_key(scene: &SceneRecord) -> GroupKey {
    GroupKey { mode: scene.mode, pass: scene.pass }
}
