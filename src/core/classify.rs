//! Flood classification from channel anomalies and ancillary context.
//!
//! Classes:
//! - 0: no flood
//! - 1: VV anomaly only
//! - 2: VH anomaly only
//! - 3: both VV and VH anomalous (high confidence)
//! - 4: permanent open water
//!
//! Channel candidacy is `z <= threshold`. The channel vote is `vv + 2 * vh`, so class 3
//! is reachable only when both thresholds are met. Permanent water (water-history
//! occurrence at or above the vote percentage) overrides to class 4. Candidates above the
//! elevation threshold or steeper than the slope threshold are reset to 0.

use ndarray::Array2;

use crate::core::terrain::slope_degrees;
use crate::params::{AreaOfInterest, FloodThresholds};
use crate::types::{FloodError, FloodResult, MaskedRaster, RasterGrid, ValidityMask};

/// Ordinal flood classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FloodClass {
    NoFlood = 0,
    VvOnly = 1,
    VhOnly = 2,
    HighConfidence = 3,
    PermanentWater = 4,
}

impl FloodClass {
    pub const COUNT: usize = 5;

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FloodClass::NoFlood),
            1 => Some(FloodClass::VvOnly),
            2 => Some(FloodClass::VhOnly),
            3 => Some(FloodClass::HighConfidence),
            4 => Some(FloodClass::PermanentWater),
            _ => None,
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Class value consumed by the exposure mask
pub const HIGH_CONFIDENCE_CLASS: u8 = FloodClass::HighConfidence as u8;

/// Categorical flood raster, masked outside the AOI and where inputs are missing
#[derive(Debug, Clone)]
pub struct FloodRaster {
    pub grid: RasterGrid,
    pub classes: Array2<u8>,
    pub valid: ValidityMask,
}

impl FloodRaster {
    pub fn class_at(&self, row: usize, col: usize) -> Option<FloodClass> {
        match self.valid.get((row, col)) {
            Some(true) => self.classes.get((row, col)).and_then(|c| FloodClass::from_u8(*c)),
            _ => None,
        }
    }

    /// `class == 3` on valid pixels
    pub fn high_confidence_mask(&self) -> ValidityMask {
        ndarray::Zip::from(&self.classes)
            .and(&self.valid)
            .map_collect(|&c, &ok| ok && c == HIGH_CONFIDENCE_CLASS)
    }

    /// Valid pixel count per class
    pub fn class_counts(&self) -> [usize; FloodClass::COUNT] {
        let mut counts = [0usize; FloodClass::COUNT];
        ndarray::Zip::from(&self.classes).and(&self.valid).for_each(|&c, &ok| {
            if ok && (c as usize) < FloodClass::COUNT {
                counts[c as usize] += 1;
            }
        });
        counts
    }

    pub fn masked_count(&self) -> usize {
        self.valid.iter().filter(|v| !**v).count()
    }
}

/// Optional context layers on the anomaly grid
#[derive(Debug, Clone, Default)]
pub struct AncillaryLayers {
    /// Share of valid water-history observations that saw water (0..=100). Pixels with no
    /// valid history are masked and stay masked in the output.
    pub water_occurrence: Option<MaskedRaster>,
    /// Elevation in meters
    pub elevation: Option<MaskedRaster>,
    /// Slope in degrees; derived from `elevation` when absent
    pub slope: Option<MaskedRaster>,
}

impl AncillaryLayers {
    pub fn resolved_slope(&self) -> FloodResult<Option<MaskedRaster>> {
        match (&self.slope, &self.elevation) {
            (Some(slope), _) => Ok(Some(slope.clone())),
            (None, Some(dem)) => slope_degrees(dem).map(Some),
            (None, None) => Ok(None),
        }
    }
}

/// Flood classifier
pub struct FloodClassifier {
    thresholds: FloodThresholds,
}

impl FloodClassifier {
    pub fn new(thresholds: FloodThresholds) -> Self {
        Self { thresholds }
    }

    pub fn standard() -> Self {
        Self::new(FloodThresholds::default())
    }

    pub fn thresholds(&self) -> &FloodThresholds {
        &self.thresholds
    }

    /// Channel vote alone
    pub fn vote(&self, zvv: f32, zvh: f32) -> FloodClass {
        let vv = zvv <= self.thresholds.zvv_threshold;
        let vh = zvh <= self.thresholds.zvh_threshold;
        match (vv, vh) {
            (true, true) => FloodClass::HighConfidence,
            (false, true) => FloodClass::VhOnly,
            (true, false) => FloodClass::VvOnly,
            (false, false) => FloodClass::NoFlood,
        }
    }

    /// Classify a positional anomaly stack.
    ///
    /// `bands` follows the composite band order: index 0 is VH, index 1 is VV and index 2
    /// repeats VH. Only the grid of index 2 is checked.
    pub fn classify(
        &self,
        bands: [&MaskedRaster; 3],
        ancillary: Option<&AncillaryLayers>,
        aoi: &AreaOfInterest,
    ) -> FloodResult<FloodRaster> {
        let [vh, vv, vh_repeat] = bands;
        let grid = vv.grid.clone();
        grid.ensure_aligned(&vh.grid, "VH anomaly")?;
        grid.ensure_aligned(&vh_repeat.grid, "third positional band")?;

        let water = ancillary.and_then(|a| a.water_occurrence.as_ref());
        let elevation = ancillary.and_then(|a| a.elevation.as_ref());
        let slope = match ancillary.map(AncillaryLayers::resolved_slope) {
            Some(Ok(slope)) => slope,
            Some(Err(e)) => {
                log::warn!("Slope unavailable, skipping slope exclusion: {}", e);
                None
            }
            None => None,
        };
        for (layer, name) in [(water, "water occurrence"), (elevation, "elevation"), (slope.as_ref(), "slope")] {
            if let Some(layer) = layer {
                grid.ensure_aligned(&layer.grid, name)?;
            }
        }

        log::info!(
            "Classifying floods: zvv <= {}, zvh <= {}, permanent water >= {}%",
            self.thresholds.zvv_threshold,
            self.thresholds.zvh_threshold,
            self.thresholds.confidence_vote_percent
        );

        let aoi_mask = aoi.pixel_mask(&grid);
        let t = &self.thresholds;
        let mut classes = Array2::<u8>::zeros(grid.dim());
        let mut valid = Array2::from_elem(grid.dim(), false);

        for ((row, col), class_out) in classes.indexed_iter_mut() {
            if !aoi_mask[[row, col]] {
                continue;
            }
            let (Some(zvv), Some(zvh)) = (vv.get(row, col), vh.get(row, col)) else {
                continue;
            };

            let mut class = self.vote(zvv, zvh);
            if let Some(water) = water {
                match water.get(row, col) {
                    None => continue,
                    Some(share) if share >= t.confidence_vote_percent => class = FloodClass::PermanentWater,
                    Some(_) => {}
                }
            }
            if class < FloodClass::PermanentWater {
                let too_high = elevation
                    .and_then(|e| e.get(row, col))
                    .map_or(false, |e| e > t.elevation_threshold_m);
                let too_steep = slope
                    .as_ref()
                    .and_then(|s| s.get(row, col))
                    .map_or(false, |s| s > t.slope_threshold_deg);
                if too_high || too_steep {
                    class = FloodClass::NoFlood;
                }
            }

            *class_out = class.value();
            valid[[row, col]] = true;
        }

        let raster = FloodRaster { grid, classes, valid };
        let counts = raster.class_counts();
        log::info!(
            "Flood classes: none {}, VV {}, VH {}, high confidence {}, permanent water {}, masked {}",
            counts[0],
            counts[1],
            counts[2],
            counts[3],
            counts[4],
            raster.masked_count()
        );
        Ok(raster)
    }
}

impl Default for FloodClassifier {
    fn default() -> Self {
        Self::standard()
    }
}

/// Grid check shared with callers that assemble ancillary layers themselves
pub fn ensure_ancillary_grid(layers: &AncillaryLayers, grid: &RasterGrid) -> FloodResult<()> {
    let named = [
        (&layers.water_occurrence, "water occurrence"),
        (&layers.elevation, "elevation"),
        (&layers.slope, "slope"),
    ];
    for (layer, name) in named {
        if let Some(layer) = layer {
            if !grid.is_aligned_with(&layer.grid) {
                return Err(FloodError::GridMismatch(format!("{} layer is not on the anomaly grid", name)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> RasterGrid {
        RasterGrid::north_up(0.0, 30.0, 10.0, 3, 3)
    }

    fn aoi() -> AreaOfInterest {
        AreaOfInterest::from_bounds(0.0, 0.0, 30.0, 30.0).unwrap()
    }

    fn classify_constant(zvv: f32, zvh: f32, ancillary: Option<&AncillaryLayers>) -> FloodRaster {
        let vv = MaskedRaster::filled(grid(), zvv);
        let vh = MaskedRaster::filled(grid(), zvh);
        FloodClassifier::standard().classify([&vh, &vv, &vh], ancillary, &aoi()).unwrap()
    }

    #[test]
    fn test_channel_vote() {
        let c = FloodClassifier::standard();
        assert_eq!(c.vote(-4.0, -4.0), FloodClass::HighConfidence);
        assert_eq!(c.vote(-3.0, -3.0), FloodClass::HighConfidence);
        assert_eq!(c.vote(-4.0, -1.0), FloodClass::VvOnly);
        assert_eq!(c.vote(-1.0, -4.0), FloodClass::VhOnly);
        assert_eq!(c.vote(-1.0, -1.0), FloodClass::NoFlood);
        assert_eq!(c.vote(-2.99, -2.99), FloodClass::NoFlood);
    }

    #[test]
    fn test_small_elevation_raster_skips_slope_exclusion() {
        let small = RasterGrid::north_up(0.0, 20.0, 10.0, 2, 2);
        let mut dem = MaskedRaster::filled(small.clone(), 10.0);
        dem.values[[1, 1]] = 900.0;
        let ancillary = AncillaryLayers { elevation: Some(dem), ..Default::default() };
        let z = MaskedRaster::filled(small, -5.0);
        let raster = FloodClassifier::standard()
            .classify([&z, &z, &z], Some(&ancillary), &aoi())
            .unwrap();
        assert_eq!(raster.class_at(0, 0), Some(FloodClass::HighConfidence));
        // Elevation exclusion still applies
        assert_eq!(raster.class_at(1, 1), Some(FloodClass::NoFlood));
    }

    #[test]
    fn test_positional_contract_reads_vv_from_index_one() {
        let vv = MaskedRaster::filled(grid(), -5.0);
        let vh = MaskedRaster::filled(grid(), 0.0);
        let raster = FloodClassifier::standard().classify([&vh, &vv, &vh], None, &aoi()).unwrap();
        assert_eq!(raster.class_at(1, 1), Some(FloodClass::VvOnly));
    }

    #[test]
    fn test_masked_anomaly_is_no_data_not_no_flood() {
        let mut vv = MaskedRaster::filled(grid(), -5.0);
        vv.valid[[0, 0]] = false;
        let vh = MaskedRaster::filled(grid(), -5.0);
        let raster = FloodClassifier::standard().classify([&vh, &vv, &vh], None, &aoi()).unwrap();
        assert_eq!(raster.class_at(0, 0), None);
        assert_eq!(raster.class_at(0, 1), Some(FloodClass::HighConfidence));
        assert!(!raster.high_confidence_mask()[[0, 0]]);
    }

    #[test]
    fn test_permanent_water_and_history_mask() {
        let mut water = MaskedRaster::filled(grid(), 80.0);
        water.values[[1, 1]] = 40.0;
        water.valid[[2, 2]] = false;
        let ancillary = AncillaryLayers { water_occurrence: Some(water), ..Default::default() };
        let raster = classify_constant(-4.0, -4.0, Some(&ancillary));

        assert_eq!(raster.class_at(0, 0), Some(FloodClass::PermanentWater));
        assert_eq!(raster.class_at(1, 1), Some(FloodClass::HighConfidence));
        assert_eq!(raster.class_at(2, 2), None);
    }

    #[test]
    fn test_terrain_exclusion() {
        let mut elevation = MaskedRaster::filled(grid(), 100.0);
        elevation.values[[0, 0]] = 900.0;
        let mut slope = MaskedRaster::filled(grid(), 2.0);
        slope.values[[2, 2]] = 15.0;
        let ancillary = AncillaryLayers {
            water_occurrence: None,
            elevation: Some(elevation),
            slope: Some(slope),
        };
        let raster = classify_constant(-4.0, -4.0, Some(&ancillary));

        assert_eq!(raster.class_at(0, 0), Some(FloodClass::NoFlood));
        assert_eq!(raster.class_at(2, 2), Some(FloodClass::NoFlood));
        assert_eq!(raster.class_at(1, 1), Some(FloodClass::HighConfidence));
    }

    #[test]
    fn test_outside_aoi_is_masked() {
        let vv = MaskedRaster::filled(grid(), -4.0);
        let small = AreaOfInterest::from_bounds(0.0, 20.0, 10.0, 30.0).unwrap();
        let raster = FloodClassifier::standard().classify([&vv, &vv, &vv], None, &small).unwrap();
        assert_eq!(raster.class_counts()[3], 1);
        assert_eq!(raster.masked_count(), 8);
    }

    #[test]
    fn test_misaligned_ancillary_is_rejected() {
        let layers = AncillaryLayers {
            elevation: Some(MaskedRaster::filled(RasterGrid::north_up(0.0, 30.0, 30.0, 1, 1), 5.0)),
            ..Default::default()
        };
        assert!(ensure_ancillary_grid(&layers, &grid()).is_err());
        let vv = MaskedRaster::filled(grid(), -4.0);
        assert!(FloodClassifier::standard().classify([&vv, &vv, &vv], Some(&layers), &aoi()).is_err());
    }
}
