//! Runtime configuration with the Global Flood Mapper defaults.

use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::reduce::ReductionMode;
use crate::io::population::{default_sources, PopulationSource};
use crate::params::{FloodThresholds, TimeWindow};
use crate::types::{AcquisitionMode, FloodError, FloodResult, Polarization};

/// Complete runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodMapperConfig {
    pub baseline_window: TimeWindow,
    pub event_window: TimeWindow,
    pub thresholds: FloodThresholds,
    pub scene_filter: SceneFilterConfig,
    pub optical: OpticalConfig,
    pub exposure: ExposureConfig,
    pub visualization: VisualizationParams,
    /// Quiet period before a burst of parameter changes triggers one recompute
    pub debounce_ms: u64,
}

impl Default for FloodMapperConfig {
    fn default() -> Self {
        Self {
            baseline_window: TimeWindow::new(default_date(2020, 5, 1), 60),
            event_window: TimeWindow::new(default_date(2020, 7, 20), 8),
            thresholds: FloodThresholds::default(),
            scene_filter: SceneFilterConfig::default(),
            optical: OpticalConfig::default(),
            exposure: ExposureConfig::default(),
            visualization: VisualizationParams::default(),
            debounce_ms: 300,
        }
    }
}

fn default_date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

/// Sentinel-1 scene selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneFilterConfig {
    pub required_polarizations: Vec<Polarization>,
    pub modes: Vec<AcquisitionMode>,
    pub resolution_meters: u32,
    /// Only this mode takes part in anomaly scoring
    pub scoring_mode: AcquisitionMode,
}

impl Default for SceneFilterConfig {
    fn default() -> Self {
        Self {
            required_polarizations: vec![Polarization::VV, Polarization::VH],
            modes: vec![AcquisitionMode::IW, AcquisitionMode::SM],
            resolution_meters: 10,
            scoring_mode: AcquisitionMode::IW,
        }
    }
}

/// Sentinel-2 composite for the optical map layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalConfig {
    /// Scenes at or above this cloudy-pixel share are dropped
    pub max_cloudy_pixel_percentage: f32,
    pub bands: Vec<String>,
    pub cloud_bit: u8,
    pub cirrus_bit: u8,
}

impl Default for OpticalConfig {
    fn default() -> Self {
        Self {
            max_cloudy_pixel_percentage: 70.0,
            bands: vec!["B4".to_string(), "B3".to_string(), "B2".to_string()],
            cloud_bit: 10,
            cirrus_bit: 11,
        }
    }
}

/// Population exposure reduction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    pub sources: Vec<PopulationSource>,
    pub max_pixels: u64,
    pub mode: ReductionMode,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            max_pixels: 10_000_000_000_000, // 1e13
            mode: ReductionMode::BestEffort,
        }
    }
}

/// Stretch and palette constants applied by the rendering collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationParams {
    /// Per-band minimum for the VH/VV/VH radar composite (dB)
    pub sar_min: [f32; 3],
    /// Per-band maximum for the VH/VV/VH radar composite (dB)
    pub sar_max: [f32; 3],
    pub optical_bands: Vec<String>,
    pub optical_max: f32,
    pub optical_gamma: f32,
    /// One colour per flood class, 0..=4
    pub flood_palette: Vec<String>,
    pub flood_legend: Vec<String>,
}

impl Default for VisualizationParams {
    fn default() -> Self {
        Self {
            sar_min: [-25.0, -20.0, -25.0],
            sar_max: [0.0, 10.0, 0.0],
            optical_bands: vec!["B4".to_string(), "B3".to_string(), "B2".to_string()],
            optical_max: 3048.0,
            optical_gamma: 1.0,
            flood_palette: ["#000000", "#fdae61", "#abd9e9", "#2c7bb6", "#ffffff"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            flood_legend: [
                "No flood",
                "Flood (VV)",
                "Flood (VH)",
                "Flood (VV and VH, high confidence)",
                "Permanent open water",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        }
    }
}

impl FloodMapperConfig {
    pub fn from_toml_str(text: &str) -> FloodResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| FloodError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> FloodResult<Self> {
        let path = path.as_ref();
        log::info!("Loading flood mapper configuration from {}", path.display());
        let text = std::fs::read_to_string(path)
            .map_err(|e| FloodError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> FloodResult<String> {
        toml::to_string_pretty(self).map_err(|e| FloodError::Config(e.to_string()))
    }

    pub fn validate(&self) -> FloodResult<()> {
        self.thresholds.validate()?;

        let filter = &self.scene_filter;
        if filter.resolution_meters == 0 {
            return Err(FloodError::Config("scene resolution must be positive".to_string()));
        }
        if filter.required_polarizations.is_empty() || filter.modes.is_empty() {
            return Err(FloodError::Config(
                "scene filter needs at least one polarization and one mode".to_string(),
            ));
        }
        if !filter.modes.contains(&filter.scoring_mode) {
            return Err(FloodError::Config(format!(
                "scoring mode {} is not among the selected modes",
                filter.scoring_mode
            )));
        }

        if !(0.0..=100.0).contains(&self.optical.max_cloudy_pixel_percentage) {
            return Err(FloodError::Config("cloudy pixel percentage outside 0..=100".to_string()));
        }
        if self.optical.cloud_bit > 15 || self.optical.cirrus_bit > 15 {
            return Err(FloodError::Config("QA bits must address a 16-bit band".to_string()));
        }

        let exposure = &self.exposure;
        if exposure.sources.is_empty() {
            return Err(FloodError::Config("no population sources configured".to_string()));
        }
        let mut names = HashSet::new();
        for source in &exposure.sources {
            if !names.insert(source.name.as_str()) {
                return Err(FloodError::Config(format!("duplicate population source '{}'", source.name)));
            }
            if let Some(scale) = source.native_scale {
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(FloodError::Config(format!(
                        "population source '{}' has invalid scale {}",
                        source.name, scale
                    )));
                }
            }
        }
        if exposure.max_pixels == 0 {
            return Err(FloodError::Config("max_pixels must be positive".to_string()));
        }

        let viz = &self.visualization;
        if viz.flood_palette.len() != 5 || viz.flood_legend.len() != 5 {
            return Err(FloodError::Config(
                "flood palette and legend need one entry per class (5)".to_string(),
            ));
        }
        if viz.optical_bands.len() != 3 {
            return Err(FloodError::Config("optical visualization needs 3 bands".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = FloodMapperConfig::default();
        config.validate().unwrap();
        assert_eq!(config.baseline_window.span_days, 60);
        assert_eq!(config.event_window.start, NaiveDate::from_ymd_opt(2020, 7, 20).unwrap());
        assert_eq!(config.thresholds.zvv_threshold, -3.0);
        assert_eq!(config.exposure.sources.len(), 3);
    }

    #[test]
    fn test_partial_toml_overrides_defaults() {
        let text = r#"
            debounce_ms = 50

            [event_window]
            start = "2021-08-01"
            span_days = 4

            [thresholds]
            zvh_threshold = -2.5

            [exposure]
            mode = "exact"
        "#;
        let config = FloodMapperConfig::from_toml_str(text).unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.event_window.span_days, 4);
        assert_eq!(config.thresholds.zvh_threshold, -2.5);
        assert_eq!(config.thresholds.zvv_threshold, -3.0);
        assert_eq!(config.exposure.mode, ReductionMode::Exact);
        assert_eq!(config.exposure.sources.len(), 3);
    }

    #[test]
    fn test_invalid_vote_percent_is_rejected() {
        let text = "[thresholds]\nconfidence_vote_percent = 150.0\n";
        assert!(matches!(FloodMapperConfig::from_toml_str(text), Err(FloodError::Config(_))));
    }

    #[test]
    fn test_round_trip_through_file() {
        let config = FloodMapperConfig::default();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes()).unwrap();

        let loaded = FloodMapperConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.visualization, config.visualization);
        assert_eq!(loaded.baseline_window, config.baseline_window);
    }
}
