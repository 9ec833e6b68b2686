//! # Configuration Management Module
//!
//! Persistent device settings stored in platform-appropriate locations.
//! Handles loading, saving, validating and providing defaults for every
//! tunable of the acquisition, estimation and transport stages.
//!
//! ## Sections
//! - `acquisition`: sampling rate and window duration
//! - `filter`: moving average width and rounding policy
//! - `peaks`: minimum peak distance and amplitude agreement threshold
//! - `vitals`: variance gate, calibration curve and BPM clamp
//! - `history`: number of readings averaged before publishing
//! - `transport`: advertising and characteristic publishing
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/pulse-ox/config.toml
//! - Linux: ~/.config/pulse-ox/config.toml
//! - Windows: %APPDATA%\pulse-ox\config.toml

use crate::error::ConfigError;
use crate::filter::RoundingPolicy;
use crate::server::PublishMode;
use crate::vitals::RatioOrder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub sample_rate_hz: u32,
    pub window_seconds: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 100,
            window_seconds: 5,
        }
    }
}

impl AcquisitionConfig {
    /// Number of samples in one acquisition window
    pub fn window_len(&self) -> usize {
        (self.sample_rate_hz as usize) * (self.window_seconds as usize)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.sample_rate_hz.max(1)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub width: usize,
    pub rounding: RoundingPolicy,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            width: 35,
            rounding: RoundingPolicy::Truncating,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    pub min_distance: usize,
    pub amplitude_threshold_pct: f64,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            min_distance: 40,
            amplitude_threshold_pct: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalsConfig {
    /// Exclusive lower bound of the accepted filtered IR variance
    pub variance_low: f64,
    /// Inclusive upper bound of the accepted filtered IR variance
    pub variance_high: f64,
    /// Apply the same band to the filtered RED channel. Off by default: the
    /// firmware gates IR only, although a stricter reading requires both
    /// channels to pass.
    pub gate_red_variance: bool,
    pub calibration_offset: f64,
    pub calibration_slope: f64,
    pub ratio_order: RatioOrder,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// IR AC time constant (seconds) below which no BPM is derived
    pub min_ir_ac: f64,
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            variance_low: 100.0,
            variance_high: 35000.0,
            gate_red_variance: false,
            calibration_offset: 110.0,
            calibration_slope: 25.0,
            ratio_order: RatioOrder::RedOverIr,
            min_bpm: 40.0,
            max_bpm: 200.0,
            min_ir_ac: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub window: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { window: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub device_name: String,
    pub advertising_interval_ms: u64,
    pub indicate_timeout_ms: u64,
    pub appearance: u16,
    pub publish: PublishMode,
    pub features: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            device_name: "PicoW_Oximeter".to_string(),
            advertising_interval_ms: 500,
            indicate_timeout_ms: 2000,
            appearance: crate::advertising::APPEARANCE_GENERIC_PULSE_OXIMETER,
            publish: PublishMode::Continuous,
            features: 0,
        }
    }
}

impl TransportConfig {
    pub fn advertising_interval(&self) -> Duration {
        Duration::from_millis(self.advertising_interval_ms)
    }

    pub fn indicate_timeout(&self) -> Duration {
        Duration::from_millis(self.indicate_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub acquisition: AcquisitionConfig,
    pub filter: FilterConfig,
    pub peaks: PeakConfig,
    pub vitals: VitalsConfig,
    pub history: HistoryConfig,
    pub transport: TransportConfig,
}

impl Config {
    /// Get the path to the default config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pulse-ox")
            .join("config.toml")
    }

    /// Load config from the default location, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, writing the defaults there if the file is missing
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, writing defaults", path.display());
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to the default location
    #[allow(dead_code)]
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    /// Reject settings that would make every acquisition cycle fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let len = self.acquisition.window_len();
        if len == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if self.filter.width == 0 || self.filter.width > len {
            return Err(ConfigError::InvalidWindowSize {
                width: self.filter.width,
                len,
            });
        }
        if self.history.window == 0 {
            return Err(ConfigError::Invalid(
                "history window must hold at least one reading".to_string(),
            ));
        }
        let v = &self.vitals;
        if !(v.variance_low < v.variance_high) {
            return Err(ConfigError::Invalid(format!(
                "variance band ({}, {}] is empty",
                v.variance_low, v.variance_high
            )));
        }
        if !(v.min_bpm > 0.0 && v.min_bpm <= v.max_bpm) {
            return Err(ConfigError::Invalid(format!(
                "BPM range [{}, {}] is invalid",
                v.min_bpm, v.max_bpm
            )));
        }
        if !(0.0..=100.0).contains(&self.peaks.amplitude_threshold_pct) {
            return Err(ConfigError::Invalid(format!(
                "amplitude threshold {}% is outside 0..=100",
                self.peaks.amplitude_threshold_pct
            )));
        }
        if self.transport.indicate_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "indicate timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.acquisition.window_len(), 500);
        assert_eq!(config.filter.width, 35);
        assert_eq!(config.filter.rounding, RoundingPolicy::Truncating);
        assert_eq!(config.peaks.min_distance, 40);
        assert_eq!(config.history.window, 4);
        assert_eq!(config.vitals.ratio_order, RatioOrder::RedOverIr);
        assert_eq!(config.transport.publish, PublishMode::Continuous);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = Config::default();
        config.filter.rounding = RoundingPolicy::Conventional;
        config.transport.publish = PublishMode::SpotCheck;

        let toml_str = toml::to_string(&config).expect("Failed to serialize");
        assert!(toml_str.contains("rounding = \"conventional\""));
        assert!(toml_str.contains("publish = \"spot_check\""));
    }

    #[test]
    fn test_partial_config_deserialization() {
        let toml_str = r#"
            [filter]
            width = 10

            [vitals]
            ratio_order = "ir_over_red"
            min_bpm = 80.0
        "#;

        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");
        assert_eq!(config.filter.width, 10);
        assert_eq!(config.filter.rounding, RoundingPolicy::Truncating);
        assert_eq!(config.vitals.ratio_order, RatioOrder::IrOverRed);
        assert_eq!(config.vitals.min_bpm, 80.0);
        assert_eq!(config.vitals.max_bpm, 200.0);
        assert_eq!(config.acquisition.sample_rate_hz, 100);
    }

    #[test]
    fn test_load_from_creates_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).expect("Failed to load config");
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.transport.device_name = "Bench".to_string();
        config.history.window = 8;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.transport.device_name, "Bench");
        assert_eq!(loaded.history.window, 8);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "filter = [").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::ParseFailed(_))
        ));
    }

    #[test]
    fn test_validate_filter_width() {
        let mut config = Config::default();
        config.filter.width = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWindowSize { width: 0, len: 500 })
        ));

        config.filter.width = 501;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWindowSize { width: 501, .. })
        ));
    }

    #[test]
    fn test_validate_empty_window() {
        let mut config = Config::default();
        config.acquisition.window_seconds = 0;
        assert!(matches!(config.validate(), Err(ConfigError::EmptyWindow)));
    }

    #[test]
    fn test_validate_bands() {
        let mut config = Config::default();
        config.vitals.variance_low = 40000.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.vitals.min_bpm = 250.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.history.window = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_sample_interval() {
        let config = AcquisitionConfig::default();
        assert_eq!(config.sample_interval(), Duration::from_millis(10));
    }
}
