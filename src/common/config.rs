//! Simulator configuration loaded from TOML.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::field::context::DeviceSettings;
use crate::field::distance_cache::DEFAULT_CACHE_CAPACITY;

/// Step intervals a cached distance may stay idle when no idle time is configured.
pub const CACHE_IDLE_STEPS: f64 = 4.0;

/// Error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileReadError(String),
    #[error("Failed to parse config file: {0}")]
    ParseError(String),
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Aggregate program every device runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgramKind {
    /// Distance to the nearest source device.
    HopGradient,
    /// Spread of the largest random draw.
    MaxGossip,
}

/// Run parameters of a simulation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SimulatorConfig {
    /// Seed of the simulation-wide random generator.
    pub seed: u64,
    /// Number of rounds to run.
    pub steps: u32,
    /// Simulated time between two executions of the same device.
    pub step_interval: f64,
    /// Message retention window. `nan` keeps messages only while the sender is a neighbor.
    pub retention_time: f64,
    pub cache_capacity: usize,
    /// Defaults to `CACHE_IDLE_STEPS` step intervals.
    pub cache_idle_time: Option<f64>,
    pub program: ProgramKind,
    /// Standard deviation of the per-round random walk; no movement when unset.
    pub mobility_sigma: Option<f64>,
    /// Overrides the default log filter, e.g. "debug" or "fieldnet_simulator=trace".
    pub log_level: Option<String>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            seed: 0,
            steps: 20,
            step_interval: 1.0,
            retention_time: f64::NAN,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_idle_time: None,
            program: ProgramKind::HopGradient,
            mobility_sigma: None,
            log_level: None,
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from a TOML file.
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(config_path).map_err(|e| ConfigError::FileReadError(format!("{}: {}", config_path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: SimulatorConfig = toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate().map_err(ConfigError::ValidationError)?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if !(self.step_interval.is_finite() && self.step_interval > 0.0) {
            return Err(format!("step-interval must be positive, got {}", self.step_interval));
        }
        if self.retention_time < 0.0 {
            return Err(format!("retention-time must be non-negative or nan, got {}", self.retention_time));
        }
        if self.cache_capacity == 0 {
            return Err("cache-capacity must be at least 1".to_string());
        }
        if let Some(idle) = self.cache_idle_time {
            if !(idle >= 0.0) {
                return Err(format!("cache-idle-time must be non-negative, got {}", idle));
            }
        }
        if let Some(sigma) = self.mobility_sigma {
            if !(sigma.is_finite() && sigma >= 0.0) {
                return Err(format!("mobility-sigma must be non-negative, got {}", sigma));
            }
        }
        Ok(())
    }

    /// Per-device runtime parameters.
    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            retention_time: self.retention_time,
            cache_capacity: self.cache_capacity,
            cache_idle_time: self.cache_idle_time.unwrap_or(CACHE_IDLE_STEPS * self.step_interval),
        }
    }

    /// Derive the config path from a scene file path.
    ///
    /// Replaces the scene filename with "config.toml" in the same directory.
    pub fn config_path_from_scene(scene_path: &str) -> PathBuf {
        let scene = Path::new(scene_path);
        scene.parent().unwrap_or(Path::new(".")).join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = SimulatorConfig::parse("").unwrap();
        assert!(config.retention_time.is_nan());
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert_eq!(config.program, ProgramKind::HopGradient);
    }

    #[test]
    fn parses_nan_retention_and_program() {
        let config = SimulatorConfig::parse(
            r#"
            seed = 42
            steps = 5
            retention-time = nan
            program = "max-gossip"
            mobility-sigma = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.seed, 42);
        assert!(config.retention_time.is_nan());
        assert!(config.device_settings().retention_time.is_nan());
        assert_eq!(config.program, ProgramKind::MaxGossip);
        assert_eq!(config.mobility_sigma, Some(0.5));
    }

    #[test]
    fn idle_time_follows_step_interval_unless_set() {
        let derived = SimulatorConfig::parse("step-interval = 0.5").unwrap();
        assert_eq!(derived.device_settings().cache_idle_time, 2.0);
        let explicit = SimulatorConfig::parse("cache-idle-time = 10.0").unwrap();
        assert_eq!(explicit.device_settings().cache_idle_time, 10.0);
        assert!(matches!(SimulatorConfig::parse("cache-idle-time = -1.0"), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn negative_retention_is_rejected() {
        assert!(matches!(SimulatorConfig::parse("retention-time = -1.0"), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn zero_step_interval_is_rejected() {
        assert!(matches!(SimulatorConfig::parse("step-interval = 0.0"), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn unknown_program_is_a_parse_error() {
        assert!(matches!(SimulatorConfig::parse("program = \"flood\""), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn config_sits_next_to_scene() {
        assert_eq!(SimulatorConfig::config_path_from_scene("scenes/arena.json"), PathBuf::from("scenes/config.toml"));
    }
}
