//! Scene loading, parsing, and validation logic.
//!
//! A scene describes the arena a simulation runs in: the devices with their
//! starting positions and radio settings, static obstacles, the default
//! communication range and whether the arena routes around obstacles.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;

use crate::simulation::signal_calculations::{PathLossParameters, calculate_effective_distance};
use crate::simulation::types::{Obstacle, Position};

/// Error type for scene loading failures.
#[derive(Debug, thiserror::Error)]
pub enum SceneLoadError {
    #[error("Failed to read file: {0}")]
    FileReadError(String),
    #[error("Failed to parse JSON: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// A device as declared in the scene file.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSpec {
    pub device_id: u32,
    pub position: Position,
    /// Explicit communication range; wins over `radio_strength`.
    #[serde(default)]
    pub communication_range: Option<f64>,
    /// Transmit power in dBm, turned into a range with the path loss model.
    #[serde(default)]
    pub radio_strength: Option<f64>,
    /// Opt into routed distances when the arena routes.
    #[serde(default)]
    pub use_routes: bool,
    /// Tolerance window for approximate routed ranges.
    #[serde(default)]
    pub approximate_range: Option<f64>,
    /// Marks gradient sources.
    #[serde(default)]
    pub source: bool,
}

/// Root structure representing the entire scene.
#[derive(Debug, Clone, Deserialize)]
pub struct Scene {
    /// Range used by devices that declare neither a range nor a radio strength.
    pub communication_range: f64,
    /// Build a routing-capable arena.
    #[serde(default)]
    pub routing: bool,
    /// Required when any device declares `radio_strength`.
    #[serde(default)]
    pub path_loss_parameters: Option<PathLossParameters>,
    pub devices: Vec<DeviceSpec>,
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
}

impl Scene {
    /// Communication range of `device`: explicit, derived from radio strength, or the scene default.
    pub fn range_of(&self, device: &DeviceSpec) -> f64 {
        if let Some(range) = device.communication_range {
            return range;
        }
        match (device.radio_strength, &self.path_loss_parameters) {
            (Some(strength), Some(params)) => calculate_effective_distance(strength, params),
            _ => self.communication_range,
        }
    }
}

/// Load and parse a scene from a file.
pub fn load_scene(path: &str) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| SceneLoadError::FileReadError(e.to_string()))?;
    parse_scene(&data)
}

/// Parse and validate scene JSON.
pub fn parse_scene(data: &str) -> Result<Scene, SceneLoadError> {
    let scene: Scene = serde_json::from_str(data)
        .context("Invalid JSON format")
        .map_err(|e| SceneLoadError::ParseError(format!("{:#}", e)))?;
    validate_scene(&scene).map_err(SceneLoadError::ValidationError)?;
    Ok(scene)
}

/// Validate scene configuration.
///
/// Returns `Err(String)` with a description of the first problem found.
pub fn validate_scene(scene: &Scene) -> Result<(), String> {
    const MAX_WORLD_COORD: f64 = 10000.0;
    const MAX_DEVICES: usize = 10000;
    const MIN_RADIO_STRENGTH: f64 = -50.0;
    const MAX_RADIO_STRENGTH: f64 = 50.0;

    if scene.devices.is_empty() {
        return Err("Scene must contain at least one device".to_string());
    }
    if scene.devices.len() > MAX_DEVICES {
        return Err(format!("Device count {} exceeds maximum of {}", scene.devices.len(), MAX_DEVICES));
    }
    if !(scene.communication_range.is_finite() && scene.communication_range > 0.0) {
        return Err(format!("Invalid communication_range {}, must be positive", scene.communication_range));
    }

    let mut device_ids = HashSet::new();
    for device in &scene.devices {
        if !device_ids.insert(device.device_id) {
            return Err(format!("Duplicate device_id found: {}", device.device_id));
        }
    }

    for device in &scene.devices {
        let coordinates = device.position.coordinates();
        if coordinates.iter().any(|c| !c.is_finite() || c.abs() > MAX_WORLD_COORD) {
            return Err(format!("Device {} position {} exceeds world bounds (±{})", device.device_id, device.position, MAX_WORLD_COORD));
        }
        if let Some(range) = device.communication_range {
            if !(range.is_finite() && range > 0.0) {
                return Err(format!("Device {} has invalid communication_range {}", device.device_id, range));
            }
        }
        if let Some(strength) = device.radio_strength {
            if scene.path_loss_parameters.is_none() {
                return Err(format!("Device {} declares radio_strength but the scene has no 'path_loss_parameters'", device.device_id));
            }
            if !(MIN_RADIO_STRENGTH..=MAX_RADIO_STRENGTH).contains(&strength) {
                return Err(format!(
                    "Device {} radio_strength {} dBm outside realistic range ({} to {} dBm)",
                    device.device_id, strength, MIN_RADIO_STRENGTH, MAX_RADIO_STRENGTH
                ));
            }
        }
        if let Some(window) = device.approximate_range {
            if !(window.is_finite() && window >= 0.0) {
                return Err(format!("Device {} has invalid approximate_range {}, must be finite and non-negative", device.device_id, window));
            }
        }
    }

    if let Some(path_loss) = &scene.path_loss_parameters {
        if path_loss.path_loss_exponent <= 0.0 {
            return Err("Invalid path_loss_exponent, must be positive".to_string());
        }
    }

    for (idx, obstacle) in scene.obstacles.iter().enumerate() {
        match obstacle {
            Obstacle::Rectangle { position } => {
                if position.top_left.x >= position.bottom_right.x || position.top_left.y >= position.bottom_right.y {
                    return Err(format!(
                        "Obstacle {} (rectangle) has invalid geometry: top-left ({}, {}) must be strictly less than bottom-right ({}, {})",
                        idx, position.top_left.x, position.top_left.y, position.bottom_right.x, position.bottom_right.y
                    ));
                }
            }
            Obstacle::Circle { position } => {
                if !(position.radius > 0.0) {
                    return Err(format!("Obstacle {} (circle) has non-positive radius", idx));
                }
            }
        }
    }

    Ok(())
}
