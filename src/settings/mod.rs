use std::collections::HashMap;
use std::f64::consts::PI;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::targets::Side;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmMode {
    Active,
    Passive,
}

/// Axis-aligned box the target positions are clamped into, in meters.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TargetBounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
}

impl Default for TargetBounds {
    fn default() -> Self {
        TargetBounds {
            x_min: -0.4,
            x_max: 0.4,
            y_min: -0.4,
            y_max: 0.4,
            z_min: 0.8,
            z_max: 1.4,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct GripperRange {
    pub closed: f64,
    pub open: f64,
    pub home: f64,
}

impl Default for GripperRange {
    fn default() -> Self {
        GripperRange {
            closed: 0.002,
            open: 0.037,
            home: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CollisionSettings {
    pub minimum_distance: f64,
    pub detection_distance: f64,
    pub gain: f64,
}

impl Default for CollisionSettings {
    fn default() -> Self {
        CollisionSettings {
            minimum_distance: 0.05,
            detection_distance: 0.1,
            gain: 0.5,
        }
    }
}

/// Controller configuration. `Default` reproduces the reference setup:
/// 200 Hz, 20 solver iterations, 0.01 m input step, pi rad/s arm joints,
/// left arm driven, right arm passive.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TeleopSettings {
    pub frequency: f64,
    pub max_iters: usize,
    pub pos_threshold: f64,
    pub ori_threshold: f64,
    pub damping: f64,
    pub delta: f64,
    pub input_queue: usize,
    pub bounds: TargetBounds,
    pub gripper: GripperRange,
    pub collision: CollisionSettings,
    pub couple_gripper_to_scroll: bool,
    pub driven_arm: Side,
    pub left_mode: ArmMode,
    pub right_mode: ArmMode,
    /// Per-joint overrides; unlisted joints use the model limit, then
    /// `default_velocity_limit`.
    pub velocity_limits: HashMap<String, f64>,
    pub default_velocity_limit: f64,
    pub configuration_limit_gain: f64,
}

impl Default for TeleopSettings {
    fn default() -> Self {
        TeleopSettings {
            frequency: 200.0,
            max_iters: 20,
            pos_threshold: 1e-4,
            ori_threshold: 1e-4,
            damping: 1e-3,
            delta: 0.01,
            input_queue: 64,
            bounds: TargetBounds::default(),
            gripper: GripperRange::default(),
            collision: CollisionSettings::default(),
            couple_gripper_to_scroll: true,
            driven_arm: Side::Left,
            left_mode: ArmMode::Active,
            right_mode: ArmMode::Passive,
            velocity_limits: HashMap::new(),
            default_velocity_limit: PI,
            configuration_limit_gain: 0.5,
        }
    }
}

impl TeleopSettings {
    pub fn from_toml_str(toml: &str) -> Result<TeleopSettings, SettingsError> {
        Ok(toml::from_str(toml)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<TeleopSettings, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn mode(&self, side: Side) -> ArmMode {
        match side {
            Side::Left => self.left_mode,
            Side::Right => self.right_mode,
        }
    }

    pub fn dt(&self) -> f64 {
        1.0 / self.frequency
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_match_reference() {
        let settings = TeleopSettings::default();
        assert_relative_eq!(settings.frequency, 200.0);
        assert_eq!(settings.max_iters, 20);
        assert_relative_eq!(settings.delta, 0.01);
        assert_relative_eq!(settings.gripper.closed, 0.002);
        assert_relative_eq!(settings.gripper.open, 0.037);
        assert_relative_eq!(settings.bounds.z_min, 0.8);
        assert_eq!(settings.driven_arm, Side::Left);
        assert_eq!(settings.right_mode, ArmMode::Passive);
        assert!(settings.couple_gripper_to_scroll);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let settings = TeleopSettings::from_toml_str(
            r#"
frequency = 100.0
driven_arm = "right"
left_mode = "passive"

[bounds]
x_max = 0.5

[collision]
minimum_distance = 0.02

[velocity_limits]
left_waist = 1.0
"#,
        )
        .unwrap();
        assert_relative_eq!(settings.frequency, 100.0);
        assert_relative_eq!(settings.dt(), 0.01);
        assert_eq!(settings.driven_arm, Side::Right);
        assert_eq!(settings.left_mode, ArmMode::Passive);
        assert_relative_eq!(settings.bounds.x_max, 0.5);
        // untouched fields keep their defaults
        assert_relative_eq!(settings.bounds.x_min, -0.4);
        assert_relative_eq!(settings.collision.minimum_distance, 0.02);
        assert_relative_eq!(settings.velocity_limits["left_waist"], 1.0);
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(TeleopSettings::from_toml_str("frequency = \"fast\"").is_err());
    }
}
