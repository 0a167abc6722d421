use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::Deserialize;

use crate::input::{Button, InputEvent};
use crate::settings::TeleopSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

/// Cartesian target poses and gripper targets for both arms, owned by the
/// control loop and fed by drained input events.
///
/// Every position update applies one fixed step per discrete event and is
/// clamped into the configured box; clamping is silent and idempotent. The
/// dirty flag reports whether anything changed since the last
/// [`take_updated`](Self::take_updated).
#[derive(Debug, Clone)]
pub struct TargetState {
    position: [Vector3<f64>; 2],
    rotation: [UnitQuaternion<f64>; 2],
    gripper: [f64; 2],
    driven: Side,
    delta: f64,
    x: (f64, f64),
    y: (f64, f64),
    z: (f64, f64),
    gripper_range: (f64, f64),
    couple_gripper: bool,
    updated: bool,
}

impl TargetState {
    pub fn new(settings: &TeleopSettings) -> TargetState {
        TargetState {
            position: [Vector3::zeros(), Vector3::zeros()],
            rotation: [UnitQuaternion::identity(), UnitQuaternion::identity()],
            gripper: [settings.gripper.home; 2],
            driven: settings.driven_arm,
            delta: settings.delta,
            x: (settings.bounds.x_min, settings.bounds.x_max),
            y: (settings.bounds.y_min, settings.bounds.y_max),
            z: (settings.bounds.z_min, settings.bounds.z_max),
            gripper_range: (settings.gripper.closed, settings.gripper.open),
            couple_gripper: settings.couple_gripper_to_scroll,
            updated: false,
        }
    }

    /// Seed one arm's target from a live pose, without touching the dirty
    /// flag. Called once at startup.
    pub fn seed(&mut self, side: Side, pose: &Isometry3<f64>) {
        self.position[side.index()] = pose.translation.vector;
        self.rotation[side.index()] = pose.rotation;
    }

    pub fn driven(&self) -> Side {
        self.driven
    }

    pub fn pose(&self, side: Side) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.position[side.index()]),
            self.rotation[side.index()],
        )
    }

    pub fn gripper(&self, side: Side) -> f64 {
        self.gripper[side.index()]
    }

    /// Apply one drained event. Horizontal scroll moves the driven arm in X
    /// and, when coupled, nudges both grippers by the same step; vertical
    /// scroll moves Y with the sign inverted; clicks move Z.
    pub fn apply(&mut self, event: &InputEvent) {
        let driven = self.driven.index();
        match *event {
            InputEvent::Scroll { dx, dy } => {
                if dx > 0 {
                    self.position[driven].x += self.delta;
                    if self.couple_gripper {
                        self.gripper[0] += self.delta;
                        self.gripper[1] += self.delta;
                    }
                } else if dx < 0 {
                    self.position[driven].x -= self.delta;
                    if self.couple_gripper {
                        self.gripper[0] -= self.delta;
                        self.gripper[1] -= self.delta;
                    }
                }
                if dy < 0 {
                    self.position[driven].y += self.delta;
                } else if dy > 0 {
                    self.position[driven].y -= self.delta;
                }
                self.position[driven].x = self.position[driven].x.clamp(self.x.0, self.x.1);
                self.position[driven].y = self.position[driven].y.clamp(self.y.0, self.y.1);
                let (closed, open) = self.gripper_range;
                self.gripper[0] = self.gripper[0].clamp(closed, open);
                self.gripper[1] = self.gripper[1].clamp(closed, open);
                self.updated = true;
            }
            InputEvent::Click { button, pressed } => {
                if !pressed {
                    return;
                }
                match button {
                    Button::Left => self.position[driven].z += self.delta,
                    Button::Right => self.position[driven].z -= self.delta,
                }
                self.position[driven].z = self.position[driven].z.clamp(self.z.0, self.z.1);
                self.updated = true;
            }
        }
    }

    /// Report and clear the dirty flag. One call per control tick.
    pub fn take_updated(&mut self) -> bool {
        std::mem::take(&mut self.updated)
    }
}
