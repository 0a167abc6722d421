//! # teleik is a library for real-time teleoperation of dual-arm robots.
//! teleik = teleoperation + ik
//!
//! Operator input events become Cartesian target poses; a constrained
//! differential-IK solve turns them into joint velocities that are
//! integrated at a fixed rate while respecting velocity, position, and
//! collision-avoidance limits.

#![deny(unsafe_code)]

pub mod configuration;
pub mod engine;
pub mod ik;
pub mod input;
pub mod kinematics;
pub mod limits;
pub mod multi_body;
pub mod scene;
pub mod settings;
pub mod targets;
pub mod teleop;

pub use configuration::ReducedConfiguration;
pub use engine::SimEngine;
pub use ik::{solve_ik, FrameTask};
pub use multi_body::MultiBody;
pub use settings::TeleopSettings;
pub use teleop::TeleopController;
