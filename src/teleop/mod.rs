pub mod rate;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::DVector;
use thiserror::Error;
use tracing::{debug, info};

use crate::configuration::ReducedConfiguration;
use crate::engine::{EngineError, SimEngine};
use crate::ik::{solve_ik, FrameTask};
use crate::input::{channel, InputDevice, InputListener, InputReceiver, InputSender};
use crate::limits::{CollisionAvoidanceLimit, ConfigurationLimit, Limit, VelocityLimit};
use crate::multi_body::ModelError;
use crate::settings::{ArmMode, SettingsError, TeleopSettings};
use crate::targets::{Side, TargetState};
use self::rate::RateLimiter;

#[derive(Debug, Error)]
pub enum TeleopError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("arm `{0:?}` needs one actuator per joint")]
    ActuatorMismatch(Side),
}

/// Best-effort visualization hooks. Both calls must never block the loop.
pub trait Viewer {
    fn is_running(&self) -> bool;
    fn sync(&mut self, engine: &SimEngine);
}

/// Headless viewer: always running, renders nothing.
#[derive(Debug, Default)]
pub struct NullViewer;

impl Viewer for NullViewer {
    fn is_running(&self) -> bool {
        true
    }

    fn sync(&mut self, _engine: &SimEngine) {}
}

/// Clamps and forwards scalar gripper targets to the two gripper command
/// slots. Fire-and-forget, idempotent, no feedback.
#[derive(Debug)]
pub struct GripperActuator {
    left: usize,
    right: usize,
    closed: f64,
    open: f64,
}

impl GripperActuator {
    pub fn new(
        engine: &SimEngine,
        left: &str,
        right: &str,
        closed: f64,
        open: f64,
    ) -> Result<GripperActuator, EngineError> {
        Ok(GripperActuator {
            left: engine.actuator_id(left)?,
            right: engine.actuator_id(right)?,
            closed,
            open,
        })
    }

    pub fn set(&self, engine: &mut SimEngine, left: f64, right: f64) {
        engine.set_ctrl(self.left, left.clamp(self.closed, self.open));
        engine.set_ctrl(self.right, right.clamp(self.closed, self.open));
    }
}

/// Names the controller resolves for one arm at startup.
#[derive(Debug, Clone)]
pub struct ArmDescription {
    pub side: Side,
    pub joints: Vec<String>,
    /// Position actuators, one per joint, same order.
    pub actuators: Vec<String>,
    pub site: String,
}

/// Scene wiring for [`TeleopController::new`].
#[derive(Debug, Clone)]
pub struct TeleopSetup {
    pub left: ArmDescription,
    pub right: ArmDescription,
    pub left_gripper: String,
    pub right_gripper: String,
    pub collision_pairs: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    Running,
    Stopped,
}

struct Arm {
    side: Side,
    mode: ArmMode,
    configuration: ReducedConfiguration,
    task: FrameTask,
    limits: Vec<Limit>,
    actuators: Vec<usize>,
}

/// Fixed-rate teleoperation orchestrator.
///
/// Owns the engine and all per-arm state. Operator events arrive through a
/// bounded channel and are drained once per tick, so the solver always sees
/// a consistent target snapshot; the input thread never touches kinematic
/// state.
pub struct TeleopController {
    engine: SimEngine,
    settings: TeleopSettings,
    arms: [Arm; 2],
    targets: TargetState,
    gripper: GripperActuator,
    input_tx: InputSender,
    input_rx: InputReceiver,
    listener: Option<InputListener>,
    stop: Arc<AtomicBool>,
    state: LoopState,
    dt: f64,
}

impl TeleopController {
    /// Resolve every name in `setup`, seed targets from the live
    /// end-effector poses, and (when a device is given) start the input
    /// listener. Any unresolvable name aborts startup.
    pub fn new(
        mut engine: SimEngine,
        settings: TeleopSettings,
        setup: TeleopSetup,
        device: Option<Box<dyn InputDevice>>,
    ) -> Result<TeleopController, TeleopError> {
        let (input_tx, input_rx) = channel(settings.input_queue);
        let listener = device.map(|device| InputListener::start(device, input_tx.clone()));

        let gripper = GripperActuator::new(
            &engine,
            &setup.left_gripper,
            &setup.right_gripper,
            settings.gripper.closed,
            settings.gripper.open,
        )?;

        let mut targets = TargetState::new(&settings);
        let left = Self::build_arm(&engine, &settings, &setup, setup.left.clone())?;
        let right = Self::build_arm(&engine, &settings, &setup, setup.right.clone())?;
        for arm in [&left, &right] {
            let pose = engine.site_pose(arm.task.site());
            targets.seed(arm.side, &pose);
        }
        engine.set_marker("left_target", targets.pose(Side::Left));
        engine.set_marker("right_target", targets.pose(Side::Right));

        let dt = settings.dt();
        info!(
            frequency = settings.frequency,
            dofs = left.configuration.dof() + right.configuration.dof(),
            "teleoperation controller ready"
        );
        Ok(TeleopController {
            engine,
            settings,
            arms: [left, right],
            targets,
            gripper,
            input_tx,
            input_rx,
            listener,
            stop: Arc::new(AtomicBool::new(false)),
            state: LoopState::Init,
            dt,
        })
    }

    fn build_arm(
        engine: &SimEngine,
        settings: &TeleopSettings,
        setup: &TeleopSetup,
        description: ArmDescription,
    ) -> Result<Arm, TeleopError> {
        if description.actuators.len() != description.joints.len() {
            return Err(TeleopError::ActuatorMismatch(description.side));
        }
        let configuration = ReducedConfiguration::from_joints(engine, &description.joints)?;
        let task = FrameTask::new(engine, &description.site, 1.0, 1.0, 1.0)?;
        let actuators = description
            .actuators
            .iter()
            .map(|name| engine.actuator_id(name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut limits = vec![
            Limit::Velocity(VelocityLimit::from_model(
                engine,
                &description.joints,
                &settings.velocity_limits,
                settings.default_velocity_limit,
            )?),
            Limit::Configuration(ConfigurationLimit::from_model(
                engine,
                &description.joints,
                settings.configuration_limit_gain,
            )?),
        ];
        if !setup.collision_pairs.is_empty() {
            limits.push(Limit::CollisionAvoidance(CollisionAvoidanceLimit::new(
                engine,
                &setup.collision_pairs,
                configuration.qvel_indices().to_vec(),
                settings.collision.minimum_distance,
                settings.collision.detection_distance,
                settings.collision.gain,
            )?));
        }
        Ok(Arm {
            side: description.side,
            mode: settings.mode(description.side),
            configuration,
            task,
            limits,
            actuators,
        })
    }

    /// Cooperative stop flag, checked once per tick.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Feed for pushing events without an input device (tests, replays).
    pub fn input_sender(&self) -> InputSender {
        self.input_tx.clone()
    }

    pub fn engine(&self) -> &SimEngine {
        &self.engine
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn arm_configuration(&self, side: Side) -> &ReducedConfiguration {
        &self.arms[side.index()].configuration
    }

    pub fn target_pose(&self, side: Side) -> nalgebra::Isometry3<f64> {
        self.targets.pose(side)
    }

    /// One control tick: drain input, write gripper commands, refresh task
    /// targets when dirty, run IK refinement for the active arms, mirror
    /// the results, and advance the engine one timestep.
    ///
    /// IK always re-solves; only the target-pose rebuild is gated on the
    /// dirty flag. The engine steps exactly once per tick, however many
    /// refinement iterations ran.
    pub fn tick(&mut self) {
        while let Ok(event) = self.input_rx.try_recv() {
            self.targets.apply(&event);
        }

        let left_grip = self.targets.gripper(Side::Left);
        let right_grip = self.targets.gripper(Side::Right);
        self.gripper.set(&mut self.engine, left_grip, right_grip);

        if self.targets.take_updated() {
            for arm in self.arms.iter_mut() {
                arm.task.set_target(self.targets.pose(arm.side));
            }
            self.engine
                .set_marker("left_target", self.targets.pose(Side::Left));
            self.engine
                .set_marker("right_target", self.targets.pose(Side::Right));
            debug!(pose = ?self.targets.pose(self.targets.driven()).translation.vector, "targets updated");
        }

        for _ in 0..self.settings.max_iters {
            let mut converged = true;
            for arm in self.arms.iter_mut() {
                if arm.mode != ArmMode::Active {
                    continue;
                }
                let velocity = solve_ik(
                    &self.engine,
                    &arm.configuration,
                    std::slice::from_ref(&arm.task),
                    self.dt,
                    &arm.limits,
                    self.settings.damping,
                );
                arm.configuration.integrate(&velocity, self.dt);
                self.engine.write_configuration(&arm.configuration);

                let error = arm.task.error(&self.engine);
                if error.fixed_rows::<3>(3).norm() > self.settings.pos_threshold
                    || error.fixed_rows::<3>(0).norm() > self.settings.ori_threshold
                {
                    converged = false;
                }
            }
            if converged {
                break;
            }
        }

        for arm in self.arms.iter_mut() {
            if arm.mode == ArmMode::Passive {
                let zeros = DVector::zeros(arm.configuration.dof());
                arm.configuration.integrate(&zeros, self.dt);
                self.engine.write_configuration(&arm.configuration);
            }
        }

        for arm in &self.arms {
            for (k, &actuator) in arm.actuators.iter().enumerate() {
                self.engine.set_ctrl(actuator, arm.configuration.q[k]);
            }
        }

        self.engine.step(self.dt);
    }

    /// Run until the viewer closes or the stop flag is raised. The input
    /// listener is released on every exit path ([`InputListener`] also
    /// stops itself on drop, covering unwinds).
    pub fn run(&mut self, viewer: &mut dyn Viewer) {
        self.state = LoopState::Running;
        let mut rate = RateLimiter::new(self.settings.frequency);
        while viewer.is_running() && !self.stop.load(Ordering::Acquire) {
            self.tick();
            viewer.sync(&self.engine);
            rate.sleep();
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(listener) = &mut self.listener {
            listener.stop();
        }
        self.state = LoopState::Stopped;
        info!("teleoperation controller stopped");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::input::{Button, InputEvent};
    use crate::scene::build_scene;
    use approx::assert_relative_eq;

    fn controller() -> TeleopController {
        let (engine, setup) = build_scene().unwrap();
        TeleopController::new(engine, TeleopSettings::default(), setup, None).unwrap()
    }

    fn ee_x(controller: &TeleopController, side: Side) -> f64 {
        let site = controller.arms[side.index()].task.site();
        controller.engine.site_pose(site).translation.vector.x
    }

    #[test]
    fn test_end_to_end_x_offset() {
        let mut controller = controller();
        let seed_x = controller.target_pose(Side::Left).translation.vector.x;

        let sender = controller.input_sender();
        for _ in 0..5 {
            sender.send(InputEvent::Scroll { dx: 1, dy: 0 }).unwrap();
        }
        for _ in 0..50 {
            controller.tick();
        }

        let target_x = controller.target_pose(Side::Left).translation.vector.x;
        assert_relative_eq!(target_x, seed_x + 0.05, epsilon = 1e-12);
        assert!(
            (ee_x(&controller, Side::Left) - target_x).abs() < 1e-3,
            "end effector x {} vs target {}",
            ee_x(&controller, Side::Left),
            target_x
        );

        // gripper joints stay inside the command range throughout
        let engine = controller.engine();
        for name in ["left_gripper_joint", "right_gripper_joint"] {
            let joint = &engine.tree.joints[engine.joint_id(name).unwrap()];
            let q = engine.qpos[joint.qpos_adr];
            assert!((0.002..=0.037).contains(&q), "gripper at {q}");
        }
    }

    #[test]
    fn test_asymmetric_control_freezes_passive_arm() {
        let mut controller = controller();
        let right_q0 = controller.arm_configuration(Side::Right).q.clone();

        let sender = controller.input_sender();
        for _ in 0..8 {
            sender.send(InputEvent::Scroll { dx: 1, dy: 0 }).unwrap();
        }

        let mut previous_x = ee_x(&controller, Side::Left);
        let initial_x = previous_x;
        for _ in 0..100 {
            controller.tick();
            let x = ee_x(&controller, Side::Left);
            assert!(x >= previous_x - 1e-6, "left arm moved backwards");
            previous_x = x;
        }
        assert!(previous_x > initial_x);

        let right_q = &controller.arm_configuration(Side::Right).q;
        assert_relative_eq!((right_q - right_q0).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_click_moves_z_and_updates_marker() {
        let mut controller = controller();
        let seed_z = controller.target_pose(Side::Left).translation.vector.z;

        let sender = controller.input_sender();
        sender
            .send(InputEvent::Click {
                button: Button::Right,
                pressed: true,
            })
            .unwrap();
        controller.tick();

        let target = controller.target_pose(Side::Left);
        assert_relative_eq!(target.translation.vector.z, seed_z - 0.01, epsilon = 1e-12);
        let marker = controller.engine().marker("left_target").unwrap();
        assert_relative_eq!(
            marker.translation.vector.z,
            target.translation.vector.z,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_run_stops_on_viewer_close() {
        struct CountingViewer {
            remaining: u32,
        }
        impl Viewer for CountingViewer {
            fn is_running(&self) -> bool {
                self.remaining > 0
            }
            fn sync(&mut self, _engine: &SimEngine) {
                self.remaining -= 1;
            }
        }

        let mut controller = controller();
        assert_eq!(controller.state(), LoopState::Init);
        let mut viewer = CountingViewer { remaining: 3 };
        controller.run(&mut viewer);
        assert_eq!(controller.state(), LoopState::Stopped);
    }

    #[test]
    fn test_stop_handle_breaks_the_loop() {
        let mut controller = controller();
        controller.stop_handle().store(true, Ordering::Release);
        controller.run(&mut NullViewer);
        assert_eq!(controller.state(), LoopState::Stopped);
    }

    #[test]
    fn test_unknown_site_aborts_startup() {
        let (engine, mut setup) = build_scene().unwrap();
        setup.left.site = "missing_site".into();
        let result = TeleopController::new(engine, TeleopSettings::default(), setup, None);
        assert!(matches!(
            result,
            Err(TeleopError::Engine(EngineError::UnknownSite(_)))
        ));
    }
}
