pub mod qp;

use nalgebra::{DMatrix, DVector, Isometry3, Vector6};
use tracing::warn;

use crate::configuration::ReducedConfiguration;
use crate::engine::{EngineError, SimEngine};
use crate::limits::Limit;

/// Weighted pose-tracking objective for one end-effector site.
///
/// The error is the world-frame twist between the current and target pose,
/// rows 0..3 rotation, rows 3..6 position. `lm_damping` scales a
/// Levenberg-Marquardt term with the weighted error, stiffening the solve
/// near singularities.
#[derive(Debug, Clone)]
pub struct FrameTask {
    site: usize,
    pub position_cost: f64,
    pub orientation_cost: f64,
    pub lm_damping: f64,
    target: Isometry3<f64>,
}

impl FrameTask {
    /// Targets the site's current pose until [`set_target`](Self::set_target)
    /// is called.
    pub fn new(
        engine: &SimEngine,
        site: &str,
        position_cost: f64,
        orientation_cost: f64,
        lm_damping: f64,
    ) -> Result<FrameTask, EngineError> {
        let site = engine.site_id(site)?;
        let target = engine.site_pose(site);
        Ok(FrameTask {
            site,
            position_cost,
            orientation_cost,
            lm_damping,
            target,
        })
    }

    pub fn set_target(&mut self, pose: Isometry3<f64>) {
        self.target = pose;
    }

    pub fn target(&self) -> &Isometry3<f64> {
        &self.target
    }

    pub fn site(&self) -> usize {
        self.site
    }

    pub fn error_in(&self, engine: &SimEngine, poses: &[Isometry3<f64>]) -> Vector6<f64> {
        let current = engine.site_pose_in(poses, self.site);
        let rotation = (self.target.rotation * current.rotation.inverse()).scaled_axis();
        let position = self.target.translation.vector - current.translation.vector;
        let mut error = Vector6::zeros();
        error.fixed_rows_mut::<3>(0).copy_from(&rotation);
        error.fixed_rows_mut::<3>(3).copy_from(&position);
        error
    }

    pub fn error(&self, engine: &SimEngine) -> Vector6<f64> {
        self.error_in(engine, &engine.fk())
    }
}

/// One differential-IK iteration: the joint velocity that best reduces the
/// stacked task errors over `dt` without leaving the feasible region.
///
/// Builds the damped weighted normal equations, collects every constraint
/// row, and hands the QP to [`qp::solve`]. A numerically infeasible
/// subproblem is recovered locally: the arm is commanded zero velocity for
/// this iteration and a warning is logged. The result is finally clamped
/// against any velocity limit in the set, so per-DOF speed bounds hold for
/// every output.
pub fn solve_ik(
    engine: &SimEngine,
    configuration: &ReducedConfiguration,
    tasks: &[FrameTask],
    dt: f64,
    limits: &[Limit],
    damping: f64,
) -> DVector<f64> {
    let n = configuration.dof();
    let poses = engine.fk();

    let mut h = DMatrix::from_diagonal_element(n, n, damping);
    let mut g = DVector::zeros(n);
    for task in tasks {
        let jacobian = engine.site_jacobian_in(&poses, task.site, configuration.qvel_indices());
        let error = task.error_in(engine, &poses);

        let mut weights = Vector6::from_element(task.orientation_cost);
        weights.fixed_rows_mut::<3>(3).fill(task.position_cost);
        let weighted_jacobian = DMatrix::from_fn(6, n, |r, c| jacobian[(r, c)] * weights[r]);
        let weighted_error = DVector::from_fn(6, |r, _| error[r] * weights[r]);

        let mu = task.lm_damping * weighted_error.norm_squared();
        h += weighted_jacobian.transpose() * &weighted_jacobian;
        for i in 0..n {
            h[(i, i)] += mu;
        }
        g += weighted_jacobian.transpose() * weighted_error / dt;
    }

    let rows: Vec<_> = limits
        .iter()
        .flat_map(|limit| limit.rows(engine, &poses, configuration, dt))
        .collect();

    let mut velocity = match qp::solve(&h, &g, &rows, 100, 1e-9) {
        Ok(velocity) => velocity,
        Err(error) => {
            warn!(%error, "ik subproblem infeasible, commanding zero velocity");
            DVector::zeros(n)
        }
    };
    for limit in limits {
        if let Limit::Velocity(limit) = limit {
            limit.clamp(&mut velocity);
        }
    }
    velocity
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::limits::VelocityLimit;
    use crate::multi_body::MultiBody;
    use approx::assert_relative_eq;
    use nalgebra::Translation3;
    use std::collections::HashMap;

    const URDF: &str = r#"
<robot name="planar3">
  <link name="base"/>
  <link name="l1"/>
  <link name="l2"/>
  <link name="l3"/>
  <joint name="j1" type="revolute">
    <origin xyz="0 0 0" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.14" upper="3.14" effort="10" velocity="6.28"/>
    <parent link="base"/>
    <child link="l1"/>
  </joint>
  <joint name="j2" type="revolute">
    <origin xyz="0.4 0 0" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.14" upper="3.14" effort="10" velocity="6.28"/>
    <parent link="l1"/>
    <child link="l2"/>
  </joint>
  <joint name="j3" type="revolute">
    <origin xyz="0.4 0 0" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.14" upper="3.14" effort="10" velocity="6.28"/>
    <parent link="l2"/>
    <child link="l3"/>
  </joint>
</robot>
"#;

    fn arm() -> (SimEngine, ReducedConfiguration) {
        let multi_body = MultiBody::from_urdf_str(URDF).unwrap();
        let mut engine = SimEngine::new(&multi_body);
        engine
            .add_site("tip", "l3", Translation3::new(0.2, 0.0, 0.0).into())
            .unwrap();
        // slightly bent elbow-down start, away from the stretched singularity
        engine.qpos[0] = 0.2;
        engine.qpos[1] = -0.4;
        engine.qpos[2] = 0.3;
        let joints = vec!["j1".to_string(), "j2".to_string(), "j3".to_string()];
        let configuration = ReducedConfiguration::from_joints(&engine, &joints).unwrap();
        (engine, configuration)
    }

    #[test]
    fn test_convergence_to_reachable_target() {
        let (mut engine, mut configuration) = arm();
        let mut task = FrameTask::new(&engine, "tip", 1.0, 1.0, 1.0).unwrap();
        let mut target = *task.target();
        target.translation.vector.x -= 0.1;
        target.translation.vector.y += 0.05;
        task.set_target(target);

        let dt = 0.005;
        for _ in 0..200 {
            let v = solve_ik(&engine, &configuration, &[task.clone()], dt, &[], 1e-3);
            configuration.integrate(&v, dt);
            engine.write_configuration(&configuration);
        }
        let error = task.error(&engine);
        assert!(
            error.fixed_rows::<3>(3).norm() < 1e-4,
            "position error {}",
            error.fixed_rows::<3>(3).norm()
        );
        assert!(error.fixed_rows::<3>(0).norm() < 1e-3);
    }

    #[test]
    fn test_velocity_limit_holds_for_adversarial_error() {
        let (engine, configuration) = arm();
        let mut task = FrameTask::new(&engine, "tip", 1.0, 1.0, 1.0).unwrap();
        // far outside the workspace: raw least squares would demand a huge step
        let mut target = *task.target();
        target.translation.vector.x += 50.0;
        task.set_target(target);

        let joints = vec!["j1".to_string(), "j2".to_string(), "j3".to_string()];
        let overrides = HashMap::from([
            ("j1".to_string(), 0.5),
            ("j2".to_string(), 1.0),
            ("j3".to_string(), 2.0),
        ]);
        let limit = VelocityLimit::from_model(&engine, &joints, &overrides, 1.0).unwrap();
        let limits = vec![Limit::Velocity(limit)];

        let v = solve_ik(&engine, &configuration, &[task], 0.005, &limits, 1e-3);
        assert!(v[0].abs() <= 0.5 + 1e-9);
        assert!(v[1].abs() <= 1.0 + 1e-9);
        assert!(v[2].abs() <= 2.0 + 1e-9);
        assert!(v.norm() > 0.0);
    }

    #[test]
    fn test_degenerate_objective_falls_back_to_zero() {
        let (engine, configuration) = arm();
        let task = FrameTask::new(&engine, "tip", 0.0, 0.0, 0.0).unwrap();
        // zero costs and zero damping underflow the normal equations
        let v = solve_ik(&engine, &configuration, &[task], 0.005, &[], 0.0);
        assert_relative_eq!(v.norm(), 0.0);
    }

    #[test]
    fn test_zero_error_yields_zero_velocity() {
        let (engine, configuration) = arm();
        let task = FrameTask::new(&engine, "tip", 1.0, 1.0, 1.0).unwrap();
        let v = solve_ik(&engine, &configuration, &[task], 0.005, &[], 1e-3);
        assert!(v.norm() < 1e-9);
    }
}
