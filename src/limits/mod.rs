use std::collections::HashMap;

use nalgebra::{DVector, Isometry3};

use crate::configuration::ReducedConfiguration;
use crate::engine::{EngineError, SimEngine};

/// One linear inequality `a . v <= b` over an arm's reduced velocity.
#[derive(Debug, Clone)]
pub struct Row {
    pub a: DVector<f64>,
    pub b: f64,
}

/// Per-DOF speed bound.
#[derive(Debug, Clone)]
pub struct VelocityLimit {
    limits: Vec<Option<f64>>,
}

impl VelocityLimit {
    /// Limits per joint of `joint_names`: an override by joint name wins,
    /// then the model's own `<limit velocity>`, then `default`.
    pub fn from_model(
        engine: &SimEngine,
        joint_names: &[String],
        overrides: &HashMap<String, f64>,
        default: f64,
    ) -> Result<VelocityLimit, EngineError> {
        let mut limits = Vec::with_capacity(joint_names.len());
        for name in joint_names {
            let joint = &engine.tree.joints[engine.joint_id(name)?];
            let limit = overrides
                .get(name)
                .copied()
                .or(joint.velocity_limit)
                .unwrap_or(default);
            limits.push(Some(limit));
        }
        Ok(VelocityLimit { limits })
    }

    pub fn rows(&self, _dt: f64) -> Vec<Row> {
        let n = self.limits.len();
        let mut rows = Vec::new();
        for (i, limit) in self.limits.iter().enumerate() {
            let Some(limit) = limit else { continue };
            let mut upper = DVector::zeros(n);
            upper[i] = 1.0;
            rows.push(Row {
                a: upper,
                b: *limit,
            });
            let mut lower = DVector::zeros(n);
            lower[i] = -1.0;
            rows.push(Row {
                a: lower,
                b: *limit,
            });
        }
        rows
    }

    /// Scale `v` proportionally so no DOF exceeds its bound. Preserves the
    /// direction of motion.
    pub fn clamp(&self, v: &mut DVector<f64>) {
        let mut max_ratio = 1.0_f64;
        for (i, limit) in self.limits.iter().enumerate() {
            if let Some(limit) = limit {
                if *limit > 0.0 {
                    max_ratio = max_ratio.max(v[i].abs() / limit);
                }
            }
        }
        if max_ratio > 1.0 {
            *v /= max_ratio;
        }
    }
}

/// Joint position range bound, expressed at velocity level.
#[derive(Debug, Clone)]
pub struct ConfigurationLimit {
    ranges: Vec<Option<(f64, f64)>>,
    gain: f64,
}

impl ConfigurationLimit {
    pub fn from_model(
        engine: &SimEngine,
        joint_names: &[String],
        gain: f64,
    ) -> Result<ConfigurationLimit, EngineError> {
        let mut ranges = Vec::with_capacity(joint_names.len());
        for name in joint_names {
            let joint = &engine.tree.joints[engine.joint_id(name)?];
            ranges.push(joint.range);
        }
        Ok(ConfigurationLimit { ranges, gain })
    }

    pub fn rows(&self, configuration: &ReducedConfiguration, dt: f64) -> Vec<Row> {
        let n = self.ranges.len();
        let mut rows = Vec::new();
        for (i, range) in self.ranges.iter().enumerate() {
            let Some((lo, hi)) = range else { continue };
            let q = configuration.q[i];
            let mut upper = DVector::zeros(n);
            upper[i] = 1.0;
            rows.push(Row {
                a: upper,
                b: self.gain * (hi - q) / dt,
            });
            let mut lower = DVector::zeros(n);
            lower[i] = -1.0;
            rows.push(Row {
                a: lower,
                b: self.gain * (q - lo) / dt,
            });
        }
        rows
    }
}

/// Minimum-distance constraint between pairs of geom groups.
///
/// A pair is inactive (emits no row) while its live distance exceeds
/// `detection_distance`. Inside the horizon the admissible approach speed
/// shrinks linearly, reaching zero at `minimum_distance` and turning
/// repulsive below it.
#[derive(Debug, Clone)]
pub struct CollisionAvoidanceLimit {
    pairs: Vec<(usize, usize)>,
    qvel_cols: Vec<usize>,
    pub minimum_distance: f64,
    pub detection_distance: f64,
    pub gain: f64,
}

impl CollisionAvoidanceLimit {
    pub fn new(
        engine: &SimEngine,
        group_pairs: &[(String, String)],
        qvel_cols: Vec<usize>,
        minimum_distance: f64,
        detection_distance: f64,
        gain: f64,
    ) -> Result<CollisionAvoidanceLimit, EngineError> {
        let mut pairs = Vec::with_capacity(group_pairs.len());
        for (a, b) in group_pairs {
            pairs.push((engine.group_id(a)?, engine.group_id(b)?));
        }
        Ok(CollisionAvoidanceLimit {
            pairs,
            qvel_cols,
            minimum_distance,
            detection_distance,
            gain,
        })
    }

    pub fn rows(&self, engine: &SimEngine, poses: &[Isometry3<f64>], dt: f64) -> Vec<Row> {
        let mut rows = Vec::new();
        for &(group_a, group_b) in &self.pairs {
            let Some(contact) = engine.group_distance_in(poses, group_a, group_b) else {
                continue;
            };
            if contact.distance > self.detection_distance {
                continue;
            }
            // approach speed along -normal must stay below the softened bound
            let jac_a = engine.tree.frame_jacobian(
                poses,
                engine.geom(contact.geom_a).link,
                &contact.point_a,
                &self.qvel_cols,
            );
            let jac_b = engine.tree.frame_jacobian(
                poses,
                engine.geom(contact.geom_b).link,
                &contact.point_b,
                &self.qvel_cols,
            );
            let relative = jac_a.rows(3, 3).into_owned() - jac_b.rows(3, 3).into_owned();
            let normal = DVector::from_column_slice(contact.normal.as_slice());
            let a = -(relative.transpose() * normal);
            let b = self.gain * (contact.distance - self.minimum_distance) / dt;
            rows.push(Row { a, b });
        }
        rows
    }
}

/// The constraint variants an IK solve accepts, built once per session.
#[derive(Debug, Clone)]
pub enum Limit {
    Velocity(VelocityLimit),
    Configuration(ConfigurationLimit),
    CollisionAvoidance(CollisionAvoidanceLimit),
}

impl Limit {
    /// Inequality rows for the current configuration. Distances and bounds
    /// are recomputed on every call; nothing carries over between ticks.
    pub fn rows(
        &self,
        engine: &SimEngine,
        poses: &[Isometry3<f64>],
        configuration: &ReducedConfiguration,
        dt: f64,
    ) -> Vec<Row> {
        match self {
            Limit::Velocity(limit) => limit.rows(dt),
            Limit::Configuration(limit) => limit.rows(configuration, dt),
            Limit::CollisionAvoidance(limit) => limit.rows(engine, poses, dt),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::multi_body::MultiBody;
    use approx::assert_relative_eq;

    const URDF: &str = r#"
<robot name="slider">
  <link name="base"/>
  <link name="carriage">
    <collision>
      <origin xyz="0 0 0" rpy="0 0 0"/>
      <geometry><sphere radius="0.05"/></geometry>
    </collision>
  </link>
  <link name="wall">
    <collision>
      <origin xyz="0 0 0" rpy="0 0 0"/>
      <geometry><sphere radius="0.05"/></geometry>
    </collision>
  </link>
  <joint name="slide" type="prismatic">
    <origin xyz="0 0 0" rpy="0 0 0"/>
    <axis xyz="1 0 0"/>
    <limit lower="-1.0" upper="1.0" effort="10" velocity="2.0"/>
    <parent link="base"/>
    <child link="carriage"/>
  </joint>
  <joint name="wall_mount" type="fixed">
    <origin xyz="2 0 0" rpy="0 0 0"/>
    <parent link="base"/>
    <child link="wall"/>
  </joint>
</robot>
"#;

    fn slider() -> SimEngine {
        let multi_body = MultiBody::from_urdf_str(URDF).unwrap();
        let mut engine = SimEngine::new(&multi_body);
        engine.define_group("carriage", &["carriage"]).unwrap();
        engine.define_group("wall", &["wall"]).unwrap();
        engine
    }

    fn collision_limit(engine: &SimEngine, detection: f64) -> CollisionAvoidanceLimit {
        CollisionAvoidanceLimit::new(
            engine,
            &[("carriage".into(), "wall".into())],
            vec![0],
            0.1,
            detection,
            0.5,
        )
        .unwrap()
    }

    #[test]
    fn test_velocity_rows_and_clamp() {
        let engine = slider();
        let limit =
            VelocityLimit::from_model(&engine, &["slide".into()], &HashMap::new(), 1.0).unwrap();
        let rows = limit.rows(0.01);
        assert_eq!(rows.len(), 2);
        assert_relative_eq!(rows[0].b, 2.0); // model limit wins over default

        let mut v = DVector::from_vec(vec![-5.0]);
        limit.clamp(&mut v);
        assert_relative_eq!(v[0], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_velocity_override() {
        let engine = slider();
        let overrides = HashMap::from([("slide".to_string(), 0.5)]);
        let limit =
            VelocityLimit::from_model(&engine, &["slide".into()], &overrides, 1.0).unwrap();
        assert_relative_eq!(limit.rows(0.01)[0].b, 0.5);
    }

    #[test]
    fn test_configuration_rows_shrink_near_bound() {
        let engine = slider();
        let limit = ConfigurationLimit::from_model(&engine, &["slide".into()], 1.0).unwrap();
        let mut configuration =
            ReducedConfiguration::from_joints(&engine, &["slide".into()]).unwrap();
        configuration.q[0] = 0.9;
        let rows = limit.rows(&configuration, 0.1);
        // only 0.1 m of travel left before the upper bound
        assert_relative_eq!(rows[0].b, 1.0, epsilon = 1e-12);
        assert_relative_eq!(rows[1].b, 19.0, epsilon = 1e-12);
    }

    #[test]
    fn test_collision_row_horizon_gating() {
        // carriage at x=0, wall at x=2: surface distance 1.9
        let engine = slider();
        let poses = engine.fk();

        let far = collision_limit(&engine, 1.9 - 1e-6);
        assert!(far.rows(&engine, &poses, 0.01).is_empty());

        let near = collision_limit(&engine, 1.9 + 1e-6);
        let rows = near.rows(&engine, &poses, 0.01);
        assert_eq!(rows.len(), 1);
        // moving towards the wall (+x) is the constrained direction
        assert_relative_eq!(rows[0].a[0], 1.0, epsilon = 1e-9);
        assert!(rows[0].b > 0.0);
    }

    #[test]
    fn test_collision_row_repulsive_below_minimum() {
        let mut engine = slider();
        // park the carriage just inside the minimum distance
        engine.qpos[0] = 2.0 - 0.1 - 0.1 + 0.01;
        let poses = engine.fk();
        let limit = collision_limit(&engine, 0.5);
        let rows = limit.rows(&engine, &poses, 0.01);
        assert_eq!(rows.len(), 1);
        // bound is negative: the solver must retreat
        assert!(rows[0].b < 0.0);
    }
}
