use nalgebra::DVector;

use crate::engine::{EngineError, SimEngine};

/// Position/velocity state of one arm's joints, viewed out of the global
/// state vectors.
///
/// The index lists are fixed at construction. The global mirror is updated
/// by the caller through [`SimEngine::write_configuration`], never from
/// here.
#[derive(Debug, Clone)]
pub struct ReducedConfiguration {
    qpos_indices: Vec<usize>,
    qvel_indices: Vec<usize>,
    pub q: DVector<f64>,
    pub dq: DVector<f64>,
}

impl ReducedConfiguration {
    /// Resolve `joint_names` against the engine and snapshot their current
    /// state. An unknown name is a startup error.
    pub fn from_joints(
        engine: &SimEngine,
        joint_names: &[String],
    ) -> Result<ReducedConfiguration, EngineError> {
        let mut qpos_indices = Vec::with_capacity(joint_names.len());
        let mut qvel_indices = Vec::with_capacity(joint_names.len());
        for name in joint_names {
            let joint = &engine.tree.joints[engine.joint_id(name)?];
            qpos_indices.push(joint.qpos_adr);
            qvel_indices.push(joint.qvel_adr);
        }
        let q = DVector::from_iterator(
            qpos_indices.len(),
            qpos_indices.iter().map(|&i| engine.qpos[i]),
        );
        let dq = DVector::from_iterator(
            qvel_indices.len(),
            qvel_indices.iter().map(|&i| engine.qvel[i]),
        );
        Ok(ReducedConfiguration {
            qpos_indices,
            qvel_indices,
            q,
            dq,
        })
    }

    pub fn dof(&self) -> usize {
        self.q.len()
    }

    pub fn qpos_indices(&self) -> &[usize] {
        &self.qpos_indices
    }

    pub fn qvel_indices(&self) -> &[usize] {
        &self.qvel_indices
    }

    /// Advance `q` by `velocity * dt` and set `dq` to `velocity`.
    ///
    /// All supported joints are single-DOF and integrate linearly. A
    /// velocity of the wrong length is a caller bug, not a runtime error.
    pub fn integrate(&mut self, velocity: &DVector<f64>, dt: f64) {
        assert_eq!(
            velocity.len(),
            self.q.len(),
            "velocity length does not match configuration DOF count"
        );
        self.q += velocity * dt;
        self.dq.copy_from(velocity);
    }

    /// Re-read the reduced state from the global mirror.
    pub fn refresh(&mut self, engine: &SimEngine) {
        for (k, &index) in self.qpos_indices.iter().enumerate() {
            self.q[k] = engine.qpos[index];
        }
        for (k, &index) in self.qvel_indices.iter().enumerate() {
            self.dq[k] = engine.qvel[index];
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::multi_body::MultiBody;
    use approx::assert_relative_eq;

    const URDF: &str = r#"
<robot name="pair">
  <link name="base"/>
  <link name="l1"/>
  <link name="l2"/>
  <joint name="j1" type="revolute">
    <origin xyz="0 0 0" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.14" upper="3.14" effort="1" velocity="3.14"/>
    <parent link="base"/>
    <child link="l1"/>
  </joint>
  <joint name="j2" type="revolute">
    <origin xyz="1 0 0" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.14" upper="3.14" effort="1" velocity="3.14"/>
    <parent link="l1"/>
    <child link="l2"/>
  </joint>
</robot>
"#;

    fn engine() -> SimEngine {
        let multi_body = MultiBody::from_urdf_str(URDF).unwrap();
        SimEngine::new(&multi_body)
    }

    #[test]
    fn test_from_joints_resolves_state() {
        let mut engine = engine();
        engine.qpos[0] = 0.5;
        engine.qpos[1] = -0.25;
        let configuration =
            ReducedConfiguration::from_joints(&engine, &["j1".into(), "j2".into()]).unwrap();
        assert_eq!(configuration.dof(), 2);
        assert_relative_eq!(configuration.q[0], 0.5);
        assert_relative_eq!(configuration.q[1], -0.25);
    }

    #[test]
    fn test_unknown_joint_is_fatal() {
        let engine = engine();
        assert!(ReducedConfiguration::from_joints(&engine, &["j1".into(), "j9".into()]).is_err());
    }

    #[test]
    fn test_integrate_round_trip() {
        let engine = engine();
        let mut configuration =
            ReducedConfiguration::from_joints(&engine, &["j1".into(), "j2".into()]).unwrap();
        let q0 = configuration.q.clone();

        let v = DVector::from_vec(vec![0.8, -1.3]);
        configuration.integrate(&v, 0.01);
        assert_relative_eq!(configuration.dq[1], -1.3);
        configuration.integrate(&(-v), 0.01);
        assert_relative_eq!((configuration.q - q0).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    #[should_panic]
    fn test_integrate_length_contract() {
        let engine = engine();
        let mut configuration =
            ReducedConfiguration::from_joints(&engine, &["j1".into(), "j2".into()]).unwrap();
        configuration.integrate(&DVector::zeros(3), 0.01);
    }

    #[test]
    fn test_mirror_write() {
        let mut engine = engine();
        let mut configuration =
            ReducedConfiguration::from_joints(&engine, &["j1".into(), "j2".into()]).unwrap();
        configuration.integrate(&DVector::from_vec(vec![1.0, 2.0]), 0.1);
        engine.write_configuration(&configuration);
        assert_relative_eq!(engine.qpos[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(engine.qvel[1], 2.0, epsilon = 1e-12);
    }
}
