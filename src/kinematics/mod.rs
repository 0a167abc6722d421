use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, Isometry3, Translation3, UnitQuaternion, Unit, Vector3};

use crate::multi_body::{CollisionSphere, JointKind, MultiBody};

#[derive(Debug, Clone)]
pub struct TreeJoint {
    pub name: String,
    /// Link this joint moves (index into `KinematicTree::links`).
    pub link: usize,
    pub kind: JointKind,
    pub axis: Vector3<f64>,
    pub qpos_adr: usize,
    pub qvel_adr: usize,
    pub range: Option<(f64, f64)>,
    pub velocity_limit: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TreeLink {
    pub name: String,
    pub parent: Option<usize>,
    /// Joint origin transform relative to the parent link.
    pub local_pose: Isometry3<f64>,
    pub joint: Option<usize>,
    pub spheres: Vec<CollisionSphere>,
}

/// Flattened kinematic tree with per-joint state-vector addresses.
///
/// Links are stored root-first in topological order, so forward kinematics
/// is a single pass.
#[derive(Debug, Clone)]
pub struct KinematicTree {
    pub links: Vec<TreeLink>,
    pub joints: Vec<TreeJoint>,
    pub nq: usize,
    pub nv: usize,
    link_index: HashMap<String, usize>,
    joint_index: HashMap<String, usize>,
}

impl KinematicTree {
    pub fn from_multi_body(multi_body: &MultiBody) -> KinematicTree {
        let order = multi_body.bfs(multi_body.root_index);
        let mut new_index = HashMap::new();
        for (new, old) in order.iter().enumerate() {
            new_index.insert(*old, new);
        }

        let mut links = Vec::with_capacity(order.len());
        let mut joints = Vec::new();
        let mut link_index = HashMap::new();
        let mut joint_index = HashMap::new();
        let mut adr = 0;

        for old in &order {
            let link = multi_body.get_link(*old).unwrap();
            let parent = multi_body.parent(*old).map(|p| new_index[&p]);
            let joint = link.moving_joint.as_ref().map(|spec| {
                let name = link.joint.as_ref().unwrap().name.clone();
                joint_index.insert(name.clone(), joints.len());
                joints.push(TreeJoint {
                    name,
                    link: links.len(),
                    kind: spec.kind,
                    axis: spec.axis,
                    qpos_adr: adr,
                    qvel_adr: adr,
                    range: spec.range,
                    velocity_limit: spec.velocity_limit,
                });
                adr += 1;
                joints.len() - 1
            });
            link_index.insert(link.urdf_link.name.clone(), links.len());
            links.push(TreeLink {
                name: link.urdf_link.name.clone(),
                parent,
                local_pose: link.local_zero_pose,
                joint,
                spheres: link.spheres.clone(),
            });
        }

        KinematicTree {
            links,
            joints,
            nq: adr,
            nv: adr,
            link_index,
            joint_index,
        }
    }

    pub fn link_id(&self, name: &str) -> Option<usize> {
        self.link_index.get(name).copied()
    }

    pub fn joint_id(&self, name: &str) -> Option<usize> {
        self.joint_index.get(name).copied()
    }

    /// World pose of every link at `qpos`.
    pub fn fk(&self, qpos: &DVector<f64>) -> Vec<Isometry3<f64>> {
        assert_eq!(qpos.len(), self.nq);
        let mut poses = Vec::with_capacity(self.links.len());
        for link in &self.links {
            let parent = match link.parent {
                Some(p) => poses[p],
                None => Isometry3::identity(),
            };
            let motion = match link.joint {
                Some(j) => joint_motion(&self.joints[j], qpos[self.joints[j].qpos_adr]),
                None => Isometry3::identity(),
            };
            poses.push(parent * link.local_pose * motion);
        }
        poses
    }

    /// World axis and a world point on the axis of `joint`, given link poses.
    pub fn joint_world(&self, poses: &[Isometry3<f64>], joint: usize) -> (Vector3<f64>, Vector3<f64>) {
        let j = &self.joints[joint];
        let pose = &poses[j.link];
        (pose.rotation * j.axis, pose.translation.vector)
    }

    /// Geometric Jacobian of a world `point` rigidly attached to `link`,
    /// restricted to the joints whose qvel addresses appear in `qvel_cols`.
    ///
    /// Rows 0..3 are angular, rows 3..6 linear; column k corresponds to
    /// `qvel_cols[k]`. Revolute columns are `axis` / `axis x (point - origin)`,
    /// prismatic columns `0` / `axis`.
    pub fn frame_jacobian(
        &self,
        poses: &[Isometry3<f64>],
        link: usize,
        point: &Vector3<f64>,
        qvel_cols: &[usize],
    ) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(6, qvel_cols.len());
        let mut current = Some(link);
        while let Some(index) = current {
            let tree_link = &self.links[index];
            if let Some(joint) = tree_link.joint {
                let j = &self.joints[joint];
                if let Some(col) = qvel_cols.iter().position(|&c| c == j.qvel_adr) {
                    let (axis, origin) = self.joint_world(poses, joint);
                    match j.kind {
                        JointKind::Revolute | JointKind::Continuous => {
                            let linear = axis.cross(&(point - origin));
                            jacobian
                                .view_mut((0, col), (3, 1))
                                .copy_from_slice(axis.as_slice());
                            jacobian
                                .view_mut((3, col), (3, 1))
                                .copy_from_slice(linear.as_slice());
                        }
                        JointKind::Prismatic => {
                            jacobian
                                .view_mut((3, col), (3, 1))
                                .copy_from_slice(axis.as_slice());
                        }
                    }
                }
            }
            current = tree_link.parent;
        }
        jacobian
    }
}

fn joint_motion(joint: &TreeJoint, q: f64) -> Isometry3<f64> {
    match joint.kind {
        JointKind::Revolute | JointKind::Continuous => Isometry3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_axis_angle(&Unit::new_unchecked(joint.axis), q),
        ),
        JointKind::Prismatic => Isometry3::from_parts(
            Translation3::from(joint.axis * q),
            UnitQuaternion::identity(),
        ),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::multi_body::MultiBody;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    const PLANAR_URDF: &str = r#"
<robot name="planar">
  <link name="base"/>
  <link name="upper"/>
  <link name="lower"/>
  <joint name="shoulder" type="revolute">
    <origin xyz="0 0 0" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.14" upper="3.14" effort="10" velocity="3.14"/>
    <parent link="base"/>
    <child link="upper"/>
  </joint>
  <joint name="elbow" type="revolute">
    <origin xyz="1 0 0" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.14" upper="3.14" effort="10" velocity="3.14"/>
    <parent link="upper"/>
    <child link="lower"/>
  </joint>
</robot>
"#;

    fn planar() -> KinematicTree {
        let multi_body = MultiBody::from_urdf_str(PLANAR_URDF).unwrap();
        KinematicTree::from_multi_body(&multi_body)
    }

    #[test]
    fn test_addressing() {
        let tree = planar();
        assert_eq!(tree.nq, 2);
        assert_eq!(tree.nv, 2);
        let shoulder = tree.joint_id("shoulder").unwrap();
        let elbow = tree.joint_id("elbow").unwrap();
        assert_eq!(tree.joints[shoulder].qpos_adr, 0);
        assert_eq!(tree.joints[elbow].qpos_adr, 1);
        assert!(tree.joint_id("wrist").is_none());
    }

    #[test]
    fn test_fk() {
        let tree = planar();
        let lower = tree.link_id("lower").unwrap();

        let qpos = DVector::from_vec(vec![0.0, FRAC_PI_2]);
        let poses = tree.fk(&qpos);
        let p = poses[lower].translation.vector;
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-12);

        // elbow pose rotates the lower frame by pi/2 about z
        let (_, _, yaw) = poses[lower].rotation.euler_angles();
        assert_relative_eq!(yaw, FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_jacobian_against_finite_difference() {
        let tree = planar();
        let lower = tree.link_id("lower").unwrap();
        let qpos = DVector::from_vec(vec![0.3, -0.7]);
        let cols = vec![0, 1];

        // tip point one unit along the lower link
        let tip_local = Vector3::new(1.0, 0.0, 0.0);
        let poses = tree.fk(&qpos);
        let tip = poses[lower].transform_point(&tip_local.into()).coords;
        let jacobian = tree.frame_jacobian(&poses, lower, &tip, &cols);

        let eps = 1e-7;
        for col in 0..2 {
            let mut bumped = qpos.clone();
            bumped[col] += eps;
            let poses_b = tree.fk(&bumped);
            let tip_b = poses_b[lower].transform_point(&tip_local.into()).coords;
            let fd = (tip_b - tip) / eps;
            for row in 0..3 {
                assert_relative_eq!(jacobian[(3 + row, col)], fd[row], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_jacobian_column_subset() {
        let tree = planar();
        let lower = tree.link_id("lower").unwrap();
        let qpos = DVector::from_vec(vec![0.0, 0.0]);
        let poses = tree.fk(&qpos);
        let tip = poses[lower].translation.vector;

        // only the elbow column requested
        let jacobian = tree.frame_jacobian(&poses, lower, &tip, &[1]);
        assert_eq!(jacobian.ncols(), 1);
        // elbow is at the tip, so the linear part vanishes
        assert_relative_eq!(jacobian.view((3, 0), (3, 1)).norm(), 0.0, epsilon = 1e-12);
        // angular part is the z axis
        assert_relative_eq!(jacobian[(2, 0)], 1.0, epsilon = 1e-12);
    }
}
