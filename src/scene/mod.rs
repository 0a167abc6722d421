use nalgebra::Translation3;

use crate::engine::SimEngine;
use crate::multi_body::MultiBody;
use crate::targets::Side;
use crate::teleop::{ArmDescription, TeleopError, TeleopSetup};

/// Built-in dual-arm scene: two 6-DOF arms on a shared torso, one prismatic
/// gripper each, collision spheres on the forearms and wrists.
pub const DUAL_ARM_URDF: &str = r#"
<robot name="dual_arm">
  <link name="torso">
    <collision>
      <origin xyz="0 0 0.4" rpy="0 0 0"/>
      <geometry><sphere radius="0.12"/></geometry>
    </collision>
  </link>

  <link name="left_base"/>
  <link name="left_shoulder_link"/>
  <link name="left_upper_arm"/>
  <link name="left_forearm">
    <collision>
      <origin xyz="0 0 0.1" rpy="0 0 0"/>
      <geometry><sphere radius="0.05"/></geometry>
    </collision>
  </link>
  <link name="left_roll_link"/>
  <link name="left_wrist_link">
    <collision>
      <origin xyz="0 0 0.03" rpy="0 0 0"/>
      <geometry><sphere radius="0.04"/></geometry>
    </collision>
  </link>
  <link name="left_gripper_base"/>
  <link name="left_gripper_finger"/>

  <joint name="left_mount" type="fixed">
    <origin xyz="-0.25 0 0.75" rpy="0 0 0"/>
    <parent link="torso"/>
    <child link="left_base"/>
  </joint>
  <joint name="left_waist" type="revolute">
    <origin xyz="0 0 0.05" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.14" upper="3.14" effort="30" velocity="3.141592653589793"/>
    <parent link="left_base"/>
    <child link="left_shoulder_link"/>
  </joint>
  <joint name="left_shoulder" type="revolute">
    <origin xyz="0 0 0.05" rpy="0 0 0"/>
    <axis xyz="0 1 0"/>
    <limit lower="-1.85" upper="1.85" effort="30" velocity="3.141592653589793"/>
    <parent link="left_shoulder_link"/>
    <child link="left_upper_arm"/>
  </joint>
  <joint name="left_elbow" type="revolute">
    <origin xyz="0 0 0.30" rpy="0 0 0"/>
    <axis xyz="0 1 0"/>
    <limit lower="-2.6" upper="2.6" effort="30" velocity="3.141592653589793"/>
    <parent link="left_upper_arm"/>
    <child link="left_forearm"/>
  </joint>
  <joint name="left_forearm_roll" type="revolute">
    <origin xyz="0 0 0.05" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.14" upper="3.14" effort="30" velocity="3.141592653589793"/>
    <parent link="left_forearm"/>
    <child link="left_roll_link"/>
  </joint>
  <joint name="left_wrist_angle" type="revolute">
    <origin xyz="0 0 0.20" rpy="0 0 0"/>
    <axis xyz="0 1 0"/>
    <limit lower="-1.75" upper="2.15" effort="30" velocity="3.141592653589793"/>
    <parent link="left_roll_link"/>
    <child link="left_wrist_link"/>
  </joint>
  <joint name="left_wrist_rotate" type="revolute">
    <origin xyz="0 0 0.05" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.14" upper="3.14" effort="30" velocity="3.141592653589793"/>
    <parent link="left_wrist_link"/>
    <child link="left_gripper_base"/>
  </joint>
  <joint name="left_gripper_joint" type="prismatic">
    <origin xyz="0 0 0.04" rpy="0 0 0"/>
    <axis xyz="1 0 0"/>
    <limit lower="0.0" upper="0.045" effort="10" velocity="1.0"/>
    <parent link="left_gripper_base"/>
    <child link="left_gripper_finger"/>
  </joint>

  <link name="right_base"/>
  <link name="right_shoulder_link"/>
  <link name="right_upper_arm"/>
  <link name="right_forearm">
    <collision>
      <origin xyz="0 0 0.1" rpy="0 0 0"/>
      <geometry><sphere radius="0.05"/></geometry>
    </collision>
  </link>
  <link name="right_roll_link"/>
  <link name="right_wrist_link">
    <collision>
      <origin xyz="0 0 0.03" rpy="0 0 0"/>
      <geometry><sphere radius="0.04"/></geometry>
    </collision>
  </link>
  <link name="right_gripper_base"/>
  <link name="right_gripper_finger"/>

  <joint name="right_mount" type="fixed">
    <origin xyz="0.25 0 0.75" rpy="0 0 0"/>
    <parent link="torso"/>
    <child link="right_base"/>
  </joint>
  <joint name="right_waist" type="revolute">
    <origin xyz="0 0 0.05" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.14" upper="3.14" effort="30" velocity="3.141592653589793"/>
    <parent link="right_base"/>
    <child link="right_shoulder_link"/>
  </joint>
  <joint name="right_shoulder" type="revolute">
    <origin xyz="0 0 0.05" rpy="0 0 0"/>
    <axis xyz="0 1 0"/>
    <limit lower="-1.85" upper="1.85" effort="30" velocity="3.141592653589793"/>
    <parent link="right_shoulder_link"/>
    <child link="right_upper_arm"/>
  </joint>
  <joint name="right_elbow" type="revolute">
    <origin xyz="0 0 0.30" rpy="0 0 0"/>
    <axis xyz="0 1 0"/>
    <limit lower="-2.6" upper="2.6" effort="30" velocity="3.141592653589793"/>
    <parent link="right_upper_arm"/>
    <child link="right_forearm"/>
  </joint>
  <joint name="right_forearm_roll" type="revolute">
    <origin xyz="0 0 0.05" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.14" upper="3.14" effort="30" velocity="3.141592653589793"/>
    <parent link="right_forearm"/>
    <child link="right_roll_link"/>
  </joint>
  <joint name="right_wrist_angle" type="revolute">
    <origin xyz="0 0 0.20" rpy="0 0 0"/>
    <axis xyz="0 1 0"/>
    <limit lower="-1.75" upper="2.15" effort="30" velocity="3.141592653589793"/>
    <parent link="right_roll_link"/>
    <child link="right_wrist_link"/>
  </joint>
  <joint name="right_wrist_rotate" type="revolute">
    <origin xyz="0 0 0.05" rpy="0 0 0"/>
    <axis xyz="0 0 1"/>
    <limit lower="-3.14" upper="3.14" effort="30" velocity="3.141592653589793"/>
    <parent link="right_wrist_link"/>
    <child link="right_gripper_base"/>
  </joint>
  <joint name="right_gripper_joint" type="prismatic">
    <origin xyz="0 0 0.04" rpy="0 0 0"/>
    <axis xyz="1 0 0"/>
    <limit lower="0.0" upper="0.045" effort="10" velocity="1.0"/>
    <parent link="right_gripper_base"/>
    <child link="right_gripper_finger"/>
  </joint>
</robot>
"#;

const ARM_JOINTS: [&str; 6] = [
    "waist",
    "shoulder",
    "elbow",
    "forearm_roll",
    "wrist_angle",
    "wrist_rotate",
];

fn arm_joint_names(prefix: &str) -> Vec<String> {
    ARM_JOINTS.iter().map(|n| format!("{prefix}_{n}")).collect()
}

/// Elbow-down home pose, away from the stretched-out singularity.
pub fn set_home_pose(engine: &mut SimEngine) {
    for prefix in ["left", "right"] {
        for (name, q) in [
            ("shoulder", 0.5),
            ("elbow", -1.0),
            ("wrist_angle", 0.5),
            ("gripper_joint", 0.02),
        ] {
            let joint = engine.joint_id(&format!("{prefix}_{name}")).unwrap();
            let adr = engine.tree.joints[joint].qpos_adr;
            engine.qpos[adr] = q;
        }
    }
}

/// Build the built-in scene: engine with sites, actuators, geom groups, the
/// home pose applied, and the matching controller wiring.
pub fn build_scene() -> Result<(SimEngine, TeleopSetup), TeleopError> {
    let multi_body = MultiBody::from_urdf_str(DUAL_ARM_URDF)?;
    let mut engine = SimEngine::new(&multi_body);

    engine.add_site(
        "left_gripper",
        "left_gripper_base",
        Translation3::new(0.0, 0.0, 0.08).into(),
    )?;
    engine.add_site(
        "right_gripper",
        "right_gripper_base",
        Translation3::new(0.0, 0.0, 0.08).into(),
    )?;

    set_home_pose(&mut engine);

    // actuators snapshot the current pose as their initial target
    for prefix in ["left", "right"] {
        for name in arm_joint_names(prefix) {
            engine.add_actuator(&name, &name)?;
        }
        engine.add_actuator(
            &format!("{prefix}_gripper_actuator"),
            &format!("{prefix}_gripper_joint"),
        )?;
    }

    engine.define_subtree_group("left_wrist", "left_wrist_link")?;
    engine.define_subtree_group("right_wrist", "right_wrist_link")?;
    engine.define_group("frame", &["torso"])?;

    let setup = TeleopSetup {
        left: ArmDescription {
            side: Side::Left,
            joints: arm_joint_names("left"),
            actuators: arm_joint_names("left"),
            site: "left_gripper".into(),
        },
        right: ArmDescription {
            side: Side::Right,
            joints: arm_joint_names("right"),
            actuators: arm_joint_names("right"),
            site: "right_gripper".into(),
        },
        left_gripper: "left_gripper_actuator".into(),
        right_gripper: "right_gripper_actuator".into(),
        collision_pairs: vec![
            ("left_wrist".into(), "right_wrist".into()),
            ("left_wrist".into(), "frame".into()),
            ("right_wrist".into(), "frame".into()),
        ],
    };
    Ok((engine, setup))
}
