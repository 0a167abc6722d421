use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use petgraph::visit::Bfs;
use thiserror::Error;
use urdf_rs::{read_file, read_from_string};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Urdf(#[from] urdf_rs::UrdfError),
    #[error("robot has no root link")]
    NoRootLink,
    #[error("unknown link `{0}`")]
    UnknownLink(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointKind {
    Revolute,
    Continuous,
    Prismatic,
}

#[derive(Debug, Clone)]
pub struct JointSpec {
    pub kind: JointKind,
    /// Unit axis in the joint frame.
    pub axis: Vector3<f64>,
    pub range: Option<(f64, f64)>,
    pub velocity_limit: Option<f64>,
}

/// Sphere collision geometry, center in the link frame.
#[derive(Debug, Clone)]
pub struct CollisionSphere {
    pub center: Vector3<f64>,
    pub radius: f64,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub local_zero_pose: Isometry3<f64>,
    pub global_zero_pose: Isometry3<f64>,
    /// None for the root link and for fixed joints.
    pub moving_joint: Option<JointSpec>,
    pub spheres: Vec<CollisionSphere>,

    pub joint: Option<urdf_rs::Joint>,
    pub urdf_link: urdf_rs::Link,
}

#[derive(Debug, Clone)]
pub struct MultiBody {
    // link index graph
    graph: petgraph::graphmap::DiGraphMap<usize, ()>,
    // map index -> link
    pub link_map: HashMap<usize, Link>,
    pub root_index: usize,
    pub leafs_index: Vec<usize>,
    pub name: String,
}

impl MultiBody {
    pub fn from_urdf(path: impl AsRef<Path>) -> Result<MultiBody, ModelError> {
        let robot = read_file(path)?;
        parse_robot(robot)
    }

    pub fn from_urdf_str(urdf: &str) -> Result<MultiBody, ModelError> {
        let robot = read_from_string(urdf)?;
        parse_robot(robot)
    }

    pub fn bfs(&self, start: usize) -> Vec<usize> {
        let bfs = petgraph::visit::Bfs::new(&self.graph, start);
        let iter = BfsIter {
            graph: &self.graph,
            bfs,
        };
        iter.collect()
    }

    pub fn get_link(&self, index: usize) -> Option<&Link> {
        self.link_map.get(&index)
    }

    fn get_mut_link(&mut self, index: usize) -> &mut Link {
        self.link_map.get_mut(&index).unwrap()
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.graph
            .neighbors_directed(index, petgraph::Direction::Incoming)
            .next()
    }

    pub fn children(&self, index: usize) -> Vec<usize> {
        self.graph
            .neighbors_directed(index, petgraph::Direction::Outgoing)
            .collect()
    }

    pub fn link_index(&self, name: &str) -> Result<usize, ModelError> {
        self.link_map
            .iter()
            .find(|(_, link)| link.urdf_link.name == name)
            .map(|(index, _)| *index)
            .ok_or_else(|| ModelError::UnknownLink(name.to_owned()))
    }

    /// All links at or below `root` in the tree.
    pub fn subtree(&self, root: usize) -> Vec<usize> {
        self.bfs(root)
    }
}

struct BfsIter<'a> {
    graph: &'a petgraph::graphmap::DiGraphMap<usize, ()>,
    bfs: Bfs<usize, HashSet<usize>>,
}

impl<'a> Iterator for BfsIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        self.bfs.next(self.graph)
    }
}

fn parse_robot(robot: urdf_rs::Robot) -> Result<MultiBody, ModelError> {
    // link name -> index
    let index_of: HashMap<String, usize> = robot
        .links
        .iter()
        .enumerate()
        .map(|(index, link)| (link.name.clone(), index))
        .collect();

    // child link index -> joint moving it
    let joint_of: HashMap<usize, urdf_rs::Joint> = robot
        .joints
        .iter()
        .filter_map(|joint| index_of.get(&joint.child.link).map(|i| (*i, joint.clone())))
        .collect();

    // find root link index
    let root = (0..robot.links.len())
        .find(|index| !joint_of.contains_key(index))
        .ok_or(ModelError::NoRootLink)?;

    // find leaf link indices
    let leafs = robot
        .links
        .iter()
        .enumerate()
        .filter(|(_, link)| {
            robot
                .joints
                .iter()
                .all(|joint| joint.parent.link != link.name)
        })
        .map(|(index, _)| index)
        .collect::<Vec<_>>();

    let mut graph = petgraph::graphmap::DiGraphMap::new();
    for index in 0..robot.links.len() {
        graph.add_node(index);
    }
    for joint in &robot.joints {
        let parent = index_of
            .get(&joint.parent.link)
            .ok_or_else(|| ModelError::UnknownLink(joint.parent.link.clone()))?;
        let child = index_of
            .get(&joint.child.link)
            .ok_or_else(|| ModelError::UnknownLink(joint.child.link.clone()))?;
        graph.add_edge(*parent, *child, ());
    }

    let link_map = robot
        .links
        .into_iter()
        .enumerate()
        .map(|(i, l)| {
            let joint = joint_of.get(&i).cloned();
            (
                i,
                Link {
                    local_zero_pose: Isometry3::identity(),
                    global_zero_pose: Isometry3::identity(),
                    moving_joint: joint.as_ref().and_then(joint_spec),
                    spheres: collision_spheres(&l),
                    urdf_link: l,
                    joint,
                },
            )
        })
        .collect::<HashMap<_, _>>();

    let mut multi_body = MultiBody {
        graph,
        link_map,
        name: robot.name,
        root_index: root,
        leafs_index: leafs,
    };

    let bfs = multi_body.bfs(root);
    for link in bfs {
        if let Some(parent_index) = multi_body.parent(link) {
            let parent_global_pose = multi_body.get_link(parent_index).unwrap().global_zero_pose;
            let relative_pose =
                joint_relative_pose(multi_body.get_link(link).unwrap().joint.as_ref().unwrap());
            multi_body.get_mut_link(link).local_zero_pose = relative_pose;
            multi_body.get_mut_link(link).global_zero_pose = parent_global_pose * relative_pose;
        }
    }
    Ok(multi_body)
}

fn joint_spec(joint: &urdf_rs::Joint) -> Option<JointSpec> {
    let kind = match joint.joint_type {
        urdf_rs::JointType::Revolute => JointKind::Revolute,
        urdf_rs::JointType::Continuous => JointKind::Continuous,
        urdf_rs::JointType::Prismatic => JointKind::Prismatic,
        _ => return None,
    };
    let axis = Vector3::new(joint.axis.xyz[0], joint.axis.xyz[1], joint.axis.xyz[2]);
    let range = match kind {
        // continuous joints carry no meaningful range
        JointKind::Continuous => None,
        _ => (joint.limit.lower < joint.limit.upper)
            .then_some((joint.limit.lower, joint.limit.upper)),
    };
    let velocity_limit = (joint.limit.velocity > 0.0).then_some(joint.limit.velocity);
    Some(JointSpec {
        kind,
        axis: axis.normalize(),
        range,
        velocity_limit,
    })
}

fn collision_spheres(link: &urdf_rs::Link) -> Vec<CollisionSphere> {
    link.collision
        .iter()
        .filter_map(|collision| match collision.geometry {
            urdf_rs::Geometry::Sphere { radius } => Some(CollisionSphere {
                center: Vector3::new(
                    collision.origin.xyz.0[0],
                    collision.origin.xyz.0[1],
                    collision.origin.xyz.0[2],
                ),
                radius,
            }),
            _ => None,
        })
        .collect()
}

fn joint_relative_pose(joint: &urdf_rs::Joint) -> Isometry3<f64> {
    origin_to_isometry(&joint.origin)
}

fn origin_to_isometry(origin: &urdf_rs::Pose) -> Isometry3<f64> {
    let rpy = origin.rpy.0;
    let xyz = origin.xyz.0;
    Isometry3::from_parts(
        Translation3::new(xyz[0], xyz[1], xyz[2]),
        UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
    )
}
