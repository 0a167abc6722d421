use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, Isometry3, Vector3};
use thiserror::Error;

use crate::configuration::ReducedConfiguration;
use crate::kinematics::KinematicTree;
use crate::multi_body::MultiBody;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown joint `{0}`")]
    UnknownJoint(String),
    #[error("unknown link `{0}`")]
    UnknownLink(String),
    #[error("unknown site `{0}`")]
    UnknownSite(String),
    #[error("unknown actuator `{0}`")]
    UnknownActuator(String),
    #[error("unknown geom group `{0}`")]
    UnknownGeomGroup(String),
}

#[derive(Debug, Clone)]
pub struct Site {
    pub name: String,
    pub link: usize,
    pub local: Isometry3<f64>,
}

/// Position actuator: `ctrl` is the target position of one joint.
#[derive(Debug, Clone)]
pub struct Actuator {
    pub name: String,
    pub joint: usize,
}

#[derive(Debug, Clone)]
pub struct Geom {
    pub name: String,
    pub link: usize,
    pub center: Vector3<f64>,
    pub radius: f64,
}

/// Closest pair between two geom groups.
#[derive(Debug, Clone)]
pub struct Contact {
    /// Surface-to-surface distance (negative when penetrating).
    pub distance: f64,
    /// Unit normal pointing from geom `b` towards geom `a`.
    pub normal: Vector3<f64>,
    pub point_a: Vector3<f64>,
    pub point_b: Vector3<f64>,
    pub geom_a: usize,
    pub geom_b: usize,
}

/// Kinematic simulator: global position/velocity/control state over a
/// [`KinematicTree`], plus the named handles (sites, actuators, geom groups)
/// the controller resolves at startup.
///
/// `step` runs a position servo towards the actuator targets; there are no
/// dynamics.
#[derive(Debug)]
pub struct SimEngine {
    pub tree: KinematicTree,
    pub qpos: DVector<f64>,
    pub qvel: DVector<f64>,
    pub ctrl: DVector<f64>,
    pub time: f64,

    sites: Vec<Site>,
    site_index: HashMap<String, usize>,
    actuators: Vec<Actuator>,
    actuator_index: HashMap<String, usize>,
    geoms: Vec<Geom>,
    groups: Vec<Vec<usize>>,
    group_index: HashMap<String, usize>,
    markers: HashMap<String, Isometry3<f64>>,
}

impl SimEngine {
    pub fn new(multi_body: &MultiBody) -> SimEngine {
        let tree = KinematicTree::from_multi_body(multi_body);
        let geoms = tree
            .links
            .iter()
            .enumerate()
            .flat_map(|(link, l)| {
                l.spheres.iter().enumerate().map(move |(k, sphere)| Geom {
                    name: format!("{}_{k}", l.name),
                    link,
                    center: sphere.center,
                    radius: sphere.radius,
                })
            })
            .collect();
        let nq = tree.nq;
        let nv = tree.nv;
        SimEngine {
            tree,
            qpos: DVector::zeros(nq),
            qvel: DVector::zeros(nv),
            ctrl: DVector::zeros(0),
            time: 0.0,
            sites: Vec::new(),
            site_index: HashMap::new(),
            actuators: Vec::new(),
            actuator_index: HashMap::new(),
            geoms,
            groups: Vec::new(),
            group_index: HashMap::new(),
            markers: HashMap::new(),
        }
    }

    pub fn joint_id(&self, name: &str) -> Result<usize, EngineError> {
        self.tree
            .joint_id(name)
            .ok_or_else(|| EngineError::UnknownJoint(name.to_owned()))
    }

    pub fn link_id(&self, name: &str) -> Result<usize, EngineError> {
        self.tree
            .link_id(name)
            .ok_or_else(|| EngineError::UnknownLink(name.to_owned()))
    }

    pub fn add_site(
        &mut self,
        name: &str,
        link: &str,
        local: Isometry3<f64>,
    ) -> Result<usize, EngineError> {
        let link = self.link_id(link)?;
        let id = self.sites.len();
        self.site_index.insert(name.to_owned(), id);
        self.sites.push(Site {
            name: name.to_owned(),
            link,
            local,
        });
        Ok(id)
    }

    pub fn site_id(&self, name: &str) -> Result<usize, EngineError> {
        self.site_index
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownSite(name.to_owned()))
    }

    pub fn add_actuator(&mut self, name: &str, joint: &str) -> Result<usize, EngineError> {
        let joint = self.joint_id(joint)?;
        let id = self.actuators.len();
        self.actuator_index.insert(name.to_owned(), id);
        self.actuators.push(Actuator {
            name: name.to_owned(),
            joint,
        });
        // a fresh actuator holds its joint where it is
        let q = self.qpos[self.tree.joints[joint].qpos_adr];
        self.ctrl = self.ctrl.clone().insert_row(id, q);
        Ok(id)
    }

    pub fn actuator_id(&self, name: &str) -> Result<usize, EngineError> {
        self.actuator_index
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownActuator(name.to_owned()))
    }

    pub fn set_ctrl(&mut self, actuator: usize, value: f64) {
        self.ctrl[actuator] = value;
    }

    /// Geom group from explicit link names.
    pub fn define_group(&mut self, name: &str, links: &[&str]) -> Result<usize, EngineError> {
        let mut ids = Vec::new();
        for link in links {
            let link = self.link_id(link)?;
            ids.extend(
                self.geoms
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| g.link == link)
                    .map(|(id, _)| id),
            );
        }
        let id = self.groups.len();
        self.group_index.insert(name.to_owned(), id);
        self.groups.push(ids);
        Ok(id)
    }

    /// Geom group from every link at or below `root`.
    pub fn define_subtree_group(&mut self, name: &str, root: &str) -> Result<usize, EngineError> {
        let root = self.link_id(root)?;
        let mut members = vec![root];
        // links are stored root-first, so one forward pass finds the subtree
        for (index, link) in self.tree.links.iter().enumerate() {
            if let Some(parent) = link.parent {
                if members.contains(&parent) && !members.contains(&index) {
                    members.push(index);
                }
            }
        }
        let ids = self
            .geoms
            .iter()
            .enumerate()
            .filter(|(_, g)| members.contains(&g.link))
            .map(|(id, _)| id)
            .collect();
        let id = self.groups.len();
        self.group_index.insert(name.to_owned(), id);
        self.groups.push(ids);
        Ok(id)
    }

    pub fn group_id(&self, name: &str) -> Result<usize, EngineError> {
        self.group_index
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownGeomGroup(name.to_owned()))
    }

    /// World pose of every link at the current `qpos`.
    pub fn fk(&self) -> Vec<Isometry3<f64>> {
        self.tree.fk(&self.qpos)
    }

    pub fn site_pose_in(&self, poses: &[Isometry3<f64>], site: usize) -> Isometry3<f64> {
        let site = &self.sites[site];
        poses[site.link] * site.local
    }

    pub fn site_pose(&self, site: usize) -> Isometry3<f64> {
        self.site_pose_in(&self.fk(), site)
    }

    pub fn site_link(&self, site: usize) -> usize {
        self.sites[site].link
    }

    /// 6xN geometric Jacobian of a site over the given qvel columns.
    pub fn site_jacobian_in(
        &self,
        poses: &[Isometry3<f64>],
        site: usize,
        qvel_cols: &[usize],
    ) -> DMatrix<f64> {
        let point = self.site_pose_in(poses, site).translation.vector;
        self.tree
            .frame_jacobian(poses, self.sites[site].link, &point, qvel_cols)
    }

    /// Closest sphere pair between two geom groups, if both are non-empty.
    pub fn group_distance_in(
        &self,
        poses: &[Isometry3<f64>],
        group_a: usize,
        group_b: usize,
    ) -> Option<Contact> {
        let mut best: Option<Contact> = None;
        for &a in &self.groups[group_a] {
            for &b in &self.groups[group_b] {
                let ga = &self.geoms[a];
                let gb = &self.geoms[b];
                let ca = poses[ga.link].transform_point(&ga.center.into()).coords;
                let cb = poses[gb.link].transform_point(&gb.center.into()).coords;
                let gap = ca - cb;
                let centers = gap.norm();
                if centers < 1e-12 {
                    continue;
                }
                let normal = gap / centers;
                let distance = centers - ga.radius - gb.radius;
                if best.as_ref().is_none_or(|c| distance < c.distance) {
                    best = Some(Contact {
                        distance,
                        normal,
                        point_a: ca - normal * ga.radius,
                        point_b: cb + normal * gb.radius,
                        geom_a: a,
                        geom_b: b,
                    });
                }
            }
        }
        best
    }

    pub fn geom(&self, id: usize) -> &Geom {
        &self.geoms[id]
    }

    /// Write one arm's reduced state into the global mirror.
    pub fn write_configuration(&mut self, configuration: &ReducedConfiguration) {
        for (k, &index) in configuration.qpos_indices().iter().enumerate() {
            self.qpos[index] = configuration.q[k];
        }
        for (k, &index) in configuration.qvel_indices().iter().enumerate() {
            self.qvel[index] = configuration.dq[k];
        }
    }

    /// Advance one timestep: actuated joints servo towards their clamped
    /// targets (bounded by the joint velocity limit), time moves forward.
    pub fn step(&mut self, dt: f64) {
        for (id, actuator) in self.actuators.iter().enumerate() {
            let joint = &self.tree.joints[actuator.joint];
            let mut target = self.ctrl[id];
            if let Some((lo, hi)) = joint.range {
                target = target.clamp(lo, hi);
            }
            let q = self.qpos[joint.qpos_adr];
            let step = match joint.velocity_limit {
                Some(limit) => (target - q).clamp(-limit * dt, limit * dt),
                None => target - q,
            };
            self.qpos[joint.qpos_adr] = q + step;
        }
        self.time += dt;
    }

    pub fn set_marker(&mut self, name: &str, pose: Isometry3<f64>) {
        self.markers.insert(name.to_owned(), pose);
    }

    pub fn marker(&self, name: &str) -> Option<&Isometry3<f64>> {
        self.markers.get(name)
    }
}
