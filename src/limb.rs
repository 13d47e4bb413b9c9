//! Limb descriptors and the forward-kinematics capability they expose.
//!
//! The sampler never sees a robot model. It sees a [`Limb`]: a list of joint
//! ranges plus something implementing [`ForwardKinematics`] that maps a
//! configuration to an end-effector pose in the limb's local frame.
//!
//! [`SerialChain`] is a small built-in implementation for limbs made of
//! revolute and prismatic joints separated by fixed link transforms.

use nalgebra::{Isometry3, Point3, Translation3, Unit, UnitQuaternion, Vector3};
use serde::Deserialize;

use crate::boxes::Aabb;

/// Closed interval of admissible values for one joint.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct JointRange {
    pub min: f64,
    pub max: f64,
}

impl JointRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// A range is usable when both bounds are finite and ordered and its
    /// width is representable.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite()
            && self.max.is_finite()
            && self.min <= self.max
            && self.width().is_finite()
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// `count` evenly spaced values covering the range, both ends included.
    /// A single level sits at the middle of the range.
    pub fn levels(&self, count: usize) -> Vec<f64> {
        match count {
            0 => Vec::new(),
            1 => vec![self.min + 0.5 * self.width()],
            _ => {
                let step = self.width() / (count - 1) as f64;
                (0..count).map(|i| self.min + step * i as f64).collect()
            }
        }
    }
}

/// End-effector pose produced by forward kinematics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectorPose {
    pub position: Point3<f64>,
    pub orientation: Option<UnitQuaternion<f64>>,
}

impl EffectorPose {
    pub fn from_position(position: Point3<f64>) -> Self {
        Self {
            position,
            orientation: None,
        }
    }
}

impl From<Isometry3<f64>> for EffectorPose {
    fn from(pose: Isometry3<f64>) -> Self {
        Self {
            position: Point3::from(pose.translation.vector),
            orientation: Some(pose.rotation),
        }
    }
}

/// Maps a joint configuration to the end-effector pose in the limb frame.
///
/// Implementations must be pure: the sampler evaluates them from several
/// threads at once.
pub trait ForwardKinematics: Send + Sync {
    fn effector_pose(&self, configuration: &[f64]) -> EffectorPose;
}

impl<F> ForwardKinematics for F
where
    F: Fn(&[f64]) -> EffectorPose + Send + Sync,
{
    fn effector_pose(&self, configuration: &[f64]) -> EffectorPose {
        self(configuration)
    }
}

/// Motion type of a joint in a [`SerialChain`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JointKind {
    /// Rotation by the joint value (radians) about the axis.
    Revolute(Unit<Vector3<f64>>),
    /// Translation by the joint value along the axis.
    Prismatic(Unit<Vector3<f64>>),
}

/// One joint of a serial chain: a fixed transform from the previous link
/// followed by the joint motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainJoint {
    pub origin: Isometry3<f64>,
    pub kind: JointKind,
}

impl ChainJoint {
    fn motion(&self, value: f64) -> Isometry3<f64> {
        match self.kind {
            JointKind::Revolute(axis) => Isometry3::from_parts(
                Translation3::identity(),
                UnitQuaternion::from_axis_angle(&axis, value),
            ),
            JointKind::Prismatic(axis) => Isometry3::from_parts(
                Translation3::from(axis.into_inner() * value),
                UnitQuaternion::identity(),
            ),
        }
    }
}

/// Open kinematic chain evaluated by composing link and joint transforms.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialChain {
    joints: Vec<ChainJoint>,
    tip: Isometry3<f64>,
}

impl SerialChain {
    /// Creates an empty chain whose effector sits at `tip` relative to the
    /// last joint.
    pub fn new(tip: Isometry3<f64>) -> Self {
        Self {
            joints: Vec::new(),
            tip,
        }
    }

    pub fn with_joint(mut self, origin: Isometry3<f64>, kind: JointKind) -> Self {
        self.joints.push(ChainJoint { origin, kind });
        self
    }

    pub fn revolute(self, origin: Isometry3<f64>, axis: Vector3<f64>) -> Self {
        self.with_joint(origin, JointKind::Revolute(Unit::new_normalize(axis)))
    }

    pub fn prismatic(self, origin: Isometry3<f64>, axis: Vector3<f64>) -> Self {
        self.with_joint(origin, JointKind::Prismatic(Unit::new_normalize(axis)))
    }

    pub fn joints(&self) -> &[ChainJoint] {
        &self.joints
    }
}

impl ForwardKinematics for SerialChain {
    fn effector_pose(&self, configuration: &[f64]) -> EffectorPose {
        let pose = self
            .joints
            .iter()
            .zip(configuration)
            .fold(Isometry3::identity(), |pose, (joint, &value)| {
                pose * joint.origin * joint.motion(value)
            });
        EffectorPose::from(pose * self.tip)
    }
}

/// A limb as seen by the sampler: joint ranges, forward kinematics and an
/// optional declared workspace.
pub struct Limb {
    name: String,
    ranges: Vec<JointRange>,
    kinematics: Box<dyn ForwardKinematics>,
    workspace: Option<Aabb>,
}

impl Limb {
    pub fn new(
        name: impl Into<String>,
        ranges: Vec<JointRange>,
        kinematics: impl ForwardKinematics + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            ranges,
            kinematics: Box::new(kinematics),
            workspace: None,
        }
    }

    /// Declares the box every reachable effector position must lie in.
    pub fn with_workspace(mut self, workspace: Aabb) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ranges(&self) -> &[JointRange] {
        &self.ranges
    }

    pub fn num_joints(&self) -> usize {
        self.ranges.len()
    }

    pub fn workspace(&self) -> Option<&Aabb> {
        self.workspace.as_ref()
    }

    pub fn effector_pose(&self, configuration: &[f64]) -> EffectorPose {
        self.kinematics.effector_pose(configuration)
    }
}

impl std::fmt::Debug for Limb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limb")
            .field("name", &self.name)
            .field("ranges", &self.ranges)
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}
