use nalgebra::{Point3, UnitQuaternion};

use crate::limb::EffectorPose;

/// One reachable configuration of a limb and where it puts the effector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: usize,
    pub configuration: Vec<f64>,
    pub effector_position: Point3<f64>,
    pub effector_orientation: Option<UnitQuaternion<f64>>,
    /// Distance of the effector from the limb frame origin.
    pub reach: f64,
    /// Yoshikawa manipulability of the positional Jacobian at this
    /// configuration. Zero at singularities and for limbs without joints.
    pub manipulability: f64,
}

impl Sample {
    pub fn new(id: usize, configuration: Vec<f64>, pose: EffectorPose, manipulability: f64) -> Self {
        Self {
            id,
            configuration,
            effector_position: pose.position,
            effector_orientation: pose.orientation,
            reach: pose.position.coords.norm(),
            manipulability,
        }
    }

    /// Sample that only records a position, for callers with their own
    /// sampler.
    pub fn at_position(id: usize, position: Point3<f64>) -> Self {
        Self::new(id, Vec::new(), EffectorPose::from_position(position), 0.0)
    }
}
