//! Sampled reachable workspaces for robot limbs.
//!
//! A limb's configuration space is sampled into end-effector positions,
//! which are indexed in an occupancy octree and flattened into boxes
//! ([`container::SampleContainer`]). Separately, convex kinematic constraint
//! meshes are turned into half-space sets that can be placed in a world frame
//! and tested against points ([`constraints`]).

pub mod boxes;
pub mod constraints;
pub mod container;
pub mod diagnostics;
pub mod error;
pub mod limb;
pub mod octree;
pub mod sample;
pub mod sampling;
pub mod settings;

pub use constraints::{
    check_reachability, load_constraints, load_constraints_scaled, ConstraintPolicy,
    ConstraintSet, Reachability, TransformedConstraints,
};
pub use container::SampleContainer;
pub use diagnostics::{Diagnostics, LogDiagnostics, NoopDiagnostics};
pub use error::{Error, LoadError, Result};
pub use limb::{EffectorPose, ForwardKinematics, JointRange, Limb, SerialChain};
pub use sample::Sample;
