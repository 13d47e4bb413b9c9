//! Axis-aligned boxes derived from occupied octree leaves.
//!
//! The planner does not walk the octree for collision and candidate
//! queries. It works on a flat list of cubes, one per occupied leaf, each
//! carrying the occupancy probability of its cell and the threshold it was
//! compared against. Boxes copy their geometry out of the tree and keep no
//! reference to it.
//!
//! # Key Components
//!
//! - [`Aabb`]: Axis-aligned bounding boxes for region queries
//! - [`LeafBox`]: One occupied leaf as a cube with occupancy tags
//! - [`boxes_from_octree`]: Flattening of a finished tree

use nalgebra::{Point3, Vector3};

use crate::error::Result;
use crate::octree::{probability, OccupancyOctree};

/// Axis-aligned bounding box for region queries.
///
/// **Context**: Region queries against the sampled workspace (which leaf
/// boxes or samples lie in a volume) are answered with simple interval
/// tests before any finer geometry is considered.
///
/// **How it Works**: Stores minimum and maximum coordinates along each axis.
/// Bounds are inclusive on both sides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    /// Builds a box from two opposite corners in any order.
    pub fn new(a: Point3<f64>, b: Point3<f64>) -> Self {
        Self {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }

    /// Cube of half edge `half_extent` around `center`.
    pub fn cube(center: Point3<f64>, half_extent: f64) -> Self {
        let half = Vector3::repeat(half_extent);
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn contains(&self, point: &Point3<f64>) -> bool {
        (0..3).all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }

    /// True when the boxes intersect or touch.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        (0..3).all(|axis| self.min[axis] <= other.max[axis] && self.max[axis] >= other.min[axis])
    }
}

/// Cube standing in for one occupied leaf of the occupancy tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafBox {
    pub center: Point3<f64>,
    pub half_extent: f64,
    /// Occupancy probability of the leaf.
    pub occupancy_cost: f64,
    /// Probability above which the tree counts a cell as occupied.
    pub occupancy_threshold: f64,
}

impl LeafBox {
    pub fn edge_length(&self) -> f64 {
        2.0 * self.half_extent
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::cube(self.center, self.half_extent)
    }

    pub fn contains(&self, point: &Point3<f64>) -> bool {
        self.aabb().contains(point)
    }

    pub fn intersects(&self, region: &Aabb) -> bool {
        self.aabb().overlaps(region)
    }
}

/// One box per leaf whose occupancy exceeds the tree threshold.
///
/// The tree should have had its inner occupancy updated; leaves are read as
/// they are, so the list only depends on the final tree state.
pub fn boxes_from_octree(tree: &OccupancyOctree) -> Result<Vec<LeafBox>> {
    let threshold = tree.params().occupancy_threshold;
    let occupied = tree
        .leaves()
        .filter(|leaf| tree.is_occupied_value(leaf.log_odds));

    let mut boxes = Vec::new();
    boxes.try_reserve_exact(occupied.clone().count())?;
    boxes.extend(occupied.map(|leaf| LeafBox {
        center: leaf.center,
        half_extent: 0.5 * leaf.size,
        occupancy_cost: probability(leaf.log_odds),
        occupancy_threshold: threshold,
    }));
    Ok(boxes)
}
