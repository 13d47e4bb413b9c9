//! Probabilistic occupancy octree over end-effector positions.
//!
//! The tree addresses space with 16-bit integer keys per axis at a fixed
//! leaf resolution, giving 16 levels below the root. Each node stores a
//! clamped log-odds occupancy value. Point clouds are integrated as one
//! batch: cells crossed by the ray from the sensor origin to each point are
//! observed free, endpoint cells are observed occupied, and a cell that is
//! both counts as occupied. Every touched cell is updated exactly once per
//! batch, so the result does not depend on the order of the points.
//!
//! Inner nodes are left stale during insertion. Call
//! [`OccupancyOctree::update_inner_occupancy`] once the batch is in, and
//! optionally [`OccupancyOctree::prune`] to collapse uniform subtrees.
//!
//! # Queries
//!
//! - [`OccupancyOctree::search`]: deepest existing node containing a point
//! - [`OccupancyOctree::cell_state`]: unknown / free / occupied
//! - [`OccupancyOctree::cast_ray`]: first occupied cell along a ray
//! - [`OccupancyOctree::leaves`]: every leaf with its center and size

use std::collections::HashSet;

use nalgebra::{Point3, Vector3};
use serde::Deserialize;

use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};


/// Number of levels below the root.
pub const TREE_DEPTH: u8 = 16;
const TREE_MAX_VAL: i32 = 1 << (TREE_DEPTH - 1);
const COMPONENT: &str = "octree";

pub fn log_odds(probability: f64) -> f64 {
    (probability / (1.0 - probability)).ln()
}

pub fn probability(log_odds: f64) -> f64 {
    1.0 - 1.0 / (1.0 + log_odds.exp())
}

/// Sensor model and thresholds, as probabilities.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct OccupancyParams {
    pub prob_hit: f64,
    pub prob_miss: f64,
    pub clamping_min: f64,
    pub clamping_max: f64,
    pub occupancy_threshold: f64,
}

impl Default for OccupancyParams {
    fn default() -> Self {
        Self {
            prob_hit: 0.7,
            prob_miss: 0.4,
            clamping_min: 0.1192,
            clamping_max: 0.971,
            occupancy_threshold: 0.5,
        }
    }
}

impl OccupancyParams {
    pub fn hit_log_odds(&self) -> f64 {
        log_odds(self.prob_hit)
    }

    pub fn miss_log_odds(&self) -> f64 {
        log_odds(self.prob_miss)
    }

    pub fn threshold_log_odds(&self) -> f64 {
        log_odds(self.occupancy_threshold)
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(log_odds(self.clamping_min), log_odds(self.clamping_max))
    }
}

/// Occupancy classification of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// Never observed
    Unknown,
    /// Observed, below the occupancy threshold
    Free,
    /// Observed, above the occupancy threshold
    Occupied,
}

/// Integer address of a finest-level cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OcTreeKey(pub [u16; 3]);

impl OcTreeKey {
    /// Index of the child of a node at `depth` that contains this key.
    fn child_index(&self, depth: u8) -> usize {
        let bit = TREE_DEPTH - 1 - depth;
        ((self.0[0] >> bit) & 1) as usize
            | (((self.0[1] >> bit) & 1) as usize) << 1
            | (((self.0[2] >> bit) & 1) as usize) << 2
    }
}

#[derive(Debug, Clone, PartialEq)]
struct OcNode {
    log_odds: f64,
    children: Option<Box<[Option<OcNode>; 8]>>,
}

impl OcNode {
    fn new(log_odds: f64) -> Self {
        Self {
            log_odds,
            children: None,
        }
    }

    /// Turns a pruned leaf back into eight leaves carrying its value.
    fn expand(&mut self) {
        let value = self.log_odds;
        self.children = Some(Box::new(std::array::from_fn(|_| Some(OcNode::new(value)))));
    }

    fn child(&self, index: usize) -> Option<&OcNode> {
        self.children.as_ref().and_then(|children| children[index].as_ref())
    }
}

/// Result of a point lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeHit {
    pub depth: u8,
    pub log_odds: f64,
}

/// A leaf of the tree, at whatever depth pruning left it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafCell {
    pub center: Point3<f64>,
    /// Edge length of the cube.
    pub size: f64,
    pub depth: u8,
    pub log_odds: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyOctree {
    resolution: f64,
    params: OccupancyParams,
    root: Option<OcNode>,
}

impl OccupancyOctree {
    pub fn new(resolution: f64, params: OccupancyParams) -> Result<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(Error::InvalidResolution(resolution));
        }
        Ok(Self {
            resolution,
            params,
            root: None,
        })
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn params(&self) -> &OccupancyParams {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Key of the finest cell containing `point`, if addressable.
    pub fn key_for(&self, point: &Point3<f64>) -> Option<OcTreeKey> {
        let mut key = [0u16; 3];
        for axis in 0..3 {
            key[axis] = self.coord_to_key(point[axis])?;
        }
        Some(OcTreeKey(key))
    }

    fn coord_to_key(&self, coord: f64) -> Option<u16> {
        let cell = (coord / self.resolution).floor();
        if !cell.is_finite() || cell < -(TREE_MAX_VAL as f64) || cell >= TREE_MAX_VAL as f64 {
            return None;
        }
        Some((cell as i32 + TREE_MAX_VAL) as u16)
    }

    /// Center of the finest cell addressed by `key`.
    pub fn key_center(&self, key: &OcTreeKey) -> Point3<f64> {
        Point3::from(Vector3::from_fn(|axis, _| {
            (key.0[axis] as i32 - TREE_MAX_VAL) as f64 * self.resolution + 0.5 * self.resolution
        }))
    }

    /// Edge length of a node at `depth`.
    pub fn cell_size(&self, depth: u8) -> f64 {
        self.resolution * (1u32 << (TREE_DEPTH - depth)) as f64
    }

    pub fn is_occupied_value(&self, log_odds: f64) -> bool {
        log_odds > self.params.threshold_log_odds()
    }

    /// Integrates a batch of observed points seen from `origin`.
    ///
    /// Returns how many points were integrated; points outside the
    /// addressable volume are skipped and reported.
    pub fn insert_point_cloud(
        &mut self,
        points: &[Point3<f64>],
        origin: &Point3<f64>,
        diagnostics: &dyn Diagnostics,
    ) -> usize {
        let mut free = HashSet::new();
        let mut occupied = HashSet::new();
        let mut skipped = 0;

        for point in points {
            let Some(end_key) = self.key_for(point) else {
                skipped += 1;
                continue;
            };
            occupied.insert(end_key);
            match self.compute_ray_keys(origin, point) {
                Some(keys) => free.extend(keys),
                None => diagnostics.debug(
                    COMPONENT,
                    format_args!("no free-space ray from {:?} to {:?}", origin, point),
                ),
            }
        }
        free.retain(|key| !occupied.contains(key));

        if skipped > 0 {
            diagnostics.warn(
                COMPONENT,
                format_args!(
                    "{} of {} points lie outside the addressable volume and were skipped",
                    skipped,
                    points.len()
                ),
            );
        }

        let miss = self.params.miss_log_odds();
        let hit = self.params.hit_log_odds();
        for key in &free {
            self.update_leaf(key, miss);
        }
        for key in &occupied {
            self.update_leaf(key, hit);
        }

        diagnostics.trace(
            COMPONENT,
            format_args!("{} occupied and {} free cells updated", occupied.len(), free.len()),
        );
        points.len() - skipped
    }

    /// Keys of the cells a ray crosses from `origin` up to, but excluding,
    /// the cell containing `end`.
    fn compute_ray_keys(&self, origin: &Point3<f64>, end: &Point3<f64>) -> Option<Vec<OcTreeKey>> {
        let origin_key = self.key_for(origin)?;
        let end_key = self.key_for(end)?;
        if origin_key == end_key {
            return Some(Vec::new());
        }

        let offset = end - origin;
        let length = offset.norm();
        let mut walk = CellWalk::new(self, origin, &origin_key, &(offset / length));
        let mut keys = vec![origin_key];
        loop {
            walk.advance();
            let Some(key) = walk.key() else {
                break;
            };
            if key == end_key || walk.exit_distance() > length {
                break;
            }
            keys.push(key);
        }
        Some(keys)
    }

    fn update_leaf(&mut self, key: &OcTreeKey, delta: f64) {
        let created = self.root.is_none();
        let root = self.root.get_or_insert_with(|| OcNode::new(0.0));
        Self::update_recursive(root, created, key, 0, delta, &self.params);
    }

    fn update_recursive(
        node: &mut OcNode,
        created: bool,
        key: &OcTreeKey,
        depth: u8,
        delta: f64,
        params: &OccupancyParams,
    ) {
        if depth == TREE_DEPTH {
            node.log_odds = params.clamp(node.log_odds + delta);
            return;
        }
        if node.children.is_none() && !created {
            node.expand();
        }
        let children = node.children.get_or_insert_with(Default::default);
        let index = key.child_index(depth);
        let child_created = children[index].is_none();
        let child = children[index].get_or_insert_with(|| OcNode::new(0.0));
        Self::update_recursive(child, child_created, key, depth + 1, delta, params);
    }

    /// Sets every inner node to the maximum of its children, in one pass.
    pub fn update_inner_occupancy(&mut self) {
        fn recurse(node: &mut OcNode) {
            if let Some(children) = node.children.as_mut() {
                let mut max = f64::NEG_INFINITY;
                for child in children.iter_mut().flatten() {
                    recurse(child);
                    max = max.max(child.log_odds);
                }
                if max.is_finite() {
                    node.log_odds = max;
                }
            }
        }
        if let Some(root) = self.root.as_mut() {
            recurse(root);
        }
    }

    /// Collapses every node whose eight children are leaves with the same
    /// value. Returns the number of collapsed nodes.
    pub fn prune(&mut self) -> usize {
        fn recurse(node: &mut OcNode) -> usize {
            let Some(children) = node.children.as_mut() else {
                return 0;
            };
            let mut collapsed: usize = children.iter_mut().flatten().map(recurse).sum();

            let first = children[0].as_ref().map(|child| child.log_odds);
            let uniform = first.is_some()
                && children.iter().all(|child| {
                    child
                        .as_ref()
                        .is_some_and(|c| c.children.is_none() && Some(c.log_odds) == first)
                });
            if let (true, Some(value)) = (uniform, first) {
                node.children = None;
                node.log_odds = value;
                collapsed += 1;
            }
            collapsed
        }
        self.root.as_mut().map_or(0, recurse)
    }

    /// Deepest existing node containing `point`.
    pub fn search(&self, point: &Point3<f64>) -> Option<NodeHit> {
        self.search_key(&self.key_for(point)?)
    }

    pub fn search_key(&self, key: &OcTreeKey) -> Option<NodeHit> {
        let mut node = self.root.as_ref()?;
        let mut depth = 0;
        while depth < TREE_DEPTH && node.children.is_some() {
            node = node.child(key.child_index(depth))?;
            depth += 1;
        }
        Some(NodeHit {
            depth,
            log_odds: node.log_odds,
        })
    }

    pub fn cell_state(&self, point: &Point3<f64>) -> CellState {
        match self.search(point) {
            None => CellState::Unknown,
            Some(hit) if self.is_occupied_value(hit.log_odds) => CellState::Occupied,
            Some(_) => CellState::Free,
        }
    }

    pub fn is_occupied(&self, point: &Point3<f64>) -> bool {
        self.cell_state(point) == CellState::Occupied
    }

    /// Center of the first occupied finest cell met by the ray, starting
    /// with the cell containing `origin`. Unknown cells are passed through.
    /// A non-positive `max_range` walks until the ray leaves the tree.
    pub fn cast_ray(
        &self,
        origin: &Point3<f64>,
        direction: &Vector3<f64>,
        max_range: f64,
    ) -> Option<Point3<f64>> {
        if self.root.is_none() {
            return None;
        }
        let direction = direction.try_normalize(f64::EPSILON)?;
        let origin_key = self.key_for(origin)?;
        let mut walk = CellWalk::new(self, origin, &origin_key, &direction);
        loop {
            let key = walk.key()?;
            if let Some(hit) = self.search_key(&key) {
                if self.is_occupied_value(hit.log_odds) {
                    return Some(self.key_center(&key));
                }
            }
            let entry = walk.advance();
            if max_range > 0.0 && entry > max_range {
                return None;
            }
        }
    }

    /// Iterates over all leaves, including those left by pruning.
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves {
            tree: self,
            stack: self
                .root
                .as_ref()
                .map(|root| vec![(root, [0u16; 3], 0u8)])
                .unwrap_or_default(),
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves().count()
    }

    /// Number of nodes, inner nodes included.
    pub fn size(&self) -> usize {
        fn count(node: &OcNode) -> usize {
            1 + node
                .children
                .iter()
                .flat_map(|children| children.iter().flatten())
                .map(count)
                .sum::<usize>()
        }
        self.root.as_ref().map_or(0, count)
    }

    fn leaf_cell(&self, min_key: [u16; 3], depth: u8, log_odds: f64) -> LeafCell {
        let size = self.cell_size(depth);
        let center = Point3::from(Vector3::from_fn(|axis, _| {
            (min_key[axis] as i32 - TREE_MAX_VAL) as f64 * self.resolution + 0.5 * size
        }));
        LeafCell {
            center,
            size,
            depth,
            log_odds,
        }
    }
}

#[derive(Clone)]
pub struct Leaves<'a> {
    tree: &'a OccupancyOctree,
    stack: Vec<(&'a OcNode, [u16; 3], u8)>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = LeafCell;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((node, min_key, depth)) = self.stack.pop() {
            let Some(children) = node.children.as_ref() else {
                return Some(self.tree.leaf_cell(min_key, depth, node.log_odds));
            };
            let span = 1u16 << (TREE_DEPTH - 1 - depth);
            for (index, child) in children.iter().enumerate().rev() {
                if let Some(child) = child {
                    let mut key = min_key;
                    for (axis, k) in key.iter_mut().enumerate() {
                        if (index >> axis) & 1 == 1 {
                            *k += span;
                        }
                    }
                    self.stack.push((child, key, depth + 1));
                }
            }
        }
        None
    }
}

/// Voxel traversal along a ray (Amanatides & Woo).
struct CellWalk {
    key: [i32; 3],
    step: [i32; 3],
    t_max: [f64; 3],
    t_delta: [f64; 3],
}

impl CellWalk {
    /// `direction` must be a unit vector.
    fn new(
        tree: &OccupancyOctree,
        origin: &Point3<f64>,
        origin_key: &OcTreeKey,
        direction: &Vector3<f64>,
    ) -> Self {
        let center = tree.key_center(origin_key);
        let mut walk = Self {
            key: origin_key.0.map(i32::from),
            step: [0; 3],
            t_max: [f64::MAX; 3],
            t_delta: [f64::MAX; 3],
        };
        for axis in 0..3 {
            if direction[axis] > 0.0 {
                walk.step[axis] = 1;
            } else if direction[axis] < 0.0 {
                walk.step[axis] = -1;
            } else {
                continue;
            }
            let border = center[axis] + walk.step[axis] as f64 * 0.5 * tree.resolution;
            walk.t_max[axis] = (border - origin[axis]) / direction[axis];
            walk.t_delta[axis] = tree.resolution / direction[axis].abs();
        }
        walk
    }

    fn key(&self) -> Option<OcTreeKey> {
        let mut key = [0u16; 3];
        for axis in 0..3 {
            key[axis] = u16::try_from(self.key[axis]).ok()?;
        }
        Some(OcTreeKey(key))
    }

    /// Steps into the next cell and returns the ray distance at which it is
    /// entered.
    fn advance(&mut self) -> f64 {
        let axis = (0..3)
            .min_by(|&a, &b| self.t_max[a].total_cmp(&self.t_max[b]))
            .unwrap_or(0);
        let entry = self.t_max[axis];
        self.key[axis] += self.step[axis];
        self.t_max[axis] += self.t_delta[axis];
        entry
    }

    fn exit_distance(&self) -> f64 {
        self.t_max.iter().copied().fold(f64::MAX, f64::min)
    }
}
