//! Per-limb container of reachable samples and their spatial index.
//!
//! A [`SampleContainer`] is built once: samples are generated, their effector
//! positions are integrated into an occupancy octree as seen from the limb
//! frame origin, inner occupancy is updated and uniform subtrees are pruned,
//! and the occupied leaves are flattened into boxes. Nothing changes after
//! construction; to resample, build a new container.

use std::collections::HashMap;

use itertools::iproduct;
use nalgebra::{Point3, Vector3};

use crate::boxes::{boxes_from_octree, Aabb, LeafBox};
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::limb::Limb;
use crate::octree::{CellState, OcTreeKey, OccupancyOctree, OccupancyParams};
use crate::sample::Sample;
use crate::sampling::{generate_samples, SamplingOptions};
use crate::settings::Settings;

const COMPONENT: &str = "container";

/// Samples of one limb together with their occupancy tree and leaf boxes.
#[derive(Debug, Clone)]
pub struct SampleContainer {
    samples: Vec<Sample>,
    octree: OccupancyOctree,
    boxes: Vec<LeafBox>,
    voxels: HashMap<OcTreeKey, Vec<usize>>,
}

impl SampleContainer {
    /// Samples `limb` with default options and indexes the result.
    pub fn new(
        limb: &Limb,
        sample_count: usize,
        resolution: f64,
        diagnostics: &dyn Diagnostics,
    ) -> Result<Self> {
        Self::with_options(
            limb,
            sample_count,
            resolution,
            &SamplingOptions::default(),
            &OccupancyParams::default(),
            diagnostics,
        )
    }

    pub fn with_options(
        limb: &Limb,
        sample_count: usize,
        resolution: f64,
        sampling: &SamplingOptions,
        occupancy: &OccupancyParams,
        diagnostics: &dyn Diagnostics,
    ) -> Result<Self> {
        // reject a bad resolution before paying for sampling
        OccupancyOctree::new(resolution, *occupancy)?;
        let samples = generate_samples(limb, sample_count, sampling, diagnostics)?;
        Self::from_samples(samples, resolution, occupancy, diagnostics)
    }

    /// Samples `limb` with the sampler, tree and resolution of `settings`.
    pub fn from_settings(
        limb: &Limb,
        settings: &Settings,
        diagnostics: &dyn Diagnostics,
    ) -> Result<Self> {
        Self::with_options(
            limb,
            settings.sample_count,
            settings.resolution,
            &settings.sampling,
            &settings.occupancy,
            diagnostics,
        )
    }

    /// Indexes samples produced elsewhere. Sample order is kept as given.
    pub fn from_samples(
        samples: Vec<Sample>,
        resolution: f64,
        occupancy: &OccupancyParams,
        diagnostics: &dyn Diagnostics,
    ) -> Result<Self> {
        let mut octree = OccupancyOctree::new(resolution, *occupancy)?;

        let mut positions = Vec::new();
        positions.try_reserve_exact(samples.len())?;
        positions.extend(samples.iter().map(|sample| sample.effector_position));

        octree.insert_point_cloud(&positions, &Point3::origin(), diagnostics);
        octree.update_inner_occupancy();
        let collapsed = octree.prune();

        let boxes = boxes_from_octree(&octree)?;

        let mut voxels: HashMap<OcTreeKey, Vec<usize>> = HashMap::new();
        voxels.try_reserve(samples.len())?;
        for (index, position) in positions.iter().enumerate() {
            if let Some(key) = octree.key_for(position) {
                voxels.entry(key).or_default().push(index);
            }
        }

        diagnostics.info(
            COMPONENT,
            format_args!(
                "indexed {} samples into {} boxes ({} occupied cells, {} subtrees pruned, resolution {})",
                samples.len(),
                boxes.len(),
                voxels.len(),
                collapsed,
                resolution
            ),
        );

        Ok(Self {
            samples,
            octree,
            boxes,
            voxels,
        })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn boxes(&self) -> &[LeafBox] {
        &self.boxes
    }

    pub fn octree(&self) -> &OccupancyOctree {
        &self.octree
    }

    pub fn resolution(&self) -> f64 {
        self.octree.resolution()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_occupied(&self, point: &Point3<f64>) -> bool {
        self.octree.is_occupied(point)
    }

    pub fn cell_state(&self, point: &Point3<f64>) -> CellState {
        self.octree.cell_state(point)
    }

    /// See [`OccupancyOctree::cast_ray`].
    pub fn cast_ray(
        &self,
        origin: &Point3<f64>,
        direction: &Vector3<f64>,
        max_range: f64,
    ) -> Option<Point3<f64>> {
        self.octree.cast_ray(origin, direction, max_range)
    }

    /// Samples whose effector lies in the finest cell containing `point`.
    pub fn samples_in_cell(&self, point: &Point3<f64>) -> Vec<&Sample> {
        self.octree
            .key_for(point)
            .and_then(|key| self.voxels.get(&key))
            .map(|indices| indices.iter().map(|&i| &self.samples[i]).collect())
            .unwrap_or_default()
    }

    /// Samples whose effector lies within `radius` of `point`, in sample
    /// order.
    pub fn samples_within(&self, point: &Point3<f64>, radius: f64) -> Vec<&Sample> {
        if !(radius >= 0.0) {
            return Vec::new();
        }
        let reach = Vector3::repeat(radius);
        let keys = (
            self.octree.key_for(&(point - reach)),
            self.octree.key_for(&(point + reach)),
        );
        let within = |index: &usize| {
            (self.samples[*index].effector_position - point).norm() <= radius
        };

        let mut indices: Vec<usize> = match keys {
            (Some(low), Some(high)) if cell_count(&low, &high) <= self.samples.len() => iproduct!(
                low.0[0]..=high.0[0],
                low.0[1]..=high.0[1],
                low.0[2]..=high.0[2]
            )
            .filter_map(|(x, y, z)| self.voxels.get(&OcTreeKey([x, y, z])))
            .flatten()
            .copied()
            .filter(within)
            .collect(),
            _ => (0..self.samples.len()).filter(within).collect(),
        };
        indices.sort_unstable();
        indices.into_iter().map(|i| &self.samples[i]).collect()
    }

    /// Closest sample to `point`, searching cell shells outwards from the
    /// cell containing it.
    pub fn nearest_sample(&self, point: &Point3<f64>) -> Option<&Sample> {
        if self.samples.is_empty() {
            return None;
        }
        let distance = |index: usize| (self.samples[index].effector_position - point).norm();
        let linear = || {
            (0..self.samples.len())
                .map(|i| (distance(i), i))
                .min_by(|a, b| a.0.total_cmp(&b.0))
        };

        let Some(center) = self.octree.key_for(point) else {
            return linear().map(|(_, i)| &self.samples[i]);
        };

        let resolution = self.resolution();
        let mut best: Option<(f64, usize)> = None;
        let mut visited = 0usize;
        for shell in 0i32.. {
            // every sample in this shell is at least (shell - 1) cells away
            if let Some((d, _)) = best {
                if d <= (shell - 1).max(0) as f64 * resolution {
                    break;
                }
            }
            if visited > self.voxels.len() * 8 {
                best = linear();
                break;
            }
            for (dx, dy, dz) in iproduct!(-shell..=shell, -shell..=shell, -shell..=shell) {
                if dx.abs().max(dy.abs()).max(dz.abs()) != shell {
                    continue;
                }
                visited += 1;
                let Some(key) = offset_key(&center, [dx, dy, dz]) else {
                    continue;
                };
                for &index in self.voxels.get(&key).into_iter().flatten() {
                    let d = distance(index);
                    if best.map_or(true, |(b, i)| d < b || (d == b && index < i)) {
                        best = Some((d, index));
                    }
                }
            }
        }
        best.map(|(_, i)| &self.samples[i])
    }

    /// Leaf boxes touching `region`.
    pub fn boxes_in_region(&self, region: &Aabb) -> Vec<&LeafBox> {
        self.boxes.iter().filter(|b| b.intersects(region)).collect()
    }
}

fn cell_count(low: &OcTreeKey, high: &OcTreeKey) -> usize {
    (0..3)
        .map(|axis| (high.0[axis] as usize).saturating_sub(low.0[axis] as usize) + 1)
        .product()
}

fn offset_key(key: &OcTreeKey, offset: [i32; 3]) -> Option<OcTreeKey> {
    let mut shifted = [0u16; 3];
    for axis in 0..3 {
        shifted[axis] = u16::try_from(key.0[axis] as i32 + offset[axis]).ok()?;
    }
    Some(OcTreeKey(shifted))
}
