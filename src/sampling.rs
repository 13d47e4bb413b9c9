//! Discretisation of a limb's configuration space into reachable samples.
//!
//! Configurations are produced sequentially so that a fixed seed always
//! yields the same sequence; forward kinematics is then evaluated in
//! parallel with rayon, which keeps the output order.
//!
//! Two strategies are available:
//! - [`SamplingStrategy::Random`]: uniform draws inside each joint range
//! - [`SamplingStrategy::Grid`]: a regular lattice over the joint ranges,
//!   from which the requested count of points is picked at evenly spaced
//!   lexicographic indices, first and last lattice points included
//!
//! Degenerate inputs never fail. A zero count or an invalid joint range
//! yields no samples, and a limb without joints yields its single fixed pose.

use nalgebra::Matrix3xX;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Deserialize;

use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::limb::{JointRange, Limb};
use crate::sample::Sample;
use crate::settings::{DEFAULT_SEED, JACOBIAN_STEP};

const COMPONENT: &str = "sampling";

/// How configurations are chosen inside the joint ranges.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SamplingStrategy {
    #[default]
    Random,
    Grid,
}

/// Sampler parameters other than the sample count.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SamplingOptions {
    #[serde(default)]
    pub strategy: SamplingStrategy,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            strategy: SamplingStrategy::default(),
            seed: DEFAULT_SEED,
        }
    }
}

/// Generates up to `count` samples covering the reachable workspace of `limb`.
///
/// Returns exactly `count` samples unless the limb is degenerate (see the
/// module docs). Only allocation failure is reported as an error.
pub fn generate_samples(
    limb: &Limb,
    count: usize,
    options: &SamplingOptions,
    diagnostics: &dyn Diagnostics,
) -> Result<Vec<Sample>> {
    if count == 0 {
        diagnostics.debug(
            COMPONENT,
            format_args!("no samples requested for limb '{}'", limb.name()),
        );
        return Ok(Vec::new());
    }

    if let Some((joint, range)) = limb
        .ranges()
        .iter()
        .enumerate()
        .find(|(_, range)| !range.is_valid())
    {
        diagnostics.warn(
            COMPONENT,
            format_args!(
                "joint {} of limb '{}' has degenerate range [{}, {}], no samples generated",
                joint,
                limb.name(),
                range.min,
                range.max
            ),
        );
        return Ok(Vec::new());
    }

    let configurations = if limb.num_joints() == 0 {
        diagnostics.debug(
            COMPONENT,
            format_args!("limb '{}' has no joints, using its fixed pose", limb.name()),
        );
        vec![Vec::new()]
    } else {
        match options.strategy {
            SamplingStrategy::Random => random_configurations(limb.ranges(), count, options.seed)?,
            SamplingStrategy::Grid => grid_configurations(limb.ranges(), count)?,
        }
    };

    let mut samples = Vec::new();
    samples.try_reserve_exact(configurations.len())?;
    configurations
        .into_par_iter()
        .enumerate()
        .map(|(id, configuration)| {
            let pose = limb.effector_pose(&configuration);
            let manipulability = manipulability(limb, &configuration);
            Sample::new(id, configuration, pose, manipulability)
        })
        .collect_into_vec(&mut samples);

    if let Some(workspace) = limb.workspace() {
        let outside = samples
            .iter()
            .filter(|sample| !workspace.contains(&sample.effector_position))
            .count();
        if outside > 0 {
            diagnostics.warn(
                COMPONENT,
                format_args!(
                    "{} of {} samples of limb '{}' fall outside its declared workspace",
                    outside,
                    samples.len(),
                    limb.name()
                ),
            );
        }
    }

    diagnostics.info(
        COMPONENT,
        format_args!(
            "generated {} samples for limb '{}' ({:?})",
            samples.len(),
            limb.name(),
            options.strategy
        ),
    );

    Ok(samples)
}

fn random_configurations(ranges: &[JointRange], count: usize, seed: u64) -> Result<Vec<Vec<f64>>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut configurations = Vec::new();
    configurations.try_reserve_exact(count)?;
    for _ in 0..count {
        configurations.push(
            ranges
                .iter()
                .map(|range| {
                    let fraction: f64 = rng.random_range(0.0..=1.0);
                    (range.min + fraction * range.width()).min(range.max)
                })
                .collect(),
        );
    }
    Ok(configurations)
}

fn grid_configurations(ranges: &[JointRange], count: usize) -> Result<Vec<Vec<f64>>> {
    let levels = grid_levels(count, ranges.len());
    let axes: Vec<Vec<f64>> = ranges.iter().map(|range| range.levels(levels)).collect();

    let mut configurations = Vec::new();
    configurations.try_reserve_exact(count)?;
    configurations.extend(
        lattice_indices(count, levels, ranges.len()).map(|index| {
            decode_lattice_index(index, levels, ranges.len())
                .into_iter()
                .zip(&axes)
                .map(|(level, axis)| axis[level])
                .collect()
        }),
    );
    Ok(configurations)
}

/// `count` increasing indices spread evenly over a lattice of
/// `levels^num_joints` points, from the first point to the last.
fn lattice_indices(count: usize, levels: usize, num_joints: usize) -> impl Iterator<Item = u128> {
    let last = (levels as u128)
        .saturating_pow(num_joints as u32)
        .saturating_sub(1);
    let steps = count.saturating_sub(1).max(1) as u128;
    // floor(i * last / steps) without overflowing
    let (quotient, remainder) = (last / steps, last % steps);
    (0..count as u128).map(move |i| quotient * i + remainder * i / steps)
}

/// Per-joint level of a lattice index, the last joint varying fastest.
fn decode_lattice_index(mut index: u128, levels: usize, num_joints: usize) -> Vec<usize> {
    let base = levels as u128;
    let mut digits = vec![0; num_joints];
    for digit in digits.iter_mut().rev() {
        *digit = (index % base) as usize;
        index /= base;
    }
    digits
}

/// Smallest number of levels per joint whose lattice holds `count` points.
fn grid_levels(count: usize, num_joints: usize) -> usize {
    let exponent = num_joints as u32;
    let mut levels = (count as f64).powf(1.0 / num_joints as f64).ceil().max(1.0) as usize;
    while levels > 1 && (levels - 1).saturating_pow(exponent) >= count {
        levels -= 1;
    }
    while levels.saturating_pow(exponent) < count {
        levels += 1;
    }
    levels
}

/// Yoshikawa measure of the positional Jacobian, estimated by central
/// differences of the forward kinematics.
fn manipulability(limb: &Limb, configuration: &[f64]) -> f64 {
    let num_joints = configuration.len();
    if num_joints == 0 {
        return 0.0;
    }

    let mut jacobian = Matrix3xX::<f64>::zeros(num_joints);
    let mut shifted = configuration.to_vec();
    for joint in 0..num_joints {
        shifted[joint] = configuration[joint] + JACOBIAN_STEP;
        let forward = limb.effector_pose(&shifted).position;
        shifted[joint] = configuration[joint] - JACOBIAN_STEP;
        let backward = limb.effector_pose(&shifted).position;
        shifted[joint] = configuration[joint];
        jacobian.set_column(joint, &((forward - backward) / (2.0 * JACOBIAN_STEP)));
    }

    // Gram determinant on the smaller side, so short chains are not
    // reported as singular.
    let gram_determinant = if num_joints < 3 {
        (jacobian.transpose() * &jacobian).determinant()
    } else {
        (&jacobian * jacobian.transpose()).determinant()
    };
    gram_determinant.max(0.0).sqrt()
}
