use std::path::Path;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use nalgebra::{Isometry3, Point3, Vector3};
use serde::Deserialize;

use crate::constraints::{self, ConstraintPolicy, ConstraintSet, Reachability};
use crate::diagnostics::Diagnostics;
use crate::error::LoadError;
use crate::octree::OccupancyParams;
use crate::sampling::SamplingOptions;

/// Edge length of the finest octree cell, in limb frame units.
pub const DEFAULT_RESOLUTION: f64 = 0.05;
/// Number of configurations drawn per limb.
pub const DEFAULT_SAMPLE_COUNT: usize = 10_000;
/// Seed of the configuration sampler.
pub const DEFAULT_SEED: u64 = 42;
/// Joint perturbation used for finite-difference Jacobians.
pub const JACOBIAN_STEP: f64 = 1e-6;
/// Triangles whose normal is shorter than this before normalization are
/// treated as degenerate.
pub const DEGENERATE_FACE_EPSILON: f64 = 1e-12;
/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "LIMBREACH";

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Runtime configuration for building limb containers and checking
/// constraints.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub resolution: f64,
    pub sample_count: usize,
    pub sampling: SamplingOptions,
    pub occupancy: OccupancyParams,
    pub constraint_policy: ConstraintPolicy,
    /// Per-axis scale applied to constraint meshes on load.
    pub constraint_scale: Vector3<f64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            sample_count: DEFAULT_SAMPLE_COUNT,
            sampling: SamplingOptions::default(),
            occupancy: OccupancyParams::default(),
            constraint_policy: ConstraintPolicy::default(),
            constraint_scale: Vector3::repeat(1.0),
        }
    }
}

impl Settings {
    /// Loads a constraint mesh scaled by `constraint_scale`.
    pub fn load_constraints(
        &self,
        path: impl AsRef<Path>,
        diagnostics: &dyn Diagnostics,
    ) -> Result<ConstraintSet, LoadError> {
        constraints::load_constraints_scaled(path, &self.constraint_scale, diagnostics)
    }

    /// [`constraints::check_reachability`] under `constraint_policy`.
    pub fn check_reachability(
        &self,
        constraints: Option<&ConstraintSet>,
        transform: &Isometry3<f64>,
        point: &Point3<f64>,
    ) -> Reachability {
        constraints::check_reachability(constraints, transform, point, self.constraint_policy)
    }
}

/// Settings from the built-in `config/default.toml` alone.
pub fn load_default_config() -> Result<Settings> {
    let settings = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .build()
        .context("error loading default configuration")?;
    finish(settings)
}

/// Settings from `path` layered over the defaults, then overridden by
/// `LIMBREACH_*` environment variables. Nested keys use a double
/// underscore, e.g. `LIMBREACH_SAMPLING__SEED`.
pub fn load_config(path: impl AsRef<Path>) -> Result<Settings> {
    load_layered(path.as_ref(), environment())
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn load_layered(path: &Path, environment: Environment) -> Result<Settings> {
    let settings = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .add_source(File::from(path).format(FileFormat::Toml).required(true))
        .add_source(environment)
        .build()
        .with_context(|| format!("error loading configuration from {}", path.display()))?;
    finish(settings)
}

fn finish(settings: Config) -> Result<Settings> {
    let config: Settings = settings
        .try_deserialize()
        .context("error deserializing configuration")?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Settings) -> Result<()> {
    if !(config.resolution.is_finite() && config.resolution > 0.0) {
        bail!("resolution must be positive and finite, got {}", config.resolution);
    }

    let occupancy = &config.occupancy;
    for (name, value) in [
        ("prob_hit", occupancy.prob_hit),
        ("prob_miss", occupancy.prob_miss),
        ("clamping_min", occupancy.clamping_min),
        ("clamping_max", occupancy.clamping_max),
        ("occupancy_threshold", occupancy.occupancy_threshold),
    ] {
        if !(value > 0.0 && value < 1.0) {
            bail!("occupancy.{name} must lie strictly between 0 and 1, got {value}");
        }
    }
    if occupancy.clamping_min >= occupancy.clamping_max {
        bail!(
            "occupancy.clamping_min ({}) must be below occupancy.clamping_max ({})",
            occupancy.clamping_min,
            occupancy.clamping_max
        );
    }

    if config
        .constraint_scale
        .iter()
        .any(|factor| !factor.is_finite() || *factor == 0.0)
    {
        bail!(
            "constraint_scale factors must be finite and non-zero, got {:?}",
            config.constraint_scale.as_slice()
        );
    }
    Ok(())
}
