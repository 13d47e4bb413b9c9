//! Error types for limbreach

use std::collections::TryReserveError;
use std::path::PathBuf;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Failures while turning a mesh resource into a constraint set.
///
/// All of these are recoverable: the caller decides whether a limb without
/// constraints is unconstrained or unverifiable.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Mesh file could not be read
    #[error("could not read mesh {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Mesh file could not be parsed
    #[error("could not parse mesh {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// More than one mesh object in a constraint file
    #[error("expected a single mesh in {path}, found {count}")]
    MultipleMeshes { path: PathBuf, count: usize },

    /// Triangle refers to a vertex that does not exist
    #[error("triangle {face} references vertex {index}, but the mesh has {num_vertices} vertices")]
    InvalidIndex {
        face: usize,
        index: usize,
        num_vertices: usize,
    },

    /// Normals and anchors are not index aligned
    #[error("constraint rows are misaligned: {normals} normals, {anchors} anchors")]
    RowMismatch { normals: usize, anchors: usize },
}

/// limbreach error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Octree resolution must be a positive, finite cell size
    #[error("invalid octree resolution: {0}")]
    InvalidResolution(f64),

    /// Out of memory while building samples, tree or boxes
    #[error("allocation failed: {0}")]
    Allocation(#[from] TryReserveError),

    /// Constraint mesh failed to load
    #[error(transparent)]
    Load(#[from] LoadError),
}
