//! Half-space kinematic constraints loaded from a convex mesh.
//!
//! Each triangle of the mesh contributes one row: its outward normal and its
//! first vertex as an anchor. A point satisfies the set when it lies on the
//! inner side of every plane, which for a closed convex mesh wound
//! counter-clockwise from outside means it is inside the polyhedron.
//!
//! # Key Components
//!
//! - [`ConstraintSet`]: Rows in the limb frame, as loaded
//! - [`TransformedConstraints`]: Rows moved into a world frame, ready for
//!   repeated point tests
//! - [`check_reachability`]: Verification behind an explicit policy for
//!   limbs without usable constraints

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use nalgebra::{Isometry3, Point3, Vector3};
use rayon::prelude::*;
use serde::Deserialize;

use crate::diagnostics::Diagnostics;
use crate::error::LoadError;
use crate::settings::DEGENERATE_FACE_EPSILON;

#[cfg(test)]
mod tests {

    use super::*;
    use crate::diagnostics::tests::Recorder;
    use crate::diagnostics::{Level, NoopDiagnostics};
    use nalgebra::Translation3;
    use std::f64::consts::FRAC_PI_2;

    fn unit_cube() -> ConstraintSet {
        let vertices = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
        ]
        .map(|[x, y, z]| Point3::new(x, y, z));
        let triangles = [
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [3, 7, 6],
            [3, 6, 2],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ];
        ConstraintSet::from_triangles(&vertices, &triangles, &NoopDiagnostics).unwrap()
    }

    #[test]
    fn cube_rows() {
        let cube = unit_cube();
        assert_eq!(cube.len(), 12);
        assert_eq!(cube.normals()[0], Vector3::new(0.0, 0.0, -1.0));
        assert_eq!(cube.normals()[2], Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(cube.anchors()[2], Point3::new(0.0, 0.0, 1.0));
        for normal in cube.normals() {
            assert!((normal.norm() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn inside_and_outside() {
        let cube = unit_cube().transform(&Isometry3::identity());
        assert!(cube.verify(&Point3::new(0.5, 0.5, 0.5)));
        assert!(!cube.verify(&Point3::new(10.0, 10.0, 10.0)));
        assert!(!cube.verify(&Point3::new(0.5, 0.5, 1.5)));
    }

    #[test]
    fn anchors_verify_under_identity() {
        let set = unit_cube();
        let transformed = set.transform(&Isometry3::identity());
        for anchor in set.anchors() {
            assert!(transformed.verify(anchor));
        }
    }

    #[test]
    fn violations_name_rows() {
        let cube = unit_cube().transform(&Isometry3::identity());
        assert_eq!(cube.violations(&Point3::new(2.0, 0.5, 0.5)), vec![10, 11]);
        assert!(cube.violations(&Point3::new(0.5, 0.5, 0.5)).is_empty());
    }

    #[test]
    fn translated_and_rotated() {
        let shifted = unit_cube().transform(&Isometry3::translation(5.0, 0.0, 0.0));
        assert!(shifted.verify(&Point3::new(5.5, 0.5, 0.5)));
        assert!(!shifted.verify(&Point3::new(0.5, 0.5, 0.5)));

        let turned =
            unit_cube().transform(&Isometry3::rotation(Vector3::new(0.0, 0.0, FRAC_PI_2)));
        assert!(turned.verify(&Point3::new(-0.5, 0.5, 0.5)));
        assert!(!turned.verify(&Point3::new(0.5, 0.5, 0.5)));
    }

    #[test]
    fn composed_matches_two_step() {
        let set = unit_cube();
        let pose = Isometry3::from_parts(
            Translation3::new(0.3, -0.2, 0.1),
            nalgebra::UnitQuaternion::from_euler_angles(0.4, -0.3, 1.1),
        );
        let transformed = set.transform(&pose);
        for i in 0..10 {
            for j in 0..10 {
                for k in 0..10 {
                    let point = Point3::new(
                        -1.0 + 0.23 * i as f64,
                        -1.0 + 0.23 * j as f64,
                        -1.0 + 0.23 * k as f64,
                    );
                    assert_eq!(set.verify_at(&pose, &point), transformed.verify(&point));
                }
            }
        }
    }

    #[test]
    fn batch_keeps_order() {
        let cube = unit_cube().transform(&Isometry3::identity());
        let points = [
            Point3::new(0.5, 0.5, 0.5),
            Point3::new(10.0, 10.0, 10.0),
            Point3::new(0.1, 0.9, 0.2),
            Point3::new(-0.1, 0.5, 0.5),
        ];
        assert_eq!(cube.verify_all(&points), vec![true, false, true, false]);
    }

    #[test]
    fn empty_set_is_vacuous() {
        let empty = ConstraintSet::default();
        assert!(empty.is_empty());
        let transformed = empty.transform(&Isometry3::translation(1.0, 2.0, 3.0));
        assert!(transformed.is_empty());
        assert!(transformed.verify(&Point3::new(1e9, -1e9, 0.0)));
    }

    #[test]
    fn policy_separates_unverifiable() {
        let cube = unit_cube();
        let empty = ConstraintSet::default();
        let pose = Isometry3::identity();
        let inside = Point3::new(0.5, 0.5, 0.5);
        let outside = Point3::new(3.0, 0.5, 0.5);
        let require = ConstraintPolicy::RequireConstraints;
        let open = ConstraintPolicy::Unconstrained;

        assert_eq!(ConstraintPolicy::default(), require);
        assert_eq!(check_reachability(Some(&cube), &pose, &inside, require), Reachability::Reachable);
        assert_eq!(check_reachability(Some(&cube), &pose, &outside, open), Reachability::Unreachable);
        assert_eq!(check_reachability(None, &pose, &outside, require), Reachability::Unverifiable);
        assert_eq!(check_reachability(Some(&empty), &pose, &outside, require), Reachability::Unverifiable);
        assert_eq!(check_reachability(None, &pose, &outside, open), Reachability::Reachable);
        assert!(!Reachability::Unverifiable.is_reachable());
    }

    #[test]
    fn out_of_range_index() {
        let vertices = [Point3::origin(), Point3::new(1.0, 0.0, 0.0)];
        let err = ConstraintSet::from_triangles(&vertices, &[[0, 1, 2]], &NoopDiagnostics)
            .unwrap_err();
        assert!(matches!(
            err,
            LoadError::InvalidIndex {
                face: 0,
                index: 2,
                num_vertices: 2
            }
        ));
    }

    #[test]
    fn degenerate_triangles_are_skipped() {
        let vertices = [
            Point3::origin(),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let recorder = Recorder::default();
        let set = ConstraintSet::from_triangles(&vertices, &[[0, 1, 2], [0, 1, 3]], &recorder)
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.normals()[0], Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(recorder.count(Level::Warn), 1);
    }

    #[test]
    fn file_without_faces_is_empty_with_warning() {
        use std::io::Write;
        for contents in ["", "# nothing here\n", "v 0 0 0\nv 1 0 0\nv 0 1 0\n"] {
            let mut file = tempfile::Builder::new().suffix(".obj").tempfile().unwrap();
            file.write_all(contents.as_bytes()).unwrap();
            file.flush().unwrap();

            let recorder = Recorder::default();
            let set = load_constraints(file.path(), &recorder).unwrap();
            assert!(set.is_empty(), "{contents:?}");
            assert_eq!(recorder.count(Level::Warn), 1, "{contents:?}");
        }
    }

    #[test]
    fn misaligned_rows() {
        let err = ConstraintSet::new(vec![Vector3::z()], Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            LoadError::RowMismatch {
                normals: 1,
                anchors: 0
            }
        ));
    }
}

const COMPONENT: &str = "constraints";

/// Outward normals and anchor points in the limb frame, one row per
/// triangle of the source mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintSet {
    normals: Vec<Vector3<f64>>,
    anchors: Vec<Point3<f64>>,
}

impl ConstraintSet {
    /// Builds a set from index-aligned rows. Normals are taken as given.
    pub fn new(normals: Vec<Vector3<f64>>, anchors: Vec<Point3<f64>>) -> Result<Self, LoadError> {
        if normals.len() != anchors.len() {
            return Err(LoadError::RowMismatch {
                normals: normals.len(),
                anchors: anchors.len(),
            });
        }
        Ok(Self { normals, anchors })
    }

    /// Builds a set from an in-memory triangle mesh.
    ///
    /// Triangles are read in order. Each gives the normal
    /// `normalize((p1 - p0) x (p2 - p0))` anchored at `p0`; triangles with no
    /// area are skipped and reported.
    pub fn from_triangles(
        vertices: &[Point3<f64>],
        triangles: &[[usize; 3]],
        diagnostics: &dyn Diagnostics,
    ) -> Result<Self, LoadError> {
        let mut set = Self::default();
        for (face, triangle) in triangles.iter().enumerate() {
            let mut corners = [Point3::origin(); 3];
            for (corner, &index) in corners.iter_mut().zip(triangle) {
                *corner = *vertices.get(index).ok_or(LoadError::InvalidIndex {
                    face,
                    index,
                    num_vertices: vertices.len(),
                })?;
            }
            let [p0, p1, p2] = corners;
            match (p1 - p0).cross(&(p2 - p0)).try_normalize(DEGENERATE_FACE_EPSILON) {
                Some(normal) => {
                    set.normals.push(normal);
                    set.anchors.push(p0);
                }
                None => diagnostics.warn(
                    COMPONENT,
                    format_args!("skipping degenerate triangle {face} {triangle:?}"),
                ),
            }
        }
        Ok(set)
    }

    pub fn normals(&self) -> &[Vector3<f64>] {
        &self.normals
    }

    pub fn anchors(&self) -> &[Point3<f64>] {
        &self.anchors
    }

    pub fn len(&self) -> usize {
        self.normals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.normals.is_empty()
    }

    /// Moves every row into the frame given by `transform`: normals are
    /// rotated and each offset is the rotated normal dotted with the moved
    /// anchor.
    pub fn transform(&self, transform: &Isometry3<f64>) -> TransformedConstraints {
        let (normals, offsets) = self
            .rows()
            .map(|(normal, anchor)| transform_row(transform, normal, anchor))
            .unzip();
        TransformedConstraints { normals, offsets }
    }

    /// Same answer as `self.transform(transform).verify(point)` without
    /// materializing the transformed rows.
    pub fn verify_at(&self, transform: &Isometry3<f64>, point: &Point3<f64>) -> bool {
        self.rows().all(|(normal, anchor)| {
            let (normal, offset) = transform_row(transform, normal, anchor);
            satisfies(&normal, offset, point)
        })
    }

    fn rows(&self) -> impl Iterator<Item = (&Vector3<f64>, &Point3<f64>)> {
        self.normals.iter().zip(&self.anchors)
    }
}

fn transform_row(
    transform: &Isometry3<f64>,
    normal: &Vector3<f64>,
    anchor: &Point3<f64>,
) -> (Vector3<f64>, f64) {
    let normal = transform.rotation * normal;
    let offset = normal.dot(&(transform * anchor).coords);
    (normal, offset)
}

fn satisfies(normal: &Vector3<f64>, offset: f64, point: &Point3<f64>) -> bool {
    normal.dot(&point.coords) <= offset
}

/// Constraint rows expressed in a world frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformedConstraints {
    normals: Vec<Vector3<f64>>,
    offsets: Vec<f64>,
}

impl TransformedConstraints {
    pub fn normals(&self) -> &[Vector3<f64>] {
        &self.normals
    }

    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.normals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.normals.is_empty()
    }

    /// True when `point` lies on the inner side of every plane. An empty set
    /// accepts every point.
    pub fn verify(&self, point: &Point3<f64>) -> bool {
        self.normals
            .iter()
            .zip(&self.offsets)
            .all(|(normal, &offset)| satisfies(normal, offset, point))
    }

    /// [`verify`](Self::verify) over a batch, in input order.
    pub fn verify_all(&self, points: &[Point3<f64>]) -> Vec<bool> {
        points.par_iter().map(|point| self.verify(point)).collect()
    }

    /// Indices of the rows `point` violates.
    pub fn violations(&self, point: &Point3<f64>) -> Vec<usize> {
        self.normals
            .iter()
            .zip(&self.offsets)
            .enumerate()
            .filter(|(_, (normal, offset))| !satisfies(normal, **offset, point))
            .map(|(row, _)| row)
            .collect()
    }
}

/// What a missing or empty constraint set means for a limb.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintPolicy {
    /// No constraints means every point is reachable.
    Unconstrained,
    /// No constraints means reachability cannot be decided.
    #[default]
    RequireConstraints,
}

/// Outcome of a policy-aware reachability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
    Unverifiable,
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        *self == Reachability::Reachable
    }
}

/// Checks `point` against `constraints` placed at `transform`.
///
/// A missing or empty set is never reported as a checked pass: it is
/// `Reachable` only under [`ConstraintPolicy::Unconstrained`].
pub fn check_reachability(
    constraints: Option<&ConstraintSet>,
    transform: &Isometry3<f64>,
    point: &Point3<f64>,
    policy: ConstraintPolicy,
) -> Reachability {
    match constraints.filter(|set| !set.is_empty()) {
        Some(set) if set.verify_at(transform, point) => Reachability::Reachable,
        Some(_) => Reachability::Unreachable,
        None => match policy {
            ConstraintPolicy::Unconstrained => Reachability::Reachable,
            ConstraintPolicy::RequireConstraints => Reachability::Unverifiable,
        },
    }
}

/// Loads constraints from a single-mesh OBJ file.
pub fn load_constraints(
    path: impl AsRef<Path>,
    diagnostics: &dyn Diagnostics,
) -> Result<ConstraintSet, LoadError> {
    load_constraints_scaled(path, &Vector3::repeat(1.0), diagnostics)
}

/// Loads constraints from a single-mesh OBJ file, scaling vertices per axis
/// before normals are computed.
///
/// A mirroring scale (odd number of negative factors) reverses the winding
/// of every triangle; normals are flipped back so they stay outward.
pub fn load_constraints_scaled(
    path: impl AsRef<Path>,
    scale: &Vector3<f64>,
    diagnostics: &dyn Diagnostics,
) -> Result<ConstraintSet, LoadError> {
    let path = path.as_ref();
    let result = read_mesh(path, scale, diagnostics);
    match &result {
        Ok(set) => diagnostics.info(
            COMPONENT,
            format_args!("loaded {} constraints from {}", set.len(), path.display()),
        ),
        Err(err) => diagnostics.warn(COMPONENT, format_args!("{err}")),
    }
    result
}

fn read_mesh(
    path: &Path,
    scale: &Vector3<f64>,
    diagnostics: &dyn Diagnostics,
) -> Result<ConstraintSet, LoadError> {
    let file = File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let options = tobj::LoadOptions {
        triangulate: true,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    };
    let (models, _) = tobj::load_obj_buf(&mut BufReader::new(file), &options, |_| {
        Err(tobj::LoadError::OpenFileFailed)
    })
    .map_err(|err| LoadError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    if models.len() > 1 {
        return Err(LoadError::MultipleMeshes {
            path: path.to_path_buf(),
            count: models.len(),
        });
    }
    // tobj yields a face-less model for files without geometry
    let Some(mesh) = models
        .first()
        .map(|model| &model.mesh)
        .filter(|mesh| !mesh.indices.is_empty())
    else {
        diagnostics.warn(
            COMPONENT,
            format_args!("no faces in {}, constraint set is empty", path.display()),
        );
        return Ok(ConstraintSet::default());
    };

    let vertices: Vec<Point3<f64>> = mesh
        .positions
        .chunks_exact(3)
        .map(|p| {
            Point3::new(
                p[0] as f64 * scale.x,
                p[1] as f64 * scale.y,
                p[2] as f64 * scale.z,
            )
        })
        .collect();
    let triangles: Vec<[usize; 3]> = mesh
        .indices
        .chunks_exact(3)
        .map(|t| [t[0] as usize, t[1] as usize, t[2] as usize])
        .collect();

    let mut set = ConstraintSet::from_triangles(&vertices, &triangles, diagnostics)?;
    if scale.x * scale.y * scale.z < 0.0 {
        set.normals.iter_mut().for_each(|normal| *normal = -*normal);
    }
    Ok(set)
}
