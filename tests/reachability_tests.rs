use std::io::Write;
use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use limbreach::{
    boxes::{Aabb, LeafBox},
    check_reachability, load_constraints, load_constraints_scaled,
    octree::OccupancyParams,
    sampling::{SamplingOptions, SamplingStrategy},
    settings, ConstraintPolicy, Error, JointRange, Limb, LoadError, LogDiagnostics,
    NoopDiagnostics, Reachability, Sample, SampleContainer, SerialChain,
};
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

/// Hip yaw, hip pitch and knee pitch with two 0.3 links hanging along -z.
fn leg() -> Limb {
    let link = Isometry3::translation(0.0, 0.0, -0.3);
    let chain = SerialChain::new(link)
        .revolute(Isometry3::identity(), Vector3::z())
        .revolute(Isometry3::identity(), Vector3::y())
        .revolute(link, Vector3::y());
    Limb::new(
        "left_leg",
        vec![
            JointRange::new(-0.5, 0.5),
            JointRange::new(-1.0, 1.0),
            JointRange::new(0.0, 2.0),
        ],
        chain,
    )
    .with_workspace(Aabb::cube(Point3::origin(), 0.65))
}

fn sorted_boxes(container: &SampleContainer) -> Vec<LeafBox> {
    let mut boxes = container.boxes().to_vec();
    boxes.sort_by(|a, b| {
        (0..3)
            .map(|axis| a.center[axis].total_cmp(&b.center[axis]))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    boxes
}

#[test]
fn unit_cube_fixture() {
    init();
    let cube = load_constraints(data("unit_cube.obj"), &LogDiagnostics::default()).unwrap();
    assert_eq!(cube.len(), 12);

    let transformed = cube.transform(&Isometry3::identity());
    assert!(transformed.verify(&Point3::new(0.5, 0.5, 0.5)));
    assert!(!transformed.verify(&Point3::new(10.0, 10.0, 10.0)));
    for anchor in cube.anchors() {
        assert!(transformed.verify(anchor));
    }
}

#[test]
fn far_point_along_each_normal_fails() {
    init();
    let cube = load_constraints(data("unit_cube.obj"), &NoopDiagnostics).unwrap();
    let transformed = cube.transform(&Isometry3::identity());
    let centroid = Point3::new(0.5, 0.5, 0.5);
    for normal in cube.normals() {
        assert!(!transformed.verify(&(centroid + normal * 2.0)));
    }
}

#[test]
fn scaled_meshes() {
    init();
    let path = data("unit_cube.obj");
    let stretched =
        load_constraints_scaled(&path, &Vector3::new(2.0, 1.0, 1.0), &NoopDiagnostics).unwrap();
    let stretched = stretched.transform(&Isometry3::identity());
    assert!(stretched.verify(&Point3::new(1.5, 0.5, 0.5)));
    assert!(!stretched.verify(&Point3::new(2.5, 0.5, 0.5)));

    let mirrored =
        load_constraints_scaled(&path, &Vector3::new(-1.0, 1.0, 1.0), &NoopDiagnostics).unwrap();
    let mirrored = mirrored.transform(&Isometry3::identity());
    assert!(mirrored.verify(&Point3::new(-0.5, 0.5, 0.5)));
    assert!(!mirrored.verify(&Point3::new(0.5, 0.5, 0.5)));
}

#[test]
fn mesh_from_scratch_file() {
    init();
    let mut file = tempfile::Builder::new().suffix(".obj").tempfile().unwrap();
    writeln!(file, "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 0 0 1").unwrap();
    writeln!(file, "f 1 3 2\nf 1 2 4\nf 1 4 3\nf 2 3 4").unwrap();
    file.flush().unwrap();

    let tetrahedron = load_constraints(file.path(), &NoopDiagnostics).unwrap();
    assert_eq!(tetrahedron.len(), 4);
    let transformed = tetrahedron.transform(&Isometry3::identity());
    assert!(transformed.verify(&Point3::new(0.2, 0.2, 0.2)));
    assert!(!transformed.verify(&Point3::new(0.5, 0.5, 0.5)));
}

#[test]
fn load_failures_are_typed() {
    init();
    let missing = load_constraints(data("missing.obj"), &NoopDiagnostics);
    assert!(matches!(missing, Err(LoadError::Io { .. })));

    let broken = load_constraints(data("broken.obj"), &NoopDiagnostics);
    assert!(matches!(broken, Err(LoadError::Parse { .. })));

    let two = load_constraints(data("two_cubes.obj"), &NoopDiagnostics);
    assert!(matches!(two, Err(LoadError::MultipleMeshes { count: 2, .. })));

    // callers that treat a failed load as "no constraints"
    let empty = load_constraints(data("missing.obj"), &NoopDiagnostics).unwrap_or_default();
    assert!(empty.is_empty());
}

#[test]
fn load_errors_convert_into_crate_errors() {
    fn load(path: &Path) -> limbreach::Result<usize> {
        Ok(load_constraints(path, &NoopDiagnostics)?.len())
    }
    assert!(matches!(
        load(&data("broken.obj")),
        Err(Error::Load(LoadError::Parse { .. }))
    ));
    assert_eq!(load(&data("unit_cube.obj")).unwrap(), 12);
}

#[test]
fn hundred_samples_fill_at_most_hundred_boxes() {
    init();
    let leg = leg();
    let container = SampleContainer::new(&leg, 100, 0.05, &LogDiagnostics::default()).unwrap();
    assert_eq!(container.samples().len(), 100);
    assert!(!container.boxes().is_empty());
    assert!(container.boxes().len() <= 100);

    let workspace = leg.workspace().unwrap();
    for sample in container.samples() {
        assert!(workspace.contains(&sample.effector_position));
        assert_relative_eq!(sample.reach, sample.effector_position.coords.norm());
        assert!(container.is_occupied(&sample.effector_position));
    }
}

#[test]
fn coincident_samples_give_one_box() {
    init();
    let position = Point3::new(0.12, -0.31, -0.44);
    let samples = (0..25).map(|id| Sample::at_position(id, position)).collect();
    let container = SampleContainer::from_samples(
        samples,
        0.05,
        &OccupancyParams::default(),
        &NoopDiagnostics,
    )
    .unwrap();
    assert_eq!(container.boxes().len(), 1);
    assert!(container.boxes()[0].contains(&position));
    assert_eq!(container.samples_in_cell(&position).len(), 25);
}

#[test]
fn sample_order_does_not_change_boxes() {
    init();
    let options = SamplingOptions {
        strategy: SamplingStrategy::Random,
        seed: 3,
    };
    let params = OccupancyParams::default();
    let forward = SampleContainer::with_options(&leg(), 200, 0.05, &options, &params, &NoopDiagnostics)
        .unwrap();

    let mut reversed = forward.samples().to_vec();
    reversed.reverse();
    let backward = SampleContainer::from_samples(reversed, 0.05, &params, &NoopDiagnostics).unwrap();

    assert_eq!(sorted_boxes(&forward), sorted_boxes(&backward));
}

#[test]
fn grid_sampling_is_reproducible() {
    init();
    let options = SamplingOptions {
        strategy: SamplingStrategy::Grid,
        seed: 0,
    };
    let params = OccupancyParams::default();
    let first = SampleContainer::with_options(&leg(), 64, 0.05, &options, &params, &NoopDiagnostics)
        .unwrap();
    let second = SampleContainer::with_options(&leg(), 64, 0.05, &options, &params, &NoopDiagnostics)
        .unwrap();
    assert_eq!(first.samples(), second.samples());
    assert_eq!(first.boxes(), second.boxes());
}

#[test]
fn samples_checked_against_placed_constraints() {
    init();
    let defaults = settings::load_default_config().unwrap();
    let container = SampleContainer::from_settings(
        &leg(),
        &settings::Settings {
            sample_count: 300,
            ..defaults.clone()
        },
        &NoopDiagnostics,
    )
    .unwrap();

    // half cube below the hip, in the limb frame
    let cube = load_constraints_scaled(
        data("unit_cube.obj"),
        &Vector3::new(1.2, 1.2, 0.6),
        &NoopDiagnostics,
    )
    .unwrap();
    let placement = Translation3::new(-0.6, -0.6, -0.6);
    let world = Isometry3::from_parts(
        Translation3::new(1.0, 2.0, 0.5),
        UnitQuaternion::from_euler_angles(0.0, 0.0, 0.7),
    );
    let frame = world * Isometry3::from_parts(placement, UnitQuaternion::identity());
    let transformed = cube.transform(&frame);

    let points: Vec<_> = container
        .samples()
        .iter()
        .map(|sample| world * sample.effector_position)
        .collect();
    let batch = transformed.verify_all(&points);

    for (sample, (point, inside)) in container.samples().iter().zip(points.iter().zip(&batch)) {
        assert_eq!(cube.verify_at(&frame, point), *inside);
        let expected = sample.effector_position.z <= 0.0;
        if (sample.effector_position.z).abs() > 1e-9 {
            assert_eq!(*inside, expected);
        }
        let reachability =
            check_reachability(Some(&cube), &frame, point, defaults.constraint_policy);
        assert_eq!(reachability.is_reachable(), *inside);
    }
    assert_eq!(
        check_reachability(None, &frame, &points[0], defaults.constraint_policy),
        Reachability::Unverifiable
    );
    assert_eq!(
        check_reachability(None, &frame, &points[0], ConstraintPolicy::Unconstrained),
        Reachability::Reachable
    );
}
