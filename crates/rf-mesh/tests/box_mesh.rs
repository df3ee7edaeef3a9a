//! Integration tests for generated box meshes.

use rf_mesh::{BoxMeshBuilder, Mesh, MeshError, Ownership};

#[test]
fn column_counts_and_regions() {
    let mesh = BoxMeshBuilder::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 4.0], &[1, 1, 4])
        .build()
        .unwrap();
    assert_eq!(mesh.space_dimension(), 3);
    assert_eq!(mesh.num_cells(Ownership::Owned), 4);
    // 2*4 x-faces + 2*4 y-faces + 5 z-faces
    assert_eq!(mesh.num_faces(Ownership::Used), 21);
    assert_eq!(mesh.region_faces("zmax").unwrap().len(), 1);
    assert_eq!(mesh.region_faces("zmin").unwrap().len(), 1);
    assert_eq!(mesh.region_cells("All").unwrap().len(), 4);
    for c in 0..4 {
        assert!((mesh.cell_volume(c) - 1.0).abs() < 1e-14);
        assert_eq!(mesh.cell_faces(c).len(), 6);
    }
}

#[test]
fn outward_normals_close_each_cell() {
    let mesh = BoxMeshBuilder::new(&[0.0, 0.0], &[2.0, 1.0], &[3, 2])
        .build()
        .unwrap();
    for c in 0..mesh.num_cells(Ownership::Owned) {
        let sum = mesh
            .cell_faces(c)
            .iter()
            .map(|&f| mesh.outward_normal(f, c).0)
            .fold(rf_mesh::Point::zeros(), |a, n| a + n);
        assert!(sum.norm() < 1e-12, "cell {c} normals do not close: {sum:?}");
    }
}

#[test]
fn boundary_normals_point_out() {
    let mesh = BoxMeshBuilder::new(&[0.0, 0.0], &[1.0, 1.0], &[2, 2])
        .build()
        .unwrap();
    for &f in mesh.region_faces("xmin").unwrap() {
        assert!(mesh.face_normal(f).x < 0.0);
    }
    for &f in mesh.region_faces("ymax").unwrap() {
        assert!(mesh.face_normal(f).y > 0.0);
    }
}

#[test]
fn named_regions_select_by_centroid() {
    let mesh = BoxMeshBuilder::new(&[0.0, 0.0], &[1.0, 2.0], &[2, 4])
        .cell_region("upper", &[0.0, 1.0], &[1.0, 2.0])
        .face_region("top_left", &[0.0, 2.0], &[0.5, 2.0])
        .build()
        .unwrap();
    assert_eq!(mesh.region_cells("upper").unwrap().len(), 4);
    assert_eq!(mesh.region_faces("top_left").unwrap().len(), 1);
}

#[test]
fn empty_region_is_rejected() {
    let err = BoxMeshBuilder::new(&[0.0], &[1.0], &[4])
        .cell_region("outside", &[5.0], &[6.0])
        .build()
        .unwrap_err();
    assert!(matches!(err, MeshError::EmptyRegion { .. }));
}

mod props {
    use proptest::prelude::*;
    use rf_mesh::{BoxMeshBuilder, Mesh, Ownership};

    proptest! {
        #[test]
        fn cell_volumes_fill_the_box(
            nx in 1usize..5,
            ny in 1usize..5,
            nz in 1usize..5,
            lx in 0.1f64..10.0,
            ly in 0.1f64..10.0,
            lz in 0.1f64..10.0,
        ) {
            let mesh = BoxMeshBuilder::new(&[0.0, 0.0, 0.0], &[lx, ly, lz], &[nx, ny, nz])
                .build()
                .unwrap();
            prop_assert_eq!(mesh.num_cells(Ownership::Owned), nx * ny * nz);
            let total: f64 = (0..nx * ny * nz).map(|c| mesh.cell_volume(c)).sum();
            prop_assert!((total - lx * ly * lz).abs() < 1e-9 * lx * ly * lz);
            let top: f64 = mesh
                .region_faces("zmax")
                .unwrap()
                .iter()
                .map(|&f| mesh.face_area(f))
                .sum();
            prop_assert!((top - lx * ly).abs() < 1e-9 * lx * ly);
        }
    }
}
