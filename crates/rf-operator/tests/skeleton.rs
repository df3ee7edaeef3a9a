use std::sync::Mutex;

use nalgebra::Vector3;
use rf_core::{Communicator, RfResult, SerialComm};
use rf_mesh::{BoxMeshBuilder, MeshBuilder, UnstructuredMesh};
use rf_operator::{OperatorError, UnknownLayout, build_op_skel};

/// Rank 0 of a two-rank run: records what it sends, returns canned data.
struct RecordingComm {
    sent: Mutex<Vec<Vec<usize>>>,
    reply: Vec<Vec<usize>>,
}

impl Communicator for RecordingComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        2
    }

    fn max_all(&self, local: f64) -> f64 {
        local
    }

    fn min_all(&self, local: f64) -> f64 {
        local
    }

    fn sum_all(&self, local: f64) -> f64 {
        local
    }

    fn all_to_all(&self, send: Vec<Vec<usize>>) -> RfResult<Vec<Vec<usize>>> {
        *self.sent.lock().unwrap() = send;
        Ok(self.reply.clone())
    }
}

fn p(x: f64, y: f64) -> Vector3<f64> {
    Vector3::new(x, y, 0.0)
}

/// D | A | (B over C): A is coarse, B and C are its fine neighbors.
fn coarse_fine_mesh(fine_level: u32) -> UnstructuredMesh {
    let mut b = MeshBuilder::new(2);
    let d = b.add_cell(p(-1.0, 0.0), 4.0, 0);
    let a = b.add_cell(p(1.0, 0.0), 4.0, 0);
    let fb = b.add_cell(p(2.5, -0.5), 1.0, fine_level);
    let fc = b.add_cell(p(2.5, 0.5), 1.0, fine_level);
    b.add_face(d, Some(a), p(2.0, 0.0), p(0.0, 0.0));
    b.add_face(a, Some(fb), p(1.0, 0.0), p(2.0, -0.5));
    b.add_face(a, Some(fc), p(1.0, 0.0), p(2.0, 0.5));
    b.add_face(fb, Some(fc), p(0.0, 1.0), p(2.5, 0.0));
    b.build().unwrap()
}

/// Owned fine cell 0 next to a coarse ghost, which has a second ghost neighbor.
fn ghost_mesh() -> UnstructuredMesh {
    let mut b = MeshBuilder::new(2);
    let c0 = b.add_cell(p(0.25, 0.0), 0.25, 1);
    b.set_global_id(c0, 10);
    let g1 = b.add_ghost_cell(p(1.0, 0.0), 1.0, 0, 1, 20);
    let g2 = b.add_ghost_cell(p(2.0, 0.0), 1.0, 0, 1, 30);
    b.add_face(c0, Some(g1), p(0.5, 0.0), p(0.5, 0.0));
    b.add_face(g1, Some(g2), p(1.0, 0.0), p(1.5, 0.0));
    b.build().unwrap()
}

#[test]
fn skeleton_is_deterministic() {
    let mesh = BoxMeshBuilder::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0], &[3, 2, 2])
        .build()
        .unwrap();
    let a = build_op_skel(&mesh, &SerialComm, UnknownLayout::Cells, false).unwrap();
    let b = build_op_skel(&mesh, &SerialComm, UnknownLayout::Cells, false).unwrap();
    assert_eq!(a.pattern, b.pattern);
    assert_eq!(a.coloring.groups(), b.coloring.groups());
    assert!(a.coloring.is_valid(&a.pattern));
    // 7-point stencil on a 3x2x2 grid
    assert_eq!(a.pattern.nnz(), 12 + 2 * (2 * 4 + 3 * 2 + 3 * 2 * 1));
}

#[test]
fn hybrid_skeleton_couples_cells_and_faces() {
    let mesh = BoxMeshBuilder::new(&[0.0, 0.0], &[2.0, 1.0], &[2, 1])
        .build()
        .unwrap();
    let skel = build_op_skel(&mesh, &SerialComm, UnknownLayout::CellsAndFaces, false).unwrap();
    // 2 cells and 7 faces
    assert_eq!(skel.num_unknowns(), 9);
    assert_eq!(skel.pattern.row(0).len(), 1 + 4);
    assert!(skel.coloring.is_valid(&skel.pattern));
}

#[test]
fn dense_skeleton_fills_every_entry() {
    let mesh = BoxMeshBuilder::new(&[0.0], &[1.0], &[5]).build().unwrap();
    let skel = build_op_skel(&mesh, &SerialComm, UnknownLayout::Cells, true).unwrap();
    assert_eq!(skel.pattern.nnz(), 25);
    assert_eq!(skel.coloring.num_colors(), 5);
}

#[test]
fn fine_cells_reach_across_coarse_neighbor() {
    let mesh = coarse_fine_mesh(1);
    let skel = build_op_skel(&mesh, &SerialComm, UnknownLayout::Cells, false).unwrap();
    let pattern = &skel.pattern;
    assert_eq!(pattern.row(1), &[0, 1, 2, 3]);
    // fine cell 2 couples to the coarse cell's other neighbor, and back
    assert_eq!(pattern.row(2), &[0, 1, 2, 3]);
    assert_eq!(pattern.row(0), &[0, 1, 2, 3]);

    let uniform = coarse_fine_mesh(0);
    let skel = build_op_skel(&uniform, &SerialComm, UnknownLayout::Cells, false).unwrap();
    assert_eq!(skel.pattern.row(0), &[0, 1]);
}

#[test]
fn level_jump_of_two_is_fatal() {
    let mesh = coarse_fine_mesh(2);
    let err = build_op_skel(&mesh, &SerialComm, UnknownLayout::Cells, false).unwrap_err();
    assert!(matches!(err, OperatorError::BadStencil { level: 0, neighbor_level: 2, .. }));
    assert!(err.is_fatal());
}

#[test]
fn ghost_rows_are_sent_to_their_owner() {
    let mesh = ghost_mesh();
    let comm = RecordingComm {
        sent: Mutex::new(Vec::new()),
        reply: vec![Vec::new(), vec![10, 30]],
    };
    let skel = build_op_skel(&mesh, &comm, UnknownLayout::Cells, false).unwrap();
    let sent = comm.sent.lock().unwrap().clone();
    assert!(sent[0].is_empty());
    // the coarse ghost's other neighbor (gid 30) gains the fine cell 10;
    // rank 1 adds the direct (20, 10) coupling itself
    let pairs: Vec<(usize, usize)> = sent[1].chunks_exact(2).map(|c| (c[0], c[1])).collect();
    assert_eq!(pairs, vec![(30, 10)]);
    assert_eq!(skel.pattern.n_rows(), 1);
    assert_eq!(skel.pattern.n_cols(), 3);
    assert_eq!(skel.pattern.row(0), &[0, 1, 2]);
}

#[test]
fn unknown_ghost_in_reply_is_fatal() {
    let mesh = ghost_mesh();
    let comm = RecordingComm {
        sent: Mutex::new(Vec::new()),
        reply: vec![Vec::new(), vec![10, 99]],
    };
    let err = build_op_skel(&mesh, &comm, UnknownLayout::Cells, false).unwrap_err();
    assert!(matches!(err, OperatorError::MissingGhost { global_id: 99, rank: 0 }));
    assert!(err.is_fatal());
}

#[test]
fn hybrid_layout_rejects_refined_meshes() {
    let mesh = coarse_fine_mesh(1);
    assert!(build_op_skel(&mesh, &SerialComm, UnknownLayout::CellsAndFaces, false).is_err());
}

mod props {
    use proptest::prelude::*;
    use rf_core::SerialComm;
    use rf_mesh::BoxMeshBuilder;
    use rf_operator::{UnknownLayout, build_op_skel};

    proptest! {
        #[test]
        fn patterns_are_symmetric_and_colorings_valid(
            nx in 1usize..5,
            ny in 1usize..4,
            hybrid in any::<bool>(),
        ) {
            let mesh = BoxMeshBuilder::new(&[0.0, 0.0], &[1.0, 1.0], &[nx, ny])
                .build()
                .unwrap();
            let layout = if hybrid {
                UnknownLayout::CellsAndFaces
            } else {
                UnknownLayout::Cells
            };
            let skel = build_op_skel(&mesh, &SerialComm, layout, false).unwrap();
            let pattern = &skel.pattern;
            for (r, c) in pattern.entries() {
                prop_assert!(pattern.slot(c, r).is_some(), "({}, {}) has no mirror", r, c);
            }
            prop_assert!(skel.coloring.is_valid(pattern));
            let again = build_op_skel(&mesh, &SerialComm, layout, false).unwrap();
            prop_assert_eq!(&again.pattern, pattern);
        }
    }
}
