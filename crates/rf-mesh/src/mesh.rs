//! Mesh access trait.
//!
//! # Conventions
//!
//! - Owned cells come first: `0..num_cells(Owned)`, ghosts follow up to
//!   `num_cells(Used)`. The same holds for faces.
//! - Each face has a first cell (always present) and an optional second
//!   cell. The stored area-weighted normal points from the first cell to the
//!   second (or out of the domain for boundary faces).
//! - Points always have three components; 2D meshes keep `z = 0`.
//! - Gravity acts along the last space dimension.

use nalgebra::Vector3;

use crate::MeshResult;

pub type Point = Vector3<f64>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Entities this rank owns.
    Owned,
    /// Owned plus ghost entities.
    Used,
}

/// Read-only mesh queries. Implementations must be `Send + Sync` so that cell
/// loops can run on the rayon pool.
pub trait Mesh: Send + Sync {
    fn space_dimension(&self) -> usize;

    fn num_cells(&self, ownership: Ownership) -> usize;

    fn num_faces(&self, ownership: Ownership) -> usize;

    /// Faces bounding cell `c`.
    fn cell_faces(&self, c: usize) -> &[usize];

    /// `(first, second)` cells of face `f`; `second` is `None` on the boundary.
    fn face_cells(&self, f: usize) -> (usize, Option<usize>);

    /// Area-weighted normal, pointing from the first cell to the second.
    fn face_normal(&self, f: usize) -> Point;

    fn face_centroid(&self, f: usize) -> Point;

    fn cell_volume(&self, c: usize) -> f64;

    fn cell_centroid(&self, c: usize) -> Point;

    /// Refinement level; uniform meshes are level 0 everywhere.
    fn cell_level(&self, _c: usize) -> u32 {
        0
    }

    fn cell_global_id(&self, c: usize) -> usize {
        c
    }

    fn cell_owner_rank(&self, _c: usize) -> usize {
        0
    }

    fn cell_local_id(&self, global_id: usize) -> Option<usize> {
        (global_id < self.num_cells(Ownership::Used)).then_some(global_id)
    }

    /// Cells of a named region, sorted ascending.
    fn region_cells(&self, name: &str) -> MeshResult<&[usize]>;

    /// Faces of a named region, sorted ascending.
    fn region_faces(&self, name: &str) -> MeshResult<&[usize]>;

    fn face_area(&self, f: usize) -> f64 {
        self.face_normal(f).norm()
    }

    /// Normal of `f` oriented outward from cell `c`, plus the orientation
    /// sign relative to the stored normal (`+1` if `c` is the first cell).
    fn outward_normal(&self, f: usize, c: usize) -> (Point, f64) {
        let n = self.face_normal(f);
        if self.face_cells(f).0 == c {
            (n, 1.0)
        } else {
            (-n, -1.0)
        }
    }

    /// The cell across face `f` from `c`, if any.
    fn face_neighbor(&self, f: usize, c: usize) -> Option<usize> {
        match self.face_cells(f) {
            (a, Some(b)) if a == c => Some(b),
            (a, Some(_)) => Some(a),
            (_, None) => None,
        }
    }

    /// Face-adjacent cells of `c`, in face order.
    fn cell_neighbors(&self, c: usize) -> Vec<usize> {
        self.cell_faces(c)
            .iter()
            .filter_map(|&f| self.face_neighbor(f, c))
            .collect()
    }

    /// Gravity-aligned coordinate (last space dimension) of a point.
    fn elevation(&self, x: &Point) -> f64 {
        x[self.space_dimension() - 1]
    }
}
