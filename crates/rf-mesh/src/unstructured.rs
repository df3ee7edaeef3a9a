//! Flat-array mesh and its builder.

use std::collections::BTreeMap;

use crate::mesh::{Mesh, Ownership, Point};
use crate::{MeshError, MeshResult};

#[derive(Clone, Debug)]
struct CellRecord {
    centroid: Point,
    volume: f64,
    level: u32,
    owner_rank: usize,
    global_id: usize,
}

#[derive(Clone, Debug)]
struct FaceRecord {
    cells: (usize, Option<usize>),
    normal: Point,
    centroid: Point,
}

/// Immutable mesh with compressed cell-to-face adjacency.
#[derive(Clone, Debug)]
pub struct UnstructuredMesh {
    dim: usize,
    n_owned_cells: usize,
    n_owned_faces: usize,
    cell_centroid: Vec<Point>,
    cell_volume: Vec<f64>,
    cell_level: Vec<u32>,
    cell_owner: Vec<usize>,
    cell_gid: Vec<usize>,
    gid_to_local: BTreeMap<usize, usize>,
    cell_face_offsets: Vec<usize>,
    cell_face_indices: Vec<usize>,
    face_cells: Vec<(usize, Option<usize>)>,
    face_normal: Vec<Point>,
    face_centroid: Vec<Point>,
    cell_regions: BTreeMap<String, Vec<usize>>,
    face_regions: BTreeMap<String, Vec<usize>>,
}

impl UnstructuredMesh {
    pub fn cell_region_names(&self) -> impl Iterator<Item = &str> {
        self.cell_regions.keys().map(String::as_str)
    }

    pub fn face_region_names(&self) -> impl Iterator<Item = &str> {
        self.face_regions.keys().map(String::as_str)
    }
}

impl Mesh for UnstructuredMesh {
    fn space_dimension(&self) -> usize {
        self.dim
    }

    fn num_cells(&self, ownership: Ownership) -> usize {
        match ownership {
            Ownership::Owned => self.n_owned_cells,
            Ownership::Used => self.cell_volume.len(),
        }
    }

    fn num_faces(&self, ownership: Ownership) -> usize {
        match ownership {
            Ownership::Owned => self.n_owned_faces,
            Ownership::Used => self.face_cells.len(),
        }
    }

    fn cell_faces(&self, c: usize) -> &[usize] {
        &self.cell_face_indices[self.cell_face_offsets[c]..self.cell_face_offsets[c + 1]]
    }

    fn face_cells(&self, f: usize) -> (usize, Option<usize>) {
        self.face_cells[f]
    }

    fn face_normal(&self, f: usize) -> Point {
        self.face_normal[f]
    }

    fn face_centroid(&self, f: usize) -> Point {
        self.face_centroid[f]
    }

    fn cell_volume(&self, c: usize) -> f64 {
        self.cell_volume[c]
    }

    fn cell_centroid(&self, c: usize) -> Point {
        self.cell_centroid[c]
    }

    fn cell_level(&self, c: usize) -> u32 {
        self.cell_level[c]
    }

    fn cell_global_id(&self, c: usize) -> usize {
        self.cell_gid[c]
    }

    fn cell_owner_rank(&self, c: usize) -> usize {
        self.cell_owner[c]
    }

    fn cell_local_id(&self, global_id: usize) -> Option<usize> {
        self.gid_to_local.get(&global_id).copied()
    }

    fn region_cells(&self, name: &str) -> MeshResult<&[usize]> {
        self.cell_regions
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| MeshError::UnknownRegion {
                name: name.to_string(),
            })
    }

    fn region_faces(&self, name: &str) -> MeshResult<&[usize]> {
        self.face_regions
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| MeshError::UnknownRegion {
                name: name.to_string(),
            })
    }
}

/// Incremental builder for [`UnstructuredMesh`].
///
/// Owned cells must be added before ghost cells, and faces whose first cell
/// is owned before faces whose first cell is a ghost.
pub struct MeshBuilder {
    dim: usize,
    rank: usize,
    cells: Vec<CellRecord>,
    n_owned_cells: usize,
    faces: Vec<FaceRecord>,
    cell_regions: BTreeMap<String, Vec<usize>>,
    face_regions: BTreeMap<String, Vec<usize>>,
}

impl MeshBuilder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            rank: 0,
            cells: Vec::new(),
            n_owned_cells: 0,
            faces: Vec::new(),
            cell_regions: BTreeMap::new(),
            face_regions: BTreeMap::new(),
        }
    }

    /// Sets the rank that owns cells added with [`MeshBuilder::add_cell`].
    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    /// Adds an owned cell. Its global id defaults to its local index.
    pub fn add_cell(&mut self, centroid: Point, volume: f64, level: u32) -> usize {
        let id = self.cells.len();
        self.cells.push(CellRecord {
            centroid,
            volume,
            level,
            owner_rank: self.rank,
            global_id: id,
        });
        if self.n_owned_cells == id {
            self.n_owned_cells += 1;
        }
        id
    }

    /// Adds a ghost cell owned by another rank.
    pub fn add_ghost_cell(
        &mut self,
        centroid: Point,
        volume: f64,
        level: u32,
        owner_rank: usize,
        global_id: usize,
    ) -> usize {
        let id = self.cells.len();
        self.cells.push(CellRecord {
            centroid,
            volume,
            level,
            owner_rank,
            global_id,
        });
        id
    }

    /// Overrides the global id of an owned cell.
    pub fn set_global_id(&mut self, c: usize, global_id: usize) {
        if let Some(cell) = self.cells.get_mut(c) {
            cell.global_id = global_id;
        }
    }

    /// Adds a face with an area-weighted normal pointing from `first` to `second`.
    pub fn add_face(
        &mut self,
        first: usize,
        second: Option<usize>,
        normal: Point,
        centroid: Point,
    ) -> usize {
        self.faces.push(FaceRecord {
            cells: (first, second),
            normal,
            centroid,
        });
        self.faces.len() - 1
    }

    pub fn cell_region(&mut self, name: impl Into<String>, cells: Vec<usize>) -> &mut Self {
        self.cell_regions
            .entry(name.into())
            .or_default()
            .extend(cells);
        self
    }

    pub fn face_region(&mut self, name: impl Into<String>, faces: Vec<usize>) -> &mut Self {
        self.face_regions
            .entry(name.into())
            .or_default()
            .extend(faces);
        self
    }

    pub fn build(self) -> MeshResult<UnstructuredMesh> {
        if !(1..=3).contains(&self.dim) {
            return Err(MeshError::InvalidArg {
                what: format!("space dimension {} not in 1..=3", self.dim),
            });
        }
        let n_cells = self.cells.len();
        if self.cells[self.n_owned_cells..]
            .iter()
            .any(|c| c.owner_rank == self.rank)
        {
            return Err(MeshError::InvalidTopology {
                what: "owned cell added after a ghost cell".into(),
            });
        }
        if let Some((c, _)) = self
            .cells
            .iter()
            .enumerate()
            .find(|(_, c)| !(c.volume > 0.0))
        {
            return Err(MeshError::InvalidTopology {
                what: format!("cell {c} has non-positive volume"),
            });
        }

        let mut per_cell: Vec<Vec<usize>> = vec![Vec::new(); n_cells];
        let mut n_owned_faces = 0;
        let mut seen_ghost_face = false;
        for (f, face) in self.faces.iter().enumerate() {
            let (a, b) = face.cells;
            if a >= n_cells || b.is_some_and(|b| b >= n_cells || b == a) {
                return Err(MeshError::InvalidTopology {
                    what: format!("face {f} references invalid cells {:?}", face.cells),
                });
            }
            if !(face.normal.norm() > 0.0) {
                return Err(MeshError::InvalidTopology {
                    what: format!("face {f} has a zero normal"),
                });
            }
            if a < self.n_owned_cells {
                if seen_ghost_face {
                    return Err(MeshError::InvalidTopology {
                        what: format!("owned face {f} added after a ghost face"),
                    });
                }
                n_owned_faces += 1;
            } else {
                seen_ghost_face = true;
            }
            per_cell[a].push(f);
            if let Some(b) = b {
                per_cell[b].push(f);
            }
        }
        if let Some(c) = (0..self.n_owned_cells).find(|&c| per_cell[c].is_empty()) {
            return Err(MeshError::InvalidTopology {
                what: format!("cell {c} has no faces"),
            });
        }

        let mut cell_face_offsets = Vec::with_capacity(n_cells + 1);
        let mut cell_face_indices = Vec::new();
        cell_face_offsets.push(0);
        for faces in &per_cell {
            cell_face_indices.extend_from_slice(faces);
            cell_face_offsets.push(cell_face_indices.len());
        }

        let mut cell_regions = self.cell_regions;
        for (name, ids) in cell_regions.iter_mut() {
            ids.sort_unstable();
            ids.dedup();
            if ids.last().is_some_and(|&c| c >= n_cells) {
                return Err(MeshError::InvalidArg {
                    what: format!("cell region '{name}' references a missing cell"),
                });
            }
        }
        let mut face_regions = self.face_regions;
        for (name, ids) in face_regions.iter_mut() {
            ids.sort_unstable();
            ids.dedup();
            if ids.last().is_some_and(|&f| f >= self.faces.len()) {
                return Err(MeshError::InvalidArg {
                    what: format!("face region '{name}' references a missing face"),
                });
            }
        }

        let gid_to_local = self
            .cells
            .iter()
            .enumerate()
            .map(|(c, rec)| (rec.global_id, c))
            .collect();

        tracing::debug!(
            cells = n_cells,
            owned_cells = self.n_owned_cells,
            faces = self.faces.len(),
            "mesh built"
        );

        Ok(UnstructuredMesh {
            dim: self.dim,
            n_owned_cells: self.n_owned_cells,
            n_owned_faces,
            cell_centroid: self.cells.iter().map(|c| c.centroid).collect(),
            cell_volume: self.cells.iter().map(|c| c.volume).collect(),
            cell_level: self.cells.iter().map(|c| c.level).collect(),
            cell_owner: self.cells.iter().map(|c| c.owner_rank).collect(),
            cell_gid: self.cells.iter().map(|c| c.global_id).collect(),
            gid_to_local,
            cell_face_offsets,
            cell_face_indices,
            face_cells: self.faces.iter().map(|f| f.cells).collect(),
            face_normal: self.faces.iter().map(|f| f.normal).collect(),
            face_centroid: self.faces.iter().map(|f| f.centroid).collect(),
            cell_regions,
            face_regions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_cells() -> MeshBuilder {
        let mut b = MeshBuilder::new(1);
        let c0 = b.add_cell(Point::new(0.5, 0.0, 0.0), 1.0, 0);
        let c1 = b.add_cell(Point::new(1.5, 0.0, 0.0), 1.0, 0);
        b.add_face(c0, None, Point::new(-1.0, 0.0, 0.0), Point::zeros());
        b.add_face(c0, Some(c1), Point::new(1.0, 0.0, 0.0), Point::new(1.0, 0.0, 0.0));
        b.add_face(c1, None, Point::new(1.0, 0.0, 0.0), Point::new(2.0, 0.0, 0.0));
        b
    }

    #[test]
    fn adjacency_is_compressed() {
        let mesh = two_cells().build().unwrap();
        assert_eq!(mesh.num_cells(Ownership::Owned), 2);
        assert_eq!(mesh.num_faces(Ownership::Used), 3);
        assert_eq!(mesh.cell_faces(0), &[0, 1]);
        assert_eq!(mesh.cell_faces(1), &[1, 2]);
        assert_eq!(mesh.cell_neighbors(0), vec![1]);
        let (n, dir) = mesh.outward_normal(1, 1);
        assert_eq!(dir, -1.0);
        assert_eq!(n.x, -1.0);
    }

    #[test]
    fn rejects_zero_normal() {
        let mut b = two_cells();
        b.add_face(0, None, Point::zeros(), Point::zeros());
        assert!(matches!(b.build(), Err(MeshError::InvalidTopology { .. })));
    }

    #[test]
    fn unknown_region_is_an_error() {
        let mesh = two_cells().build().unwrap();
        assert!(matches!(
            mesh.region_cells("nope"),
            Err(MeshError::UnknownRegion { .. })
        ));
    }

    #[test]
    fn ghost_cells_keep_their_owner() {
        let mut b = MeshBuilder::new(1).with_rank(1);
        let c0 = b.add_cell(Point::new(1.5, 0.0, 0.0), 1.0, 0);
        b.set_global_id(c0, 4);
        let g = b.add_ghost_cell(Point::new(0.5, 0.0, 0.0), 1.0, 0, 0, 7);
        b.add_face(c0, Some(g), Point::new(-1.0, 0.0, 0.0), Point::new(1.0, 0.0, 0.0));
        let mesh = b.build().unwrap();
        assert_eq!(mesh.num_cells(Ownership::Owned), 1);
        assert_eq!(mesh.num_cells(Ownership::Used), 2);
        assert_eq!(mesh.cell_owner_rank(c0), 1);
        assert_eq!(mesh.cell_owner_rank(g), 0);
        assert_eq!(mesh.cell_local_id(7), Some(g));
        assert_eq!(mesh.cell_local_id(4), Some(c0));
    }
}
