//! Operator skeleton: the fixed sparsity pattern of the discrete operator.
//!
//! The pattern is derived from mesh adjacency once per solver instance and
//! reused for every Newton iteration; only numeric values change. On meshes
//! with refinement levels a fine cell next to a coarser cell also couples to
//! the coarse cell's neighbors. Contributions that land in rows owned by
//! another rank are exchanged with one collective `all_to_all` before any row
//! is finalized.

use std::collections::BTreeSet;

use rf_core::Communicator;
use rf_mesh::{Mesh, Ownership};
use sprs::CsMat;

use crate::coloring::ColumnColoring;
use crate::{OperatorError, OperatorResult};

/// Which entities carry pressure unknowns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnknownLayout {
    /// One pressure per cell.
    Cells,
    /// Cell pressures followed by face pressures.
    CellsAndFaces,
}

/// Compressed row pattern with sorted column indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SparsityPattern {
    n_rows: usize,
    n_cols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
}

impl SparsityPattern {
    pub fn from_rows(n_cols: usize, rows: &[BTreeSet<usize>]) -> Self {
        let mut row_ptr = Vec::with_capacity(rows.len() + 1);
        let mut col_idx = Vec::with_capacity(rows.iter().map(BTreeSet::len).sum());
        row_ptr.push(0);
        for row in rows {
            col_idx.extend(row.iter().copied());
            row_ptr.push(col_idx.len());
        }
        Self {
            n_rows: rows.len(),
            n_cols,
            row_ptr,
            col_idx,
        }
    }

    pub fn dense(n_rows: usize, n_cols: usize) -> Self {
        let row_ptr = (0..=n_rows).map(|r| r * n_cols).collect();
        let col_idx = (0..n_rows).flat_map(|_| 0..n_cols).collect();
        Self {
            n_rows,
            n_cols,
            row_ptr,
            col_idx,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    pub fn row(&self, r: usize) -> &[usize] {
        &self.col_idx[self.row_ptr[r]..self.row_ptr[r + 1]]
    }

    /// Storage position of `(r, c)` in the value array.
    pub fn slot(&self, r: usize, c: usize) -> Option<usize> {
        self.row(r)
            .binary_search(&c)
            .ok()
            .map(|k| self.row_ptr[r] + k)
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.n_rows).flat_map(move |r| self.row(r).iter().map(move |&c| (r, c)))
    }

    /// CSR matrix with this pattern and all values zero.
    pub fn zero_matrix(&self) -> CsMat<f64> {
        CsMat::new(
            (self.n_rows, self.n_cols),
            self.row_ptr.clone(),
            self.col_idx.clone(),
            vec![0.0; self.nnz()],
        )
    }
}

/// Sparsity pattern plus the column coloring used by FD Jacobians.
#[derive(Clone, Debug)]
pub struct OperatorSkeleton {
    pub layout: UnknownLayout,
    pub pattern: SparsityPattern,
    pub coloring: ColumnColoring,
}

impl OperatorSkeleton {
    pub fn num_unknowns(&self) -> usize {
        self.pattern.n_rows()
    }
}

/// Builds the operator skeleton (`BuildOpSkel`).
///
/// Collective: every rank must call it.
pub fn build_op_skel(
    mesh: &dyn Mesh,
    comm: &dyn Communicator,
    layout: UnknownLayout,
    dense: bool,
) -> OperatorResult<OperatorSkeleton> {
    let pattern = match layout {
        UnknownLayout::Cells => cell_pattern(mesh, comm)?,
        UnknownLayout::CellsAndFaces => hybrid_pattern(mesh)?,
    };
    let pattern = if dense {
        SparsityPattern::dense(pattern.n_rows(), pattern.n_cols())
    } else {
        pattern
    };
    let coloring = ColumnColoring::smallest_last(&pattern);
    tracing::debug!(
        rows = pattern.n_rows(),
        nnz = pattern.nnz(),
        colors = coloring.num_colors(),
        dense,
        "operator skeleton built"
    );
    Ok(OperatorSkeleton {
        layout,
        pattern,
        coloring,
    })
}

fn cell_pattern(mesh: &dyn Mesh, comm: &dyn Communicator) -> OperatorResult<SparsityPattern> {
    let n_owned = mesh.num_cells(Ownership::Owned);
    let n_used = mesh.num_cells(Ownership::Used);
    let mut rows: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n_owned];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); comm.size()];

    let mut add = |r: usize, c: usize| -> OperatorResult<()> {
        if r < n_owned {
            rows[r].insert(c);
            return Ok(());
        }
        let owner = mesh.cell_owner_rank(r);
        let buffer = outgoing.get_mut(owner).ok_or_else(|| OperatorError::Setup {
            what: format!("ghost cell {r} owned by rank {owner} outside the communicator"),
        })?;
        buffer.push(mesh.cell_global_id(r));
        buffer.push(mesh.cell_global_id(c));
        Ok(())
    };

    for c in 0..n_owned {
        add(c, c)?;
        let level = mesh.cell_level(c);
        for &f in mesh.cell_faces(c) {
            let Some(n) = mesh.face_neighbor(f, c) else {
                continue;
            };
            add(c, n)?;
            let neighbor_level = mesh.cell_level(n);
            if level.abs_diff(neighbor_level) > 1 {
                return Err(OperatorError::BadStencil {
                    cell: c,
                    level,
                    neighbor: n,
                    neighbor_level,
                });
            }
            if level > neighbor_level {
                // fine cell: the coarse-side flux reaches the coarse cell's neighbors
                for m in mesh.cell_neighbors(n) {
                    add(c, m)?;
                    add(m, c)?;
                }
            }
        }
    }

    let incoming = comm.all_to_all(outgoing)?;
    for buffer in incoming {
        for pair in buffer.chunks_exact(2) {
            let local = |gid: usize| {
                mesh.cell_local_id(gid).ok_or(OperatorError::MissingGhost {
                    global_id: gid,
                    rank: comm.rank(),
                })
            };
            let r = local(pair[0])?;
            let c = local(pair[1])?;
            if r >= n_owned {
                return Err(OperatorError::Setup {
                    what: format!("received coupling for non-owned row {r}"),
                });
            }
            rows[r].insert(c);
        }
    }
    Ok(SparsityPattern::from_rows(n_used, &rows))
}

fn hybrid_pattern(mesh: &dyn Mesh) -> OperatorResult<SparsityPattern> {
    let n_cells = mesh.num_cells(Ownership::Owned);
    let n_faces = mesh.num_faces(Ownership::Owned);
    if n_cells != mesh.num_cells(Ownership::Used) || n_faces != mesh.num_faces(Ownership::Used) {
        return Err(OperatorError::Setup {
            what: "cell+face unknowns need a mesh without ghost entities".into(),
        });
    }
    if let Some(c) = (0..n_cells).find(|&c| mesh.cell_level(c) != 0) {
        return Err(OperatorError::Setup {
            what: format!("cell+face unknowns need a single refinement level (cell {c})"),
        });
    }
    let n = n_cells + n_faces;
    let mut rows: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for c in 0..n_cells {
        rows[c].insert(c);
        for &f in mesh.cell_faces(c) {
            rows[c].insert(n_cells + f);
        }
    }
    for f in 0..n_faces {
        let row = &mut rows[n_cells + f];
        row.insert(n_cells + f);
        let (a, b) = mesh.face_cells(f);
        for c in std::iter::once(a).chain(b) {
            row.insert(c);
            row.extend(mesh.cell_faces(c).iter().map(|&g| n_cells + g));
        }
    }
    Ok(SparsityPattern::from_rows(n, &rows))
}
