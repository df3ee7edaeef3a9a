//! Error types for operator construction and assembly.

use rf_core::RfError;
use rf_mesh::MeshError;
use rf_wrm::WrmError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OperatorError {
    /// Coarse/fine coupling with a refinement jump larger than one level.
    /// This is a malformed mesh, not a recoverable condition.
    #[error("Bad stencil at cell {cell} (level {level}) next to cell {neighbor} (level {neighbor_level})")]
    BadStencil {
        cell: usize,
        level: u32,
        neighbor: usize,
        neighbor_level: u32,
    },

    #[error("Ghost ring too thin: global cell {global_id} is not present on rank {rank}")]
    MissingGhost { global_id: usize, rank: usize },

    #[error("Boundary condition error: {what}")]
    BoundaryCondition { what: String },

    #[error("Invalid function: {what}")]
    InvalidFunction { what: String },

    #[error("Invalid tensor for cell {cell}: {what}")]
    InvalidTensor { cell: usize, what: String },

    #[error("Singular local matrix in cell {cell}")]
    SingularLocalMatrix { cell: usize },

    #[error("Setup error: {what}")]
    Setup { what: String },

    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("WRM error: {0}")]
    Wrm(#[from] WrmError),

    #[error("Core error: {0}")]
    Core(#[from] RfError),
}

pub type OperatorResult<T> = Result<T, OperatorError>;

impl OperatorError {
    /// Programming-contract and mesh-structure violations that no timestep
    /// cut can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OperatorError::BadStencil { .. } | OperatorError::MissingGhost { .. }
        )
    }
}
