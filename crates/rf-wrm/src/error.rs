use rf_mesh::MeshError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WrmError {
    #[error("Invalid {model} parameter {name} = {value}: {reason}")]
    InvalidParameter {
        model: &'static str,
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("Cell {cell} is not covered by any water retention region")]
    UncoveredCell { cell: usize },

    #[error("Cell {cell} is covered by both '{first}' and '{second}'")]
    OverlappingRegions {
        cell: usize,
        first: String,
        second: String,
    },

    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),
}

pub type WrmResult<T> = Result<T, WrmError>;
