//! Error types for mesh construction and queries.

use rf_core::RfError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Unknown region '{name}'")]
    UnknownRegion { name: String },

    #[error("Region '{name}' is empty")]
    EmptyRegion { name: String },

    #[error("Invalid topology: {what}")]
    InvalidTopology { what: String },

    #[error("Invalid mesh argument: {what}")]
    InvalidArg { what: String },
}

pub type MeshResult<T> = Result<T, MeshError>;

impl From<MeshError> for RfError {
    fn from(e: MeshError) -> Self {
        RfError::InvalidArg {
            what: format!("mesh: {e}"),
        }
    }
}
