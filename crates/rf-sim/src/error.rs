//! Error types for problem setup and transient runs.

use std::path::PathBuf;

use rf_mesh::MeshError;
use rf_operator::OperatorError;
use rf_solver::SolverError;
use rf_wrm::WrmError;
use thiserror::Error;

use crate::validate::ValidationError;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Invalid problem: {0}")]
    Validation(#[from] ValidationError),

    #[error("Timestep {dt:e} s fell below the minimum {min_dt:e} s at t = {t} s")]
    DtUnderflow { t: f64, dt: f64, min_dt: f64 },

    #[error("Step at t = {t} s failed after {retries} retries: {reason}")]
    RetriesExhausted {
        t: f64,
        retries: usize,
        reason: String,
    },

    #[error("Step limit {max_steps} reached at t = {t} s")]
    StepLimit { t: f64, max_steps: usize },

    #[error("Steady solve failed: {reason}")]
    SteadyFailed { reason: String },

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("Operator error: {0}")]
    Operator(#[from] OperatorError),

    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("WRM error: {0}")]
    Wrm(#[from] WrmError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SimResult<T> = Result<T, SimError>;

impl SimError {
    /// Contract violations that a smaller timestep cannot fix.
    pub fn is_fatal(&self) -> bool {
        match self {
            SimError::Solver(e) => e.is_fatal(),
            SimError::Operator(e) => e.is_fatal(),
            _ => false,
        }
    }
}
