//! Error types for the nonlinear solver.
//!
//! Numerical non-convergence is not an error: it is reported through
//! [`crate::SolveOutcome`]. Errors here are setup problems, IO failures of
//! the diagnostic recorder, and contract violations.

use std::path::PathBuf;

use rf_core::RfError;
use rf_operator::OperatorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    /// The analytic Jacobian needs the two-point operator.
    #[error("Operator mismatch: {what}")]
    OperatorMismatch { what: String },

    /// `cur_time` before `prev_time`, or a non-finite interval.
    #[error("Invalid step interval: {prev_time} -> {cur_time}")]
    InvalidInterval { prev_time: f64, cur_time: f64 },

    #[error("Problem setup error: {what}")]
    ProblemSetup { what: String },

    #[error("Linear solver error: {what}")]
    Linear { what: String },

    #[error("Numeric error: {what}")]
    Numeric { what: String },

    #[error("Record IO error at {path}: {source}")]
    RecordIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Record serialization error: {0}")]
    RecordJson(#[from] serde_json::Error),

    #[error("Operator error: {0}")]
    Operator(#[from] OperatorError),

    #[error("Core error: {0}")]
    Core(#[from] RfError),
}

pub type SolverResult<T> = Result<T, SolverError>;

impl SolverError {
    /// Errors that a smaller timestep cannot fix. The outer controller must
    /// stop instead of retrying.
    pub fn is_fatal(&self) -> bool {
        match self {
            SolverError::OperatorMismatch { .. } | SolverError::InvalidInterval { .. } => true,
            SolverError::Operator(e) => e.is_fatal(),
            _ => false,
        }
    }
}
