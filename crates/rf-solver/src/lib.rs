//! Nonlinear solver for the discrete Richards equation.
//!
//! Builds on the operators in `rf-operator`:
//! - [`RichardsEvaluator`]: residual and Jacobian (colored finite
//!   differences, semi-analytic, or analytic two-point derivatives)
//! - [`RichardsSolver`]: Newton iteration with a post-check line search,
//!   Jacobian reuse, saturation-step clipping, and the alternating update
//! - [`error_norm`]: the step error handed to an outer timestep controller

pub mod control;
pub mod error;
pub mod error_norm;
pub mod evaluator;
pub mod line_search;
pub mod linear;
pub mod modify;
pub mod newton;
pub mod record;
pub mod reuse;

pub use control::{
    ConvergedReason, DivergedReason, JacobianStrategy, LineSearchReason, LinearSolverKind,
    NlsConfig, NlsControl, SolveOutcome, SolveStatus,
};
pub use error::{SolverError, SolverResult};
pub use error_norm::{ErrorControl, error_norm};
pub use evaluator::{Accumulation, RichardsEvaluator, Storage};
pub use line_search::{LineSearchOutcome, LineSearchParams, post_check};
pub use linear::{BiCgStab, DenseLu, LinearSolveReport, LinearSolver, build_linear_solver};
pub use modify::{alternating_update, clip_saturation_step};
pub use newton::RichardsSolver;
pub use record::{IterationFields, IterationRecorder};
pub use reuse::JacobianReuse;
