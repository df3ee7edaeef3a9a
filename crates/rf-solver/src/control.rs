//! Solver configuration, the per-solve step context, and solve outcomes.

use std::fmt;
use std::path::PathBuf;

use rf_core::constants::P_ATM_PA;
use serde::{Deserialize, Serialize};

/// How the Jacobian is formed. Fixed for the lifetime of one solver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JacobianStrategy {
    /// Colored finite differences of the full residual.
    #[default]
    FdColoring,
    /// Colored finite differences of the flux plus the exact accumulation
    /// diagonal.
    SemiAnalytic,
    /// Exact per-face flux derivatives; two-point operator only.
    Analytic,
    /// Operator assembled with relative permeability frozen at the iterate,
    /// plus the exact accumulation diagonal. Any discretization.
    Picard,
}

impl JacobianStrategy {
    /// Whether the operator must fill relative permeability derivatives.
    pub fn needs_rel_perm_derivatives(self) -> bool {
        self == JacobianStrategy::Analytic
    }
}

/// Which linear solver inverts the Jacobian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearSolverKind {
    #[default]
    DenseLu,
    BiCgStab,
}

/// Nonlinear solver parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NlsConfig {
    /// Absolute residual tolerance (2-norm).
    pub atol: f64,
    /// Residual tolerance relative to the initial residual.
    pub rtol: f64,
    /// Step tolerance relative to the solution norm.
    pub stol: f64,
    pub max_iterations: usize,
    pub max_function_evals: usize,

    pub ls_acceptance_factor: f64,
    pub ls_reduction_factor: f64,
    pub min_ls_factor: f64,
    pub max_ls_iterations: usize,
    /// 0 = silent, 1 = rejections and damping, 2 = every accepted step.
    pub monitor_line_search: u8,
    /// Reject a candidate whose residual norm grows past this multiple of
    /// the initial norm.
    pub max_residual_growth_factor: f64,

    /// Work on `p / typical_pressure` inside the Newton iteration.
    pub scale_soln_before_solve: bool,
    pub typical_pressure: f64,

    pub jacobian: JacobianStrategy,
    pub centered_diff: bool,
    /// Relative FD perturbation, multiplied by the typical value.
    pub fd_epsilon: f64,
    /// Dense Jacobian pattern (debugging).
    pub use_dense_jacobian: bool,
    pub max_num_jacobian_reuses: usize,

    pub linear_solver: LinearSolverKind,
    pub linear_tolerance: f64,
    pub linear_max_iterations: usize,

    /// Steps with `0 < dt < min_dt` are refused.
    pub min_dt: f64,
    /// Clip each Newton step to this saturation change (0 disables).
    pub max_saturation_change: f64,
    pub clip_saturation_step: bool,
    /// Positive enables the alternating (saturation-space) update below
    /// this saturation.
    pub variable_switch_saturation_threshold: f64,

    /// Directory for per-iteration diagnostic dumps.
    pub record_file: Option<PathBuf>,
}

impl Default for NlsConfig {
    fn default() -> Self {
        Self {
            atol: 1e-10,
            rtol: 1e-8,
            stol: 1e-12,
            max_iterations: 20,
            max_function_evals: 10_000,
            ls_acceptance_factor: 1.4,
            ls_reduction_factor: 0.1,
            min_ls_factor: 1e-8,
            max_ls_iterations: 10,
            monitor_line_search: 0,
            max_residual_growth_factor: 1e8,
            scale_soln_before_solve: true,
            typical_pressure: P_ATM_PA,
            jacobian: JacobianStrategy::FdColoring,
            centered_diff: false,
            fd_epsilon: 1e-8,
            use_dense_jacobian: false,
            max_num_jacobian_reuses: 0,
            linear_solver: LinearSolverKind::DenseLu,
            linear_tolerance: 1e-12,
            linear_max_iterations: 500,
            min_dt: 1e-2,
            max_saturation_change: 0.125,
            clip_saturation_step: false,
            variable_switch_saturation_threshold: 0.0,
            record_file: None,
        }
    }
}

impl NlsConfig {
    /// Checks parameter ranges; returns a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        let positive = [
            ("ls_acceptance_factor", self.ls_acceptance_factor),
            ("min_ls_factor", self.min_ls_factor),
            ("max_residual_growth_factor", self.max_residual_growth_factor),
            ("typical_pressure", self.typical_pressure),
            ("fd_epsilon", self.fd_epsilon),
        ];
        if let Some((name, v)) = positive.iter().find(|(_, v)| !(*v > 0.0)) {
            return Err(format!("{name} must be positive, got {v}"));
        }
        if !(self.ls_reduction_factor > 0.0 && self.ls_reduction_factor < 1.0) {
            return Err(format!(
                "ls_reduction_factor must be in (0, 1), got {}",
                self.ls_reduction_factor
            ));
        }
        if self.max_iterations == 0 {
            return Err("max_iterations must be at least 1".into());
        }
        if self.min_dt < 0.0 || self.max_saturation_change < 0.0 {
            return Err("min_dt and max_saturation_change must be non-negative".into());
        }
        Ok(())
    }
}

/// Outcome of one line-search post-check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LineSearchReason {
    #[default]
    InProgress,
    FullStepAccepted,
    DampedStep,
    ResidualGrowth,
    IterationCap,
    FactorFloor,
}

impl LineSearchReason {
    pub fn is_rejection(self) -> bool {
        matches!(
            self,
            LineSearchReason::ResidualGrowth
                | LineSearchReason::IterationCap
                | LineSearchReason::FactorFloor
        )
    }
}

impl fmt::Display for LineSearchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LineSearchReason::InProgress => "In Progress",
            LineSearchReason::FullStepAccepted => "Full linear step accepted",
            LineSearchReason::DampedStep => "Damped step successful",
            LineSearchReason::ResidualGrowth => {
                "Solution rejected.  Norm of residual has grown too large"
            }
            LineSearchReason::IterationCap => {
                "Solution rejected.  Linear system solved, but ls_iterations too large"
            }
            LineSearchReason::FactorFloor => {
                "Solution rejected.  Linear system solved, but ls_factor too small"
            }
        };
        f.write_str(s)
    }
}

/// Step context shared by the driver and its callbacks for one solve.
///
/// Write ownership: only the line search writes `ls_success` and
/// `ls_reason`; only the driver writes the counters.
#[derive(Clone, Debug, Default)]
pub struct NlsControl {
    pub ls_success: bool,
    pub ls_reason: LineSearchReason,
    pub iterations_taken: usize,
    pub function_evaluations: usize,
    /// Jacobian callbacks, whether assembled or reused.
    pub jacobian_calls: usize,
    pub jacobian_assemblies: usize,
    pub jacobian_reuses: usize,
    pub linear_iterations: usize,
    pub last_damping_factor: f64,
    pub saturation_clips: usize,
}

impl NlsControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears every field for a new solve.
    pub fn reset(&mut self) {
        *self = Self {
            ls_success: true,
            last_damping_factor: 1.0,
            ..Self::default()
        };
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergedReason {
    FnormAbsolute,
    FnormRelative,
    SnormRelative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DivergedReason {
    MaxIterations,
    FunctionCount,
    LineSearch,
    FnormNan,
    LinearSolve,
}

/// Status of one `solve` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    Converged(ConvergedReason),
    Diverged(DivergedReason),
    /// `0 < dt < min_dt`: nothing was evaluated.
    DtTooSmall,
}

impl SolveStatus {
    pub fn is_converged(self) -> bool {
        matches!(self, SolveStatus::Converged(_))
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Converged(r) => write!(f, "converged ({r:?})"),
            SolveStatus::Diverged(r) => write!(f, "diverged ({r:?})"),
            SolveStatus::DtTooSmall => f.write_str("timestep too small"),
        }
    }
}

/// Result of one `solve` call, handed to the outer timestep controller.
#[derive(Clone, Debug)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    pub iterations: usize,
    pub function_evaluations: usize,
    pub residual_norm: f64,
    pub ls_reason: LineSearchReason,
}

impl SolveOutcome {
    pub fn is_converged(&self) -> bool {
        self.status.is_converged()
    }
}
