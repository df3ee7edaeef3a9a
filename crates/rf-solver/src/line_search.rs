//! Post-check line search.
//!
//! Given the Newton candidate `w(1)`, the search first rejects candidates
//! whose residual has grown past `max_residual_growth_factor * norm0`. It
//! then damps the step geometrically until
//! `|F(w)| < ls_acceptance_factor * |F(x)|`. The factor never drops below
//! `min_ls_factor`; reaching the floor, or exceeding `max_ls_iterations`
//! without an acceptable norm, rejects the step.

use nalgebra::DVector;

use crate::control::{LineSearchReason, NlsConfig, NlsControl};

#[derive(Clone, Copy, Debug)]
pub struct LineSearchParams {
    pub acceptance_factor: f64,
    pub reduction_factor: f64,
    pub min_factor: f64,
    pub max_iterations: usize,
    pub max_residual_growth_factor: f64,
    pub monitor: u8,
    /// Only the IO rank prints monitor output.
    pub io_rank: bool,
}

impl LineSearchParams {
    pub fn from_config(config: &NlsConfig, io_rank: bool) -> Self {
        Self {
            acceptance_factor: config.ls_acceptance_factor,
            reduction_factor: config.ls_reduction_factor,
            min_factor: config.min_ls_factor,
            max_iterations: config.max_ls_iterations,
            max_residual_growth_factor: config.max_residual_growth_factor,
            monitor: config.monitor_line_search,
            io_rank,
        }
    }

    fn monitor(&self, level: u8) -> bool {
        self.io_rank && self.monitor >= level
    }
}

/// Result of one post-check.
#[derive(Clone, Debug)]
pub struct LineSearchOutcome {
    /// Damping factor of the returned candidate.
    pub factor: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub candidate: DVector<f64>,
    pub residual: DVector<f64>,
    pub norm: f64,
    pub undamped_residual: DVector<f64>,
    pub undamped_norm: f64,
}

/// Runs the post-check. `candidate(factor)` builds the damped iterate;
/// `eval(w, out)` fills the residual and returns its global norm. Writes
/// only `ls_success` and `ls_reason` of `ctl`.
pub fn post_check(
    params: &LineSearchParams,
    fnorm: f64,
    norm0: f64,
    mut candidate: impl FnMut(f64) -> DVector<f64>,
    mut eval: impl FnMut(&DVector<f64>, &mut DVector<f64>) -> f64,
    ctl: &mut NlsControl,
) -> LineSearchOutcome {
    ctl.ls_success = true;
    ctl.ls_reason = LineSearchReason::InProgress;

    let mut w = candidate(1.0);
    let mut g = DVector::zeros(w.len());
    let mut gnorm = eval(&w, &mut g);
    let undamped_norm = gnorm;
    let undamped_residual = g.clone();
    let outcome = |factor, iterations, evaluations, w, g, norm| LineSearchOutcome {
        factor,
        iterations,
        evaluations,
        candidate: w,
        residual: g,
        norm,
        undamped_residual: undamped_residual.clone(),
        undamped_norm,
    };

    let grown = gnorm.is_nan() || (norm0 > 0.0 && gnorm / norm0 >= params.max_residual_growth_factor);
    if grown {
        let reason = LineSearchReason::ResidualGrowth;
        if params.monitor(1) {
            tracing::info!(norm = gnorm, norm0, "line search: {reason}");
        }
        ctl.ls_success = false;
        ctl.ls_reason = reason;
        return outcome(1.0, 0, 1, w, g, gnorm);
    }

    let mut factor = 1.0_f64;
    let mut iterations = 0;
    let mut evaluations = 1;
    let mut acceptable = gnorm < fnorm * params.acceptance_factor;
    while !acceptable && iterations <= params.max_iterations && factor > params.min_factor {
        factor = (factor * params.reduction_factor).max(params.min_factor);
        w = candidate(factor);
        gnorm = eval(&w, &mut g);
        evaluations += 1;
        acceptable = gnorm < fnorm * params.acceptance_factor;
        if params.monitor(1) {
            tracing::info!(
                iter = iterations,
                step_length = factor,
                newton_norm = undamped_norm,
                damped_norm = gnorm,
                "line search"
            );
        }
        iterations += 1;
    }

    let reason = if acceptable && factor > params.min_factor {
        if factor == 1.0 {
            LineSearchReason::FullStepAccepted
        } else {
            LineSearchReason::DampedStep
        }
    } else if !acceptable && iterations > params.max_iterations {
        LineSearchReason::IterationCap
    } else {
        LineSearchReason::FactorFloor
    };
    ctl.ls_success = !reason.is_rejection();
    ctl.ls_reason = reason;
    if reason.is_rejection() && params.monitor(1) {
        tracing::info!("line search: {reason}");
    } else if reason == LineSearchReason::FullStepAccepted && params.monitor(2) {
        tracing::info!("line search: {reason}");
    }
    outcome(factor, iterations, evaluations, w, g, gnorm)
}
