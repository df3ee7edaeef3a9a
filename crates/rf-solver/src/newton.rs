//! Newton driver for one Richards timestep.
//!
//! One [`RichardsSolver::solve`] call advances the committed state `p_n` from
//! `prev_time` to `cur_time`. Each iteration:
//!
//! 1. forms (or reuses) the Jacobian at the current iterate,
//! 2. solves `J y = F` for the correction, in scaled variables when
//!    `scale_soln_before_solve` is set,
//! 3. optionally clips the correction to a bounded saturation change,
//! 4. runs the post-check line search on `x - factor * y` (or the
//!    alternating update),
//! 5. tests convergence.
//!
//! The new state is only written back on convergence; a diverged solve
//! leaves `p_np1` at its incoming value so the caller can cut the step.

use std::sync::Arc;

use nalgebra::DVector;
use rf_core::Communicator;
use rf_core::comm::global_norm2;
use rf_core::numeric::{ensure_finite, ensure_len};
use rf_core::timing::solver_timing;
use rf_mesh::Ownership;
use sprs::CsMat;

use crate::control::{
    ConvergedReason, DivergedReason, NlsConfig, NlsControl, SolveOutcome, SolveStatus,
};
use crate::error_norm::{ErrorControl, error_norm};
use crate::evaluator::RichardsEvaluator;
use crate::line_search::{LineSearchOutcome, LineSearchParams, post_check};
use crate::linear::{LinearSolver, build_linear_solver};
use crate::modify::{alternating_update, clip_saturation_step};
use crate::record::{IterationFields, IterationRecorder};
use crate::reuse::JacobianReuse;
use crate::{SolverError, SolverResult};

pub struct RichardsSolver {
    evaluator: RichardsEvaluator,
    linear: Box<dyn LinearSolver>,
    comm: Arc<dyn Communicator>,
    config: NlsConfig,
    error_control: ErrorControl,
    reuse: JacobianReuse,
    jacobian: CsMat<f64>,
    recorder: Option<IterationRecorder>,
    p_n: DVector<f64>,
    p_np1: DVector<f64>,
}

impl RichardsSolver {
    pub fn new(
        evaluator: RichardsEvaluator,
        comm: Arc<dyn Communicator>,
        config: NlsConfig,
    ) -> SolverResult<Self> {
        config
            .validate()
            .map_err(|what| SolverError::ProblemSetup { what })?;
        let linear = build_linear_solver(
            config.linear_solver,
            config.linear_tolerance,
            config.linear_max_iterations,
        );
        let jacobian = evaluator.skeleton().pattern.zero_matrix();
        let recorder = config.record_file.as_ref().map(IterationRecorder::new);
        let p_n = DVector::zeros(evaluator.num_cells());
        let p_np1 = DVector::zeros(evaluator.num_unknowns());
        if comm.is_io_rank() {
            tracing::info!(
                jacobian = ?config.jacobian,
                linear_solver = linear.name(),
                reuses = config.max_num_jacobian_reuses,
                "Richards solver configured"
            );
        }
        Ok(Self {
            evaluator,
            linear,
            comm,
            reuse: JacobianReuse::new(config.max_num_jacobian_reuses),
            config,
            error_control: ErrorControl::default(),
            jacobian,
            recorder,
            p_n,
            p_np1,
        })
    }

    /// Replaces the linear solver chosen from the configuration.
    pub fn with_linear_solver(mut self, linear: Box<dyn LinearSolver>) -> Self {
        self.linear = linear;
        self
    }

    pub fn set_error_control(&mut self, control: ErrorControl) {
        self.error_control = control;
    }

    pub fn config(&self) -> &NlsConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &RichardsEvaluator {
        &self.evaluator
    }

    /// Sets both the committed state and the initial guess from cell
    /// pressures.
    pub fn set_initial_pressure(&mut self, cells: &DVector<f64>) -> SolverResult<()> {
        self.check_cells(cells)?;
        self.p_n = cells.clone();
        self.p_np1 = self.evaluator.extend(cells);
        Ok(())
    }

    /// Replaces the initial guess of the next solve (e.g. a predictor).
    pub fn set_guess(&mut self, cells: &DVector<f64>) -> SolverResult<()> {
        self.check_cells(cells)?;
        self.p_np1 = self.evaluator.extend(cells);
        Ok(())
    }

    fn check_cells(&self, cells: &DVector<f64>) -> SolverResult<()> {
        ensure_len(cells, self.evaluator.num_cells(), "cell pressures")?;
        for &p in cells.iter() {
            ensure_finite(p, "cell pressure")?;
        }
        Ok(())
    }

    /// Committed cell pressures.
    pub fn pressure_n(&self) -> &DVector<f64> {
        &self.p_n
    }

    /// Current full unknown vector (cells, then faces for hybrid layouts).
    pub fn solution(&self) -> &DVector<f64> {
        &self.p_np1
    }

    pub fn cell_pressure(&self) -> DVector<f64> {
        self.p_np1.rows(0, self.evaluator.num_cells()).into_owned()
    }

    /// Accepts the last converged solve as the new committed state.
    pub fn commit(&mut self) {
        self.p_n = self.cell_pressure();
    }

    /// Net mass leaving the domain through boundary faces [kg/s] at the
    /// current iterate, with boundary data of the last solve. Collective.
    pub fn boundary_outflow(&self) -> f64 {
        let mesh = self.evaluator.mesh();
        let owned = mesh.num_faces(Ownership::Owned);
        let local: f64 = self
            .evaluator
            .operator()
            .darcy_flux(&self.p_np1)
            .iter()
            .enumerate()
            .filter(|&(f, _)| f < owned && mesh.face_cells(f).1.is_none())
            .map(|(_, q)| q)
            .sum();
        self.comm.sum_all(local)
    }

    /// Discards the current guess and restarts from the committed state.
    pub fn revert(&mut self) {
        self.p_np1 = self.evaluator.extend(&self.p_n);
    }

    fn norm(&self, v: &DVector<f64>) -> f64 {
        global_norm2(self.comm.as_ref(), v, self.evaluator.num_unknowns())
    }

    /// Norm of `v` in the variables the Newton iteration works in.
    fn scaled_norm(&self, v: &DVector<f64>) -> f64 {
        if self.config.scale_soln_before_solve {
            self.norm(&v.component_div(self.evaluator.typical()))
        } else {
            self.norm(v)
        }
    }

    fn convergence(
        &self,
        iteration: usize,
        fnorm: f64,
        norm0: f64,
        snorm: f64,
        xnorm: f64,
        function_evaluations: usize,
    ) -> Option<SolveStatus> {
        let cfg = &self.config;
        if fnorm.is_nan() {
            return Some(SolveStatus::Diverged(DivergedReason::FnormNan));
        }
        if fnorm < cfg.atol {
            return Some(SolveStatus::Converged(ConvergedReason::FnormAbsolute));
        }
        if function_evaluations >= cfg.max_function_evals {
            return Some(SolveStatus::Diverged(DivergedReason::FunctionCount));
        }
        if iteration > 0 {
            if fnorm < cfg.rtol * norm0 {
                return Some(SolveStatus::Converged(ConvergedReason::FnormRelative));
            }
            if snorm < cfg.stol * xnorm {
                return Some(SolveStatus::Converged(ConvergedReason::SnormRelative));
            }
        }
        if iteration >= cfg.max_iterations {
            return Some(SolveStatus::Diverged(DivergedReason::MaxIterations));
        }
        None
    }

    /// Jacobian callback with reuse. Returns true when the matrix was
    /// assembled.
    fn update_jacobian(
        &mut self,
        x: &DVector<f64>,
        f: &DVector<f64>,
        ctl: &mut NlsControl,
    ) -> SolverResult<bool> {
        ctl.jacobian_calls += 1;
        if self.reuse.should_reuse() {
            ctl.jacobian_reuses += 1;
            tracing::trace!(remaining = self.reuse.remaining(), "reusing Jacobian");
            return Ok(false);
        }
        self.evaluator.jacobian(x, f, &mut self.jacobian)?;
        ctl.jacobian_assemblies += 1;
        if self.config.scale_soln_before_solve {
            let typical = self.evaluator.typical();
            let mut scaled = self.jacobian.clone();
            let columns: Vec<usize> = self
                .evaluator
                .skeleton()
                .pattern
                .entries()
                .map(|(_, c)| c)
                .collect();
            for (v, c) in scaled.data_mut().iter_mut().zip(columns) {
                *v *= typical[c];
            }
            self.linear.update(&scaled)?;
        } else {
            self.linear.update(&self.jacobian)?;
        }
        Ok(true)
    }

    fn line_search(
        &mut self,
        x: &DVector<f64>,
        y: &DVector<f64>,
        fnorm: f64,
        norm0: f64,
        ctl: &mut NlsControl,
    ) -> LineSearchOutcome {
        let params = LineSearchParams::from_config(&self.config, self.comm.is_io_rank());
        let n = self.evaluator.num_unknowns();
        let n_cells = self.evaluator.num_cells();
        let threshold = self.config.variable_switch_saturation_threshold;
        let wrm = self.evaluator.wrm().clone();
        let p_atm = self.evaluator.fluid().p_atm_pa();
        let comm = self.comm.as_ref();
        let evaluator = &mut self.evaluator;
        let eval = |w: &DVector<f64>, g: &mut DVector<f64>| {
            evaluator.residual(w, g);
            global_norm2(comm, g, n)
        };
        if threshold > 0.0 {
            post_check(
                &params,
                fnorm,
                norm0,
                |factor| alternating_update(&wrm, p_atm, threshold, x, y, factor, n_cells),
                eval,
                ctl,
            )
        } else {
            post_check(&params, fnorm, norm0, |factor| x - y * factor, eval, ctl)
        }
    }

    fn record_iteration(
        &self,
        step: usize,
        iteration: usize,
        x: &DVector<f64>,
        y: &DVector<f64>,
        ls: &LineSearchOutcome,
    ) -> SolverResult<()> {
        let Some(recorder) = &self.recorder else {
            return Ok(());
        };
        let n_cells = self.evaluator.num_cells();
        let cells = |v: &DVector<f64>| v.as_slice()[..n_cells].to_vec();
        let p_old = cells(x);
        let p_new = cells(&ls.candidate);
        let s_old = self.evaluator.saturations(&p_old);
        let s_new = self.evaluator.saturations(&p_new);
        let fields = IterationFields {
            res_undamped: cells(&ls.undamped_residual),
            dp_damped: p_old.iter().zip(&p_new).map(|(a, b)| a - b).collect(),
            dp_undamped: cells(y),
            ds: s_new.iter().zip(&s_old).map(|(a, b)| a - b).collect(),
            p_old,
            p_new_damped: p_new,
            s_new_damped: s_new,
            s_old,
            damping_factor: ls.factor,
        };
        let path = recorder.record(step, iteration, &fields)?;
        tracing::trace!(path = %path.display(), "iteration recorded");
        Ok(())
    }

    /// Solves the timestep `prev_time -> cur_time`. `timestep` only labels
    /// diagnostics.
    ///
    /// Recoverable failures come back as a non-converged
    /// [`SolveOutcome`]; `Err` is reserved for setup and contract violations,
    /// such as `cur_time < prev_time`. `cur_time == prev_time` is a steady
    /// solve.
    pub fn solve(
        &mut self,
        prev_time: f64,
        cur_time: f64,
        timestep: usize,
        ctl: &mut NlsControl,
    ) -> SolverResult<SolveOutcome> {
        let dt = cur_time - prev_time;
        let io = self.comm.is_io_rank();
        ctl.reset();
        if !(dt >= 0.0 && dt.is_finite()) {
            return Err(SolverError::InvalidInterval {
                prev_time,
                cur_time,
            });
        }
        if dt > 0.0 && dt < self.config.min_dt {
            if io {
                tracing::warn!(dt, min_dt = self.config.min_dt, "timestep too small");
            }
            return Ok(SolveOutcome {
                status: SolveStatus::DtTooSmall,
                iterations: 0,
                function_evaluations: 0,
                residual_norm: f64::NAN,
                ls_reason: ctl.ls_reason,
            });
        }

        self.reuse.reset_for_solve();
        self.evaluator.begin_step(&self.p_n, cur_time, dt);
        let n = self.evaluator.num_unknowns();

        let mut x = self.p_np1.clone();
        let mut f = DVector::zeros(n);
        self.evaluator.residual(&x, &mut f);
        ctl.function_evaluations = 1;
        let norm0 = self.norm(&f);
        let mut fnorm = norm0;
        let mut snorm = f64::NAN;
        let mut xnorm = self.scaled_norm(&x);
        if io {
            tracing::debug!(timestep, t = cur_time, dt, norm0, "Richards solve start");
        }

        let mut iteration = 0;
        let status = loop {
            if let Some(status) = self.convergence(
                iteration,
                fnorm,
                norm0,
                snorm,
                xnorm,
                ctl.function_evaluations,
            ) {
                break status;
            }

            self.update_jacobian(&x, &f, ctl)?;
            let mut y = DVector::zeros(n);
            let report = solver_timing::LINEAR_SOLVES.time(|| self.linear.apply_inverse(&f, &mut y));
            ctl.linear_iterations += report.iterations;
            if !report.succeeded() {
                if io {
                    tracing::warn!(code = report.code, residual = report.residual, "linear solve failed");
                }
                break SolveStatus::Diverged(DivergedReason::LinearSolve);
            }
            if self.config.scale_soln_before_solve {
                y.component_mul_assign(self.evaluator.typical());
            }
            if self.config.clip_saturation_step {
                ctl.saturation_clips += clip_saturation_step(
                    self.evaluator.wrm(),
                    self.evaluator.fluid().p_atm_pa(),
                    self.config.max_saturation_change,
                    &x,
                    &mut y,
                    self.evaluator.num_cells(),
                );
            }

            let ls = self.line_search(&x, &y, fnorm, norm0, ctl);
            ctl.function_evaluations += ls.evaluations;
            iteration += 1;
            ctl.iterations_taken = iteration;
            ctl.last_damping_factor = ls.factor;
            self.record_iteration(timestep, iteration, &x, &y, &ls)?;
            if !ctl.ls_success {
                break SolveStatus::Diverged(DivergedReason::LineSearch);
            }

            snorm = self.scaled_norm(&(&x - &ls.candidate));
            x = ls.candidate;
            f = ls.residual;
            fnorm = ls.norm;
            xnorm = self.scaled_norm(&x);
            if io {
                tracing::debug!(
                    iteration,
                    fnorm,
                    snorm,
                    factor = ls.factor,
                    ls = %ctl.ls_reason,
                    "Newton iteration"
                );
            }
        };

        if status.is_converged() {
            self.p_np1 = x;
        }
        if io {
            if status.is_converged() {
                tracing::debug!(timestep, iterations = iteration, fnorm, %status, "Richards solve");
            } else {
                tracing::info!(
                    timestep,
                    iterations = iteration,
                    fnorm,
                    %status,
                    ls = %ctl.ls_reason,
                    "Richards solve did not converge"
                );
            }
        }
        Ok(SolveOutcome {
            status,
            iterations: iteration,
            function_evaluations: ctl.function_evaluations,
            residual_norm: fnorm,
            ls_reason: ctl.ls_reason,
        })
    }

    /// Bounds a predicted state so no cell's saturation moves more than
    /// `max_saturation_change` from the committed state. `u` holds cell
    /// pressures. Returns true when anything changed.
    pub fn modify_predictor(&self, h: f64, u: &mut DVector<f64>) -> bool {
        let n_cells = self.evaluator.num_cells();
        let mut du = DVector::from_fn(n_cells, |c, _| self.p_n[c] - u[c]);
        let clipped = clip_saturation_step(
            self.evaluator.wrm(),
            self.evaluator.fluid().p_atm_pa(),
            self.config.max_saturation_change,
            &self.p_n,
            &mut du,
            n_cells,
        );
        if clipped > 0 {
            for c in 0..n_cells {
                u[c] = self.p_n[c] - du[c];
            }
            tracing::debug!(h, cells = clipped, "predictor clipped");
        }
        clipped > 0
    }

    /// Correction hook of an outer integrator: same as
    /// [`RichardsSolver::modify_saturation_step`].
    pub fn modify_correction(&self, h: f64, u: &DVector<f64>, du: &mut DVector<f64>) -> bool {
        self.modify_saturation_step(h, u, du)
    }

    /// Clips `du` (new iterate `u - du`) to `max_saturation_change` per
    /// cell. Returns true when any cell was clipped.
    pub fn modify_saturation_step(&self, h: f64, u: &DVector<f64>, du: &mut DVector<f64>) -> bool {
        let clipped = clip_saturation_step(
            self.evaluator.wrm(),
            self.evaluator.fluid().p_atm_pa(),
            self.config.max_saturation_change,
            u,
            du,
            self.evaluator.num_cells(),
        );
        if clipped > 0 {
            tracing::debug!(h, cells = clipped, "saturation step clipped");
        }
        clipped > 0
    }

    /// Step error measure for the outer timestep controller. Collective.
    pub fn error_norm(&self, u: &DVector<f64>, du: &DVector<f64>) -> f64 {
        error_norm(
            self.comm.as_ref(),
            self.error_control,
            u,
            du,
            self.evaluator.fluid().p_atm_pa(),
            self.evaluator.num_cells(),
            self.evaluator.functional_max_norm(),
        )
    }
}
