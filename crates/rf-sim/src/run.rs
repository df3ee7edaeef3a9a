//! Transient and steady Richards runs.

use std::fs;
use std::path::Path;
use std::time::Instant;

use nalgebra::DVector;
use rf_solver::{NlsControl, SolveStatus};
use serde::{Deserialize, Serialize};

use crate::controller::{StepController, TimeStepping};
use crate::problem::Problem;
use crate::{SimError, SimResult};

/// Committed state at one output time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub step: usize,
    pub time_s: f64,
    pub pressure_pa: Vec<f64>,
    pub saturation: Vec<f64>,
}

/// One accepted step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepReport {
    pub step: usize,
    pub time_s: f64,
    pub dt_s: f64,
    pub iterations: usize,
    pub function_evaluations: usize,
    pub retries: usize,
    pub error_norm: f64,
    /// Net boundary outflow at the end of the step [kg/s].
    pub boundary_outflow_kg_s: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: String,
    pub finished_at: String,
    pub wall_time_s: f64,
    pub steady: bool,
    pub steps: usize,
    pub failed_solves: usize,
    pub newton_iterations: usize,
    pub function_evaluations: usize,
    pub final_time_s: f64,
    pub initial_mass_kg: f64,
    pub final_mass_kg: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub summary: RunSummary,
    pub steps: Vec<StepReport>,
    pub snapshots: Vec<Snapshot>,
}

fn snapshot(problem: &Problem, step: usize, time_s: f64) -> Snapshot {
    Snapshot {
        step,
        time_s,
        pressure_pa: problem.solver.pressure_n().as_slice().to_vec(),
        saturation: problem.saturation(),
    }
}

/// Runs `problem` through `time`.
///
/// Failed solves are retried with a cut step; fatal errors and exhausted
/// retries end the run with an error.
pub fn run_richards(problem: &mut Problem, time: &TimeStepping) -> SimResult<RunRecord> {
    let started_at = chrono::Utc::now().to_rfc3339();
    let wall = Instant::now();
    let initial_mass_kg = problem.total_mass();
    let mut ctl = NlsControl::new();
    let mut snapshots = vec![snapshot(problem, 0, time.start)];
    let mut steps = Vec::new();
    let mut failed_solves = 0;
    let mut newton_iterations = 0;
    let mut function_evaluations = 0;

    let final_time_s = if time.steady {
        let outcome = problem.solver.solve(time.start, time.start, 0, &mut ctl)?;
        newton_iterations += outcome.iterations;
        function_evaluations += outcome.function_evaluations;
        if !outcome.is_converged() {
            return Err(SimError::SteadyFailed {
                reason: format!("{} ({})", outcome.status, outcome.ls_reason),
            });
        }
        problem.solver.commit();
        steps.push(StepReport {
            step: 1,
            time_s: time.start,
            dt_s: 0.0,
            iterations: outcome.iterations,
            function_evaluations: outcome.function_evaluations,
            retries: 0,
            error_norm: 0.0,
            boundary_outflow_kg_s: problem.solver.boundary_outflow(),
        });
        snapshots.push(snapshot(problem, 1, time.start));
        time.start
    } else {
        let mut controller = StepController::new(time.clone())?;
        let mut t = time.start;
        let mut step = 0;
        let mut previous: Option<(DVector<f64>, f64)> = None;
        let end_tol = 1e-12 * time.end.abs().max(1.0);
        while t < time.end - end_tol {
            if step >= time.max_steps {
                return Err(SimError::StepLimit {
                    t,
                    max_steps: time.max_steps,
                });
            }
            let mut retries = 0;
            let outcome = loop {
                let dt = controller.step_size(t);
                if time.use_predictor {
                    if let Some((p_prev, dt_prev)) = &previous {
                        let p_n = problem.solver.pressure_n();
                        let mut guess = p_n + (p_n - p_prev) * (dt / dt_prev);
                        problem.solver.modify_predictor(dt, &mut guess);
                        problem.solver.set_guess(&guess)?;
                    }
                }
                let result = problem.solver.solve(t, t + dt, step + 1, &mut ctl);
                let reason = match result {
                    Ok(outcome) if outcome.is_converged() => break (outcome, dt),
                    Ok(outcome) if outcome.status == SolveStatus::DtTooSmall => {
                        return Err(SimError::DtUnderflow {
                            t,
                            dt,
                            min_dt: problem.solver.config().min_dt,
                        });
                    }
                    Ok(outcome) => {
                        newton_iterations += outcome.iterations;
                        function_evaluations += outcome.function_evaluations;
                        format!("{} ({})", outcome.status, outcome.ls_reason)
                    }
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => e.to_string(),
                };
                failed_solves += 1;
                retries += 1;
                problem.solver.revert();
                controller.reject(t, dt, retries, &reason)?;
            };
            let (outcome, dt) = outcome;

            let p_old = problem.solver.pressure_n().clone();
            let p_new = problem.solver.cell_pressure();
            let error_norm = problem.solver.error_norm(&p_new, &(&p_new - &p_old));
            let boundary_outflow_kg_s = problem.solver.boundary_outflow();
            problem.solver.commit();
            previous = Some((p_old, dt));
            t += dt;
            step += 1;
            newton_iterations += outcome.iterations;
            function_evaluations += outcome.function_evaluations;
            controller.accept(dt, outcome.iterations, error_norm);
            tracing::info!(step, t, dt, iterations = outcome.iterations, retries, "step accepted");
            steps.push(StepReport {
                step,
                time_s: t,
                dt_s: dt,
                iterations: outcome.iterations,
                function_evaluations: outcome.function_evaluations,
                retries,
                error_norm,
                boundary_outflow_kg_s,
            });
            if step % time.record_every == 0 {
                snapshots.push(snapshot(problem, step, t));
            }
        }
        if step % time.record_every != 0 {
            snapshots.push(snapshot(problem, step, t));
        }
        t
    };

    let summary = RunSummary {
        started_at,
        finished_at: chrono::Utc::now().to_rfc3339(),
        wall_time_s: wall.elapsed().as_secs_f64(),
        steady: time.steady,
        steps: steps.len(),
        failed_solves,
        newton_iterations,
        function_evaluations,
        final_time_s,
        initial_mass_kg,
        final_mass_kg: problem.total_mass(),
    };
    tracing::info!(
        steps = summary.steps,
        failed = summary.failed_solves,
        newton = summary.newton_iterations,
        "run finished"
    );
    Ok(RunRecord {
        summary,
        steps,
        snapshots,
    })
}

/// Writes `summary.json`, `steps.jsonl`, and `snapshots.jsonl` under `dir`.
pub fn save_run(record: &RunRecord, dir: &Path) -> SimResult<()> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| SimError::Io { path, source }
    };
    fs::create_dir_all(dir).map_err(io_err(dir))?;

    let summary_path = dir.join("summary.json");
    fs::write(&summary_path, serde_json::to_string_pretty(&record.summary)?)
        .map_err(io_err(&summary_path))?;

    let mut steps = String::new();
    for s in &record.steps {
        steps.push_str(&serde_json::to_string(s)?);
        steps.push('\n');
    }
    let steps_path = dir.join("steps.jsonl");
    fs::write(&steps_path, steps).map_err(io_err(&steps_path))?;

    let mut snapshots = String::new();
    for s in &record.snapshots {
        snapshots.push_str(&serde_json::to_string(s)?);
        snapshots.push('\n');
    }
    let snapshots_path = dir.join("snapshots.jsonl");
    fs::write(&snapshots_path, snapshots).map_err(io_err(&snapshots_path))?;
    tracing::debug!(dir = %dir.display(), "run saved");
    Ok(())
}
