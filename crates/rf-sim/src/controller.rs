//! Outer timestep controller.
//!
//! The controller only sees the outcome of each Newton solve: iteration
//! counts, the step error norm, and failures. Failed steps are retried with
//! `dt * cutback_factor`; converged steps grow or shrink the next `dt` from
//! the iteration count and, when `target_error` is set, from the error norm.

use serde::{Deserialize, Serialize};

use crate::{SimError, SimResult};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeStepping {
    pub start: f64,
    pub end: f64,
    /// A single `dt = 0` flux balance instead of a transient run.
    pub steady: bool,
    pub dt_initial: f64,
    pub dt_min: f64,
    pub dt_max: f64,
    pub cutback_factor: f64,
    pub grow_factor: f64,
    /// Converged in at most this many iterations: grow the next step.
    pub grow_below_iterations: usize,
    /// Converged in at least this many iterations: shrink the next step.
    pub shrink_above_iterations: usize,
    /// Error-norm target for step selection; `None` uses iteration counts
    /// only.
    pub target_error: Option<f64>,
    pub max_retries: usize,
    pub max_steps: usize,
    pub record_every: usize,
    /// Extrapolate the last two states for the initial Newton guess.
    pub use_predictor: bool,
}

impl Default for TimeStepping {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 1.0,
            steady: false,
            dt_initial: 1.0,
            dt_min: 1e-2,
            dt_max: 1e10,
            cutback_factor: 0.5,
            grow_factor: 1.25,
            grow_below_iterations: 5,
            shrink_above_iterations: 12,
            target_error: None,
            max_retries: 8,
            max_steps: 100_000,
            record_every: 1,
            use_predictor: false,
        }
    }
}

impl TimeStepping {
    pub fn validate(&self) -> Result<(), String> {
        if !self.steady && !(self.end > self.start) {
            return Err(format!("end ({}) must be after start ({})", self.end, self.start));
        }
        if !(self.dt_min > 0.0 && self.dt_min <= self.dt_initial && self.dt_initial <= self.dt_max) {
            return Err(format!(
                "need 0 < dt_min <= dt_initial <= dt_max, got {} / {} / {}",
                self.dt_min, self.dt_initial, self.dt_max
            ));
        }
        if !(self.cutback_factor > 0.0 && self.cutback_factor < 1.0) {
            return Err(format!("cutback_factor must be in (0, 1), got {}", self.cutback_factor));
        }
        if !(self.grow_factor >= 1.0) {
            return Err(format!("grow_factor must be at least 1, got {}", self.grow_factor));
        }
        if self.target_error.is_some_and(|e| !(e > 0.0)) {
            return Err("target_error must be positive".into());
        }
        if self.max_steps == 0 || self.record_every == 0 {
            return Err("max_steps and record_every must be at least 1".into());
        }
        Ok(())
    }
}

pub struct StepController {
    opts: TimeStepping,
    dt: f64,
}

impl StepController {
    pub fn new(opts: TimeStepping) -> SimResult<Self> {
        opts.validate().map_err(|reason| {
            SimError::Validation(crate::ValidationError::InvalidValue {
                field: "time".into(),
                value: String::new(),
                reason,
            })
        })?;
        Ok(Self {
            dt: opts.dt_initial,
            opts,
        })
    }

    pub fn options(&self) -> &TimeStepping {
        &self.opts
    }

    /// Proposed step size.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Step to take from `t`: the proposed size, stretched to hit `end`
    /// exactly when less than `dt_min` would otherwise remain.
    pub fn step_size(&self, t: f64) -> f64 {
        let remaining = self.opts.end - t;
        if remaining <= self.dt + self.opts.dt_min {
            remaining
        } else {
            self.dt
        }
    }

    /// Updates the proposal after a converged step of size `dt_taken`.
    pub fn accept(&mut self, dt_taken: f64, iterations: usize, error: f64) -> f64 {
        let by_iterations = if iterations <= self.opts.grow_below_iterations {
            self.opts.grow_factor
        } else if iterations >= self.opts.shrink_above_iterations {
            self.opts.cutback_factor
        } else {
            1.0
        };
        let factor = match self.opts.target_error {
            _ if error.is_nan() => self.opts.cutback_factor,
            Some(target) if error > 0.0 && error.is_finite() => {
                let by_error = (target / error)
                    .sqrt()
                    .clamp(self.opts.cutback_factor, self.opts.grow_factor);
                by_iterations.min(by_error)
            }
            _ => by_iterations,
        };
        // a stretched final step does not inflate the proposal
        let base = dt_taken.min(self.dt);
        self.dt = (base * factor).clamp(self.opts.dt_min, self.opts.dt_max);
        tracing::trace!(dt = self.dt, iterations, error, "next timestep");
        self.dt
    }

    /// Cuts the step after a failed attempt at `t`. `retries` counts the
    /// failures of the current step, this one included.
    pub fn reject(&mut self, t: f64, dt_failed: f64, retries: usize, reason: &str) -> SimResult<f64> {
        if retries > self.opts.max_retries {
            return Err(SimError::RetriesExhausted {
                t,
                retries: retries - 1,
                reason: reason.to_string(),
            });
        }
        let dt = dt_failed * self.opts.cutback_factor;
        if dt < self.opts.dt_min {
            return Err(SimError::DtUnderflow {
                t,
                dt,
                min_dt: self.opts.dt_min,
            });
        }
        tracing::warn!(t, dt_failed, dt, retries, reason, "timestep cut back");
        self.dt = dt;
        Ok(dt)
    }
}
