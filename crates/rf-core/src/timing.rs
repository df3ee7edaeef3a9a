//! Opt-in timing for the nonlinear solve.
//!
//! Disabled by default. Enable programmatically or by setting `RF_TIMING`.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

static ENABLED: AtomicBool = AtomicBool::new(false);
static ENV_ENABLED: OnceLock<bool> = OnceLock::new();

pub fn enable_timing() {
    ENABLED.store(true, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
        || *ENV_ENABLED.get_or_init(|| std::env::var_os("RF_TIMING").is_some())
}

/// Accumulating timer for tracking total time across multiple calls.
pub struct AccumulatingTimer {
    label: &'static str,
    total_ns: AtomicU64,
    count: AtomicU64,
}

impl AccumulatingTimer {
    pub const fn new(label: &'static str) -> Self {
        Self {
            label,
            total_ns: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Runs `f`, recording its wall time when timing is enabled.
    pub fn time<T>(&self, f: impl FnOnce() -> T) -> T {
        if !is_enabled() {
            return f();
        }
        let start = Instant::now();
        let out = f();
        self.record(start.elapsed().as_secs_f64());
        out
    }

    pub fn record(&self, duration_s: f64) {
        let nanos = (duration_s * 1e9) as u64;
        self.total_ns.fetch_add(nanos, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_seconds(&self) -> f64 {
        self.total_ns.load(Ordering::Relaxed) as f64 / 1e9
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn average_seconds(&self) -> f64 {
        let count = self.count();
        if count > 0 {
            self.total_seconds() / count as f64
        } else {
            0.0
        }
    }

    pub fn reset(&self) {
        self.total_ns.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

/// Timers for the expensive phases of a Newton solve.
pub mod solver_timing {
    use super::AccumulatingTimer;

    pub static RESIDUAL_EVALS: AccumulatingTimer = AccumulatingTimer::new("residual");
    pub static JACOBIAN_ASSEMBLY: AccumulatingTimer = AccumulatingTimer::new("jacobian");
    pub static LINEAR_SOLVES: AccumulatingTimer = AccumulatingTimer::new("linear solve");

    pub fn all() -> [&'static AccumulatingTimer; 3] {
        [&RESIDUAL_EVALS, &JACOBIAN_ASSEMBLY, &LINEAR_SOLVES]
    }

    pub fn reset_all() {
        for t in all() {
            t.reset();
        }
    }

    /// Logs one line per timer that saw at least one call.
    pub fn log_summary() {
        if !super::is_enabled() {
            return;
        }
        for t in all() {
            if t.count() > 0 {
                tracing::info!(
                    "{:<14} {} calls, {:.3}s total, {:.4}ms avg",
                    t.label(),
                    t.count(),
                    t.total_seconds(),
                    t.average_seconds() * 1000.0
                );
            }
        }
    }
}
