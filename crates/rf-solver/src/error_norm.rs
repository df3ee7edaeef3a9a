//! Step error norm consumed by the outer timestep controller.

use nalgebra::DVector;
use rf_core::Communicator;
use serde::{Deserialize, Serialize};

/// Which error measures enter [`error_norm`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorControl {
    /// Relative pressure change `|du| / (|u - p_atm| + p_atm)`.
    pub pressure: bool,
    /// Scaled nonlinear residual from the last residual evaluation.
    pub residual: bool,
}

impl Default for ErrorControl {
    fn default() -> Self {
        Self {
            pressure: true,
            residual: false,
        }
    }
}

/// Largest relative pressure change over the first `n_cells` entries, and
/// the cell where it occurs.
pub fn pressure_error(u: &DVector<f64>, du: &DVector<f64>, p_atm: f64, n_cells: usize) -> (f64, usize) {
    let mut best = (0.0, 0);
    for c in 0..n_cells {
        let e = du[c].abs() / ((u[c] - p_atm).abs() + p_atm);
        if e.is_nan() {
            return (e, c);
        }
        if e > best.0 {
            best = (e, c);
        }
    }
    best
}

/// `max` that keeps a NaN from either side.
fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

/// Combines the enabled measures with `max`, then reduces over ranks.
/// Collective.
pub fn error_norm(
    comm: &dyn Communicator,
    control: ErrorControl,
    u: &DVector<f64>,
    du: &DVector<f64>,
    p_atm: f64,
    n_cells: usize,
    functional_max: (f64, usize),
) -> f64 {
    let mut local = 0.0_f64;
    if control.pressure {
        let (e, c) = pressure_error(u, du, p_atm, n_cells);
        tracing::trace!(error = e, cell = c, "pressure error");
        local = nan_max(local, e);
    }
    if control.residual {
        let (e, c) = functional_max;
        tracing::trace!(error = e, cell = c, "residual error");
        local = nan_max(local, e);
    }
    let global = comm.max_all(local);
    if comm.is_io_rank() {
        tracing::debug!(error = global, "step error norm");
    }
    global
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::SerialComm;

    const P_ATM: f64 = 101_325.0;

    #[test]
    fn pressure_error_is_relative_to_gauge() {
        let u = DVector::from_vec(vec![P_ATM, P_ATM + 2.0 * P_ATM]);
        let du = DVector::from_vec(vec![P_ATM * 0.1, P_ATM * 0.15]);
        let (e, c) = pressure_error(&u, &du, P_ATM, 2);
        assert!((e - 0.1).abs() < 1e-12);
        assert_eq!(c, 0);
    }

    #[test]
    fn enabled_parts_combine_with_max() {
        let u = DVector::from_element(1, P_ATM);
        let du = DVector::from_element(1, 0.01 * P_ATM);
        let both = ErrorControl {
            pressure: true,
            residual: true,
        };
        let e = error_norm(&SerialComm, both, &u, &du, P_ATM, 1, (0.5, 0));
        assert_eq!(e, 0.5);
        let only_p = ErrorControl::default();
        let e = error_norm(&SerialComm, only_p, &u, &du, P_ATM, 1, (0.5, 0));
        assert!((e - 0.01).abs() < 1e-15);
        let none = ErrorControl {
            pressure: false,
            residual: false,
        };
        assert_eq!(error_norm(&SerialComm, none, &u, &du, P_ATM, 1, (0.5, 0)), 0.0);
    }

    #[test]
    fn nan_update_is_not_hidden() {
        let u = DVector::from_element(3, P_ATM);
        let mut du = DVector::from_element(3, 0.01 * P_ATM);
        du[2] = f64::NAN;
        let only_p = ErrorControl::default();
        assert!(error_norm(&SerialComm, only_p, &u, &du, P_ATM, 3, (0.5, 0)).is_nan());
        let both = ErrorControl {
            pressure: true,
            residual: true,
        };
        assert!(error_norm(&SerialComm, both, &u, &du, P_ATM, 3, (0.5, 0)).is_nan());
        du[2] = 0.0;
        assert!(error_norm(&SerialComm, both, &u, &du, P_ATM, 3, (f64::NAN, 1)).is_nan());
    }
}
