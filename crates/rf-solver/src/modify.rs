//! Saturation-aware step modifications.
//!
//! Newton steps on a steep retention curve can produce saturation jumps that
//! are far outside the region where the linearization holds. These routines
//! limit or reshape pressure updates cell by cell. Face unknowns, when
//! present, are left untouched.

use nalgebra::DVector;
use rayon::prelude::*;
use rf_wrm::{CellWrmMap, Wrm};

/// Pressure whose saturation is `s`.
fn pressure_for_saturation(model: &dyn Wrm, p_atm: f64, s: f64) -> f64 {
    p_atm - model.capillary_pressure(s)
}

/// Limits the update `du` (the new iterate is `u - du`) so that no cell's
/// saturation changes by more than `max_change`. A clipped cell gets the
/// update that lands exactly on the bound. Returns the number of clipped
/// cells.
pub fn clip_saturation_step(
    wrm: &CellWrmMap,
    p_atm: f64,
    max_change: f64,
    u: &DVector<f64>,
    du: &mut DVector<f64>,
    n_cells: usize,
) -> usize {
    if max_change <= 0.0 {
        return 0;
    }
    let clipped: Vec<(usize, f64)> = (0..n_cells)
        .into_par_iter()
        .filter_map(|c| {
            let model = wrm.model(c);
            let s0 = model.saturation(p_atm - u[c]);
            let s1 = model.saturation(p_atm - (u[c] - du[c]));
            let ds = s1 - s0;
            if !(ds.abs() > max_change) {
                return None;
            }
            let target = s0 + max_change.copysign(ds);
            Some((c, u[c] - pressure_for_saturation(model, p_atm, target)))
        })
        .collect();
    for &(c, v) in &clipped {
        du[c] = v;
    }
    clipped.len()
}

/// Alternating (Krabbenhoft) update: candidate `p - factor * dp`, except that
/// cells drier than `threshold` take the step in saturation space,
/// `s_new = s + dS/dp * (-factor dp)`, mapped back through the retention
/// curve.
pub fn alternating_update(
    wrm: &CellWrmMap,
    p_atm: f64,
    threshold: f64,
    p: &DVector<f64>,
    dp: &DVector<f64>,
    factor: f64,
    n_cells: usize,
) -> DVector<f64> {
    let mut next = p - dp * factor;
    let cells: Vec<(usize, f64)> = (0..n_cells)
        .into_par_iter()
        .filter_map(|c| {
            let model = wrm.model(c);
            let pc = p_atm - p[c];
            let s = model.saturation(pc);
            if !(s < threshold) {
                return None;
            }
            let ds_dp = -model.d_saturation(pc);
            let s_new = s - ds_dp * factor * dp[c];
            if s_new >= 1.0 {
                return None;
            }
            let floor = model.residual_saturation() + 1e-12;
            Some((c, pressure_for_saturation(model, p_atm, s_new.max(floor))))
        })
        .collect();
    for (c, v) in cells {
        next[c] = v;
    }
    next
}
