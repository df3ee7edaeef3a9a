use nalgebra::DVector;

use crate::RfError;

/// Floating point type used throughout the workspace.
pub type Real = f64;

pub fn ensure_finite(v: Real, what: &'static str) -> Result<Real, RfError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(RfError::NonFinite { what, value: v })
    }
}

/// Checks that a mesh-indexed field has the expected number of entries.
pub fn ensure_len(v: &DVector<Real>, expected: usize, what: &'static str) -> Result<(), RfError> {
    if v.len() == expected {
        Ok(())
    } else {
        Err(RfError::SizeMismatch {
            what,
            expected,
            got: v.len(),
        })
    }
}

/// Largest absolute entry and its index. Returns `(0.0, 0)` for an empty slice.
///
/// NaN entries win, so a poisoned field is always reported.
pub fn max_abs_located(values: &[Real]) -> (Real, usize) {
    let mut best = (0.0, 0);
    for (i, &v) in values.iter().enumerate() {
        let a = v.abs();
        if a.is_nan() {
            return (a, i);
        }
        if a > best.0 {
            best = (a, i);
        }
    }
    best
}

/// Sum of squares of the first `n_owned` entries. Ghost entries are excluded
/// so that a global sum counts every unknown once.
pub fn owned_sum_squares(v: &DVector<Real>, n_owned: usize) -> Real {
    v.iter().take(n_owned).map(|x| x * x).sum()
}
