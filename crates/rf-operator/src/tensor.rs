//! Absolute permeability tensors.

use nalgebra::{DMatrix, Matrix3};
use serde::{Deserialize, Serialize};

use crate::{OperatorError, OperatorResult};

/// Symmetric permeability tensor [m²] as written in problem files.
///
/// A scalar is isotropic, a list is the diagonal, a nested list is the full
/// tensor. Only the leading `dim × dim` block is used.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PermTensor {
    Isotropic(f64),
    Diagonal(Vec<f64>),
    Full(Vec<Vec<f64>>),
}

impl PermTensor {
    /// Expands to a 3×3 matrix and checks symmetric positive definiteness of
    /// the active block. `cell` is only used for error reporting.
    pub fn to_matrix(&self, dim: usize, cell: usize) -> OperatorResult<Matrix3<f64>> {
        let bad = |what: String| OperatorError::InvalidTensor { cell, what };
        let mut k = Matrix3::zeros();
        match self {
            PermTensor::Isotropic(v) => {
                for d in 0..dim {
                    k[(d, d)] = *v;
                }
            }
            PermTensor::Diagonal(diag) => {
                if diag.len() != dim {
                    return Err(bad(format!("expected {dim} diagonal entries, got {}", diag.len())));
                }
                for (d, v) in diag.iter().enumerate() {
                    k[(d, d)] = *v;
                }
            }
            PermTensor::Full(rows) => {
                if rows.len() != dim || rows.iter().any(|r| r.len() != dim) {
                    return Err(bad(format!("expected a {dim}x{dim} tensor")));
                }
                for (i, row) in rows.iter().enumerate() {
                    for (j, v) in row.iter().enumerate() {
                        k[(i, j)] = *v;
                    }
                }
            }
        }

        let block = DMatrix::from_fn(dim, dim, |i, j| k[(i, j)]);
        if (&block - block.transpose()).amax() > 1e-12 * block.amax() {
            return Err(bad("tensor is not symmetric".into()));
        }
        if block.iter().any(|v| !v.is_finite()) || block.cholesky().is_none() {
            return Err(bad("tensor is not positive definite".into()));
        }
        Ok(k)
    }
}
