//! Diffusion operator interface shared by the TPFA and hybrid MFD
//! discretizations.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use sprs::CsMat;

use crate::bc::BoundaryConditions;
use crate::relperm::{RelPermField, RelPermMethod};
use crate::skeleton::{SparsityPattern, UnknownLayout};
use crate::tpfa::TpfaOperator;
use crate::{OperatorError, OperatorResult};

/// Discretization choice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discretization {
    /// Two-point flux, cell unknowns only.
    #[default]
    Tpfa,
    /// Mimetic finite differences with cell and face unknowns.
    Mfd,
}

/// Options fixed for the lifetime of one operator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub discretization: Discretization,
    pub rel_perm: RelPermMethod,
    /// Scalar stability factor for the MFD inverse mass matrix.
    pub stability_scaling: f64,
    /// Fill derivative fields for an analytic Jacobian. Follows the
    /// Jacobian strategy, never the problem file.
    #[serde(skip)]
    pub compute_derivatives: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            discretization: Discretization::Tpfa,
            rel_perm: RelPermMethod::UpwindGravity,
            stability_scaling: 1.0,
            compute_derivatives: false,
        }
    }
}

/// Discrete Darcy operator `x -> div(q(x))` for Richards flow.
///
/// Rows are ordered like the unknowns: cells first, then faces for
/// cell+face layouts. Cell rows hold the net mass outflow [kg/s]; face rows
/// hold flux continuity or the boundary condition residual.
pub trait DiffusionOperator: Send + Sync {
    fn layout(&self) -> UnknownLayout;

    fn num_cells(&self) -> usize;

    fn num_unknowns(&self) -> usize;

    fn rel_perm_method(&self) -> RelPermMethod;

    /// Refreshes boundary values at time `t`.
    fn update_boundary(&mut self, t: f64);

    fn boundary(&self) -> &BoundaryConditions;

    /// Net mass outflow per row at iterate `x`. Overwrites `out`.
    fn flux_divergence(&self, x: &DVector<f64>, out: &mut DVector<f64>);

    /// Cell and face relative permeabilities at `x`. Derivative fields are
    /// empty unless [`DiffusionOperator::computes_derivatives`].
    fn rel_perm(&self, x: &DVector<f64>) -> RelPermField;

    fn computes_derivatives(&self) -> bool;

    /// Linearization with relative permeability frozen at `x`:
    /// `A x - rhs` equals [`DiffusionOperator::flux_divergence`] at `x`.
    /// `A` is symmetric positive semi-definite before boundary rows are
    /// eliminated.
    fn assemble(
        &self,
        x: &DVector<f64>,
        pattern: &SparsityPattern,
        matrix: &mut CsMat<f64>,
        rhs: &mut DVector<f64>,
    ) -> OperatorResult<()>;

    /// Mass flux [kg/s] through each face, from its first cell to its second
    /// (or out of the domain).
    fn darcy_flux(&self, x: &DVector<f64>) -> Vec<f64>;

    /// Full unknown vector from cell pressures (face values interpolated).
    fn extend_cell_field(&self, cells: &DVector<f64>) -> DVector<f64>;

    /// Two-point specialization, needed for the analytic Jacobian.
    fn as_tpfa(&self) -> Option<&TpfaOperator> {
        None
    }
}

/// Adds `value` at `(r, c)`; the entry must exist in the skeleton.
#[inline]
pub(crate) fn add_value(
    pattern: &SparsityPattern,
    matrix: &mut CsMat<f64>,
    r: usize,
    c: usize,
    value: f64,
) -> OperatorResult<()> {
    let slot = pattern.slot(r, c).ok_or_else(|| OperatorError::Setup {
        what: format!("entry ({r}, {c}) is outside the operator skeleton"),
    })?;
    matrix.data_mut()[slot] += value;
    Ok(())
}

pub(crate) fn zero_values(matrix: &mut CsMat<f64>) {
    matrix.data_mut().iter_mut().for_each(|v| *v = 0.0);
}
