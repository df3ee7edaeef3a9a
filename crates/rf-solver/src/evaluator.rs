//! Residual and Jacobian evaluation for one Richards solve.
//!
//! The nonlinear functional on cell rows is
//!
//! ```text
//! f_c = div(q)_c - Q_c + (M_c(p^{n+1}) - M_c(p^n)) / dt
//! ```
//!
//! with `div(q)` the net mass outflow, `Q` the integrated source, and `M` the
//! stored mass given by the [`Accumulation`] strategy. The storage term is
//! only present for `dt > 0`; `dt == 0` is a steady flux balance. Face rows
//! (hybrid layouts) carry the operator's continuity and boundary residuals.

use std::sync::Arc;

use nalgebra::DVector;
use rayon::prelude::*;
use rf_core::Communicator;
use rf_core::constants::G0_MPS2;
use rf_core::numeric::max_abs_located;
use rf_core::timing::solver_timing;
use rf_mesh::{Mesh, Ownership};
use rf_operator::{
    DiffusionOperator, FluidProperties, OperatorError, OperatorSkeleton, Sources, build_op_skel,
};
use rf_wrm::CellWrmMap;
use serde::{Deserialize, Serialize};
use sprs::CsMat;

use crate::control::{JacobianStrategy, NlsConfig};
use crate::{SolverError, SolverResult};

/// Stored-mass model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accumulation {
    /// `rho phi V s(p)`.
    #[default]
    Richards,
    /// `V S_s p / |g|`: fully saturated, linear storage.
    Saturated,
}

/// Per-cell storage parameters.
#[derive(Clone, Debug)]
pub struct Storage {
    pub accumulation: Accumulation,
    pub porosity: Vec<f64>,
    /// Specific storage [1/m], used by [`Accumulation::Saturated`].
    pub specific_storage: Vec<f64>,
}

/// Residual/Jacobian evaluator over a fixed operator skeleton.
pub struct RichardsEvaluator {
    mesh: Arc<dyn Mesh>,
    operator: Box<dyn DiffusionOperator>,
    skeleton: OperatorSkeleton,
    wrm: CellWrmMap,
    fluid: FluidProperties,
    sources: Sources,
    storage: Storage,
    volume: Vec<f64>,
    strategy: JacobianStrategy,
    centered_diff: bool,
    fd_epsilon: f64,
    typical: DVector<f64>,

    time: f64,
    dt: f64,
    source_rate: DVector<f64>,
    mass_n: Vec<f64>,
    functional_max: (f64, usize),
    residual_evaluations: usize,
    jacobian_assemblies: usize,
}

impl RichardsEvaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mesh: Arc<dyn Mesh>,
        comm: &dyn Communicator,
        operator: Box<dyn DiffusionOperator>,
        wrm: CellWrmMap,
        fluid: FluidProperties,
        sources: Sources,
        storage: Storage,
        config: &NlsConfig,
    ) -> SolverResult<Self> {
        if config.jacobian == JacobianStrategy::Analytic && operator.as_tpfa().is_none() {
            return Err(SolverError::OperatorMismatch {
                what: "the analytic Jacobian cannot cast the operator to the two-point \
                       specialization"
                    .into(),
            });
        }
        if config.jacobian.needs_rel_perm_derivatives() && !operator.computes_derivatives() {
            return Err(SolverError::ProblemSetup {
                what: "the analytic Jacobian needs relative permeability derivatives; \
                       build the operator with compute_derivatives"
                    .into(),
            });
        }
        let n_cells = operator.num_cells();
        let n = operator.num_unknowns();
        if mesh.num_cells(Ownership::Used) != n_cells {
            return Err(SolverError::ProblemSetup {
                what: "the nonlinear solver needs a mesh without ghost cells".into(),
            });
        }
        if storage.porosity.len() != n_cells || storage.specific_storage.len() != n_cells {
            return Err(SolverError::ProblemSetup {
                what: format!("storage parameters must have {n_cells} entries"),
            });
        }
        if let Some(c) = storage.porosity.iter().position(|&phi| !(phi > 0.0 && phi <= 1.0)) {
            return Err(SolverError::ProblemSetup {
                what: format!("porosity of cell {c} outside (0, 1]"),
            });
        }
        let skeleton = build_op_skel(
            mesh.as_ref(),
            comm,
            operator.layout(),
            config.use_dense_jacobian,
        )?;
        if skeleton.num_unknowns() != n || skeleton.pattern.n_cols() != n {
            return Err(SolverError::ProblemSetup {
                what: format!(
                    "skeleton is {}x{}, operator has {n} unknowns",
                    skeleton.pattern.n_rows(),
                    skeleton.pattern.n_cols()
                ),
            });
        }
        let volume = (0..n_cells).map(|c| mesh.cell_volume(c)).collect();
        tracing::debug!(
            unknowns = n,
            nnz = skeleton.pattern.nnz(),
            colors = skeleton.coloring.num_colors(),
            jacobian = ?config.jacobian,
            accumulation = ?storage.accumulation,
            "Richards evaluator ready"
        );
        Ok(Self {
            mesh,
            operator,
            skeleton,
            wrm,
            fluid,
            sources,
            storage,
            volume,
            strategy: config.jacobian,
            centered_diff: config.centered_diff,
            fd_epsilon: config.fd_epsilon,
            typical: DVector::from_element(n, config.typical_pressure),
            time: 0.0,
            dt: 0.0,
            source_rate: DVector::zeros(n_cells),
            mass_n: vec![0.0; n_cells],
            functional_max: (0.0, 0),
            residual_evaluations: 0,
            jacobian_assemblies: 0,
        })
    }

    pub fn num_cells(&self) -> usize {
        self.operator.num_cells()
    }

    pub fn num_unknowns(&self) -> usize {
        self.operator.num_unknowns()
    }

    pub fn mesh(&self) -> &dyn Mesh {
        self.mesh.as_ref()
    }

    pub fn operator(&self) -> &dyn DiffusionOperator {
        self.operator.as_ref()
    }

    pub fn skeleton(&self) -> &OperatorSkeleton {
        &self.skeleton
    }

    pub fn wrm(&self) -> &CellWrmMap {
        &self.wrm
    }

    pub fn fluid(&self) -> &FluidProperties {
        &self.fluid
    }

    pub fn strategy(&self) -> JacobianStrategy {
        self.strategy
    }

    /// Typical value per unknown, used for scaling and FD perturbations.
    pub fn typical(&self) -> &DVector<f64> {
        &self.typical
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn residual_evaluations(&self) -> usize {
        self.residual_evaluations
    }

    pub fn jacobian_assemblies(&self) -> usize {
        self.jacobian_assemblies
    }

    /// Largest cell residual scaled by `rho phi V / dt`, and its cell, from
    /// the last [`RichardsEvaluator::residual`] call.
    pub fn functional_max_norm(&self) -> (f64, usize) {
        self.functional_max
    }

    /// Full unknown vector for cell pressures.
    pub fn extend(&self, cells: &DVector<f64>) -> DVector<f64> {
        self.operator.extend_cell_field(cells)
    }

    pub fn saturations(&self, cells: &[f64]) -> Vec<f64> {
        let p_atm = self.fluid.p_atm_pa();
        let pc: Vec<f64> = cells.iter().map(|&p| p_atm - p).collect();
        self.wrm.saturations(&pc)
    }

    /// Fixes time, step, boundary data, sources, and the stored mass of the
    /// committed state `p_n` (cell pressures) for the coming solve.
    pub fn begin_step(&mut self, p_n: &DVector<f64>, t: f64, dt: f64) {
        self.time = t;
        self.dt = dt;
        self.operator.update_boundary(t);
        self.source_rate = self.sources.compute(t, self.mesh.as_ref());
        self.mass_n = (0..self.num_cells())
            .into_par_iter()
            .map(|c| self.stored_mass(c, p_n[c]))
            .collect();
    }

    /// Stored water mass of cell `c` at pressure `p`.
    pub fn stored_mass(&self, c: usize, p: f64) -> f64 {
        match self.storage.accumulation {
            Accumulation::Richards => {
                let s = self.wrm.model(c).saturation(self.fluid.capillary(p));
                self.fluid.rho() * self.storage.porosity[c] * self.volume[c] * s
            }
            Accumulation::Saturated => {
                self.volume[c] * self.storage.specific_storage[c] * p / G0_MPS2
            }
        }
    }

    /// `dM_c/dp`.
    pub fn d_stored_mass(&self, c: usize, p: f64) -> f64 {
        match self.storage.accumulation {
            Accumulation::Richards => {
                let ds_dp = -self.wrm.model(c).d_saturation(self.fluid.capillary(p));
                self.fluid.rho() * self.storage.porosity[c] * self.volume[c] * ds_dp
            }
            Accumulation::Saturated => {
                self.volume[c] * self.storage.specific_storage[c] / G0_MPS2
            }
        }
    }

    /// Total stored mass over owned cells.
    pub fn total_mass(&self, cells: &DVector<f64>) -> f64 {
        (0..self.num_cells())
            .map(|c| self.stored_mass(c, cells[c]))
            .sum()
    }

    fn evaluate(&self, x: &DVector<f64>, out: &mut DVector<f64>, with_storage: bool) {
        self.operator.flux_divergence(x, out);
        let n_cells = self.num_cells();
        for c in 0..n_cells {
            out[c] -= self.source_rate[c];
        }
        if with_storage && self.dt > 0.0 {
            let storage: Vec<f64> = (0..n_cells)
                .into_par_iter()
                .map(|c| (self.stored_mass(c, x[c]) - self.mass_n[c]) / self.dt)
                .collect();
            for (c, s) in storage.into_iter().enumerate() {
                out[c] += s;
            }
        }
    }

    /// Nonlinear residual at iterate `x`. Overwrites `out`.
    pub fn residual(&mut self, x: &DVector<f64>, out: &mut DVector<f64>) {
        solver_timing::RESIDUAL_EVALS.time(|| self.evaluate(x, out, true));
        self.residual_evaluations += 1;

        let n_cells = self.num_cells();
        let time_scale = if self.dt > 0.0 { self.dt } else { 1.0 };
        let scaled: Vec<f64> = (0..n_cells)
            .map(|c| {
                let mass_scale =
                    self.fluid.rho() * self.storage.porosity[c] * self.volume[c] / time_scale;
                out[c] / mass_scale
            })
            .collect();
        self.functional_max = max_abs_located(&scaled);
    }

    /// Fills the numeric values of `matrix` (built from the skeleton) with
    /// the Jacobian at `x`. `f0` must be the residual at `x`.
    pub fn jacobian(
        &mut self,
        x: &DVector<f64>,
        f0: &DVector<f64>,
        matrix: &mut CsMat<f64>,
    ) -> SolverResult<()> {
        solver_timing::JACOBIAN_ASSEMBLY.time(|| self.assemble_jacobian(x, f0, matrix))?;
        self.jacobian_assemblies += 1;
        Ok(())
    }

    fn assemble_jacobian(
        &self,
        x: &DVector<f64>,
        f0: &DVector<f64>,
        matrix: &mut CsMat<f64>,
    ) -> SolverResult<()> {
        match self.strategy {
            JacobianStrategy::FdColoring => self.fd_jacobian(x, Some(f0), matrix, true),
            JacobianStrategy::SemiAnalytic => {
                self.fd_jacobian(x, None, matrix, false);
                self.add_storage_diagonal(x, matrix)?;
            }
            JacobianStrategy::Analytic => {
                let tpfa = self
                    .operator
                    .as_tpfa()
                    .ok_or_else(|| SolverError::OperatorMismatch {
                        what: "the analytic Jacobian cannot cast the operator to the \
                               two-point specialization"
                            .into(),
                    })?;
                matrix.data_mut().iter_mut().for_each(|v| *v = 0.0);
                let field = tpfa.rel_perm(x);
                tpfa.add_flux_jacobian(x, &field, &self.skeleton.pattern, matrix)?;
                self.add_storage_diagonal(x, matrix)?;
            }
            JacobianStrategy::Picard => {
                let mut rhs = DVector::zeros(x.len());
                self.operator
                    .assemble(x, &self.skeleton.pattern, matrix, &mut rhs)?;
                self.add_storage_diagonal(x, matrix)?;
            }
        }
        Ok(())
    }

    /// Colored finite differences. `f0` is reused for forward differences
    /// of the full residual; otherwise the base point is re-evaluated.
    fn fd_jacobian(
        &self,
        x: &DVector<f64>,
        f0: Option<&DVector<f64>>,
        matrix: &mut CsMat<f64>,
        with_storage: bool,
    ) {
        let n = x.len();
        let h: DVector<f64> = self.typical.map(|t| self.fd_epsilon * t);
        let base = match (self.centered_diff, f0) {
            (true, _) => None,
            (false, Some(f0)) => Some(f0.clone()),
            (false, None) => {
                let mut f = DVector::zeros(n);
                self.evaluate(x, &mut f, with_storage);
                Some(f)
            }
        };
        let coloring = &self.skeleton.coloring;
        let entries: Vec<(usize, usize)> = self.skeleton.pattern.entries().collect();
        let mut fp = DVector::zeros(n);
        let mut fm = DVector::zeros(n);
        for (color, group) in coloring.groups().iter().enumerate() {
            let mut xp = x.clone();
            for &j in group {
                xp[j] += h[j];
            }
            self.evaluate(&xp, &mut fp, with_storage);
            let denom_scale = match &base {
                Some(f) => {
                    fm.copy_from(f);
                    1.0
                }
                None => {
                    let mut xm = x.clone();
                    for &j in group {
                        xm[j] -= h[j];
                    }
                    self.evaluate(&xm, &mut fm, with_storage);
                    2.0
                }
            };
            let data = matrix.data_mut();
            for (k, &(r, c)) in entries.iter().enumerate() {
                if coloring.color(c) == color {
                    data[k] = (fp[r] - fm[r]) / (denom_scale * h[c]);
                }
            }
        }
    }

    fn add_storage_diagonal(&self, x: &DVector<f64>, matrix: &mut CsMat<f64>) -> SolverResult<()> {
        if self.dt <= 0.0 {
            return Ok(());
        }
        let pattern = &self.skeleton.pattern;
        for c in 0..self.num_cells() {
            let slot = pattern.slot(c, c).ok_or_else(|| {
                SolverError::Operator(OperatorError::Setup {
                    what: format!("missing diagonal entry for cell {c}"),
                })
            })?;
            matrix.data_mut()[slot] += self.d_stored_mass(c, x[c]) / self.dt;
        }
        Ok(())
    }
}
