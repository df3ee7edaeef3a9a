//! Two-point flux approximation with cell pressure unknowns.

use std::sync::Arc;

use nalgebra::{DVector, Matrix3};
use rayon::prelude::*;
use rf_mesh::{Mesh, Ownership};
use rf_wrm::CellWrmMap;
use sprs::CsMat;

use crate::bc::{BoundaryConditions, FaceBc};
use crate::fluid::FluidProperties;
use crate::mfd::half_transmissibility;
use crate::operator::{DiffusionOperator, OperatorConfig, add_value, zero_values};
use crate::relperm::{RelPermField, RelPermMethod, harmonic};
use crate::skeleton::{SparsityPattern, UnknownLayout};
use crate::{OperatorError, OperatorResult};

#[derive(Clone, Debug)]
struct TpfaFace {
    c1: usize,
    c2: Option<usize>,
    t1: f64,
    t2: f64,
    z1: f64,
    /// Elevation of the second cell, or of the face on the boundary.
    z2: f64,
    area: f64,
}

/// Mass flux through one face and its derivatives.
#[derive(Clone, Copy, Debug, Default)]
struct FaceFlux {
    /// Outflow from the first cell [kg/s].
    q: f64,
    dq1: f64,
    dq2: f64,
    /// Frozen-k_rel coefficient `rho/mu * C_f`, zero when no pressure coupling.
    coef: f64,
    /// Potential of the boundary side, for Dirichlet-type faces.
    phi_b: Option<f64>,
}

/// Two-point flux operator.
///
/// Half transmissibilities come from the permeability tensor and the
/// cell-to-face offsets; interior faces combine them harmonically together
/// with the relative permeability policy.
pub struct TpfaOperator {
    mesh: Arc<dyn Mesh>,
    wrm: CellWrmMap,
    fluid: FluidProperties,
    method: RelPermMethod,
    compute_derivatives: bool,
    bcs: BoundaryConditions,
    faces: Vec<TpfaFace>,
    n_cells: usize,
}

impl TpfaOperator {
    pub fn new(
        mesh: Arc<dyn Mesh>,
        perm: &[Matrix3<f64>],
        wrm: CellWrmMap,
        fluid: FluidProperties,
        bcs: BoundaryConditions,
        config: &OperatorConfig,
    ) -> OperatorResult<Self> {
        let n_cells = mesh.num_cells(Ownership::Owned);
        let n_used = mesh.num_cells(Ownership::Used);
        if perm.len() != n_used || wrm.len() != n_used {
            return Err(OperatorError::Setup {
                what: format!(
                    "expected {n_used} permeability tensors and WRM cells, got {} and {}",
                    perm.len(),
                    wrm.len()
                ),
            });
        }
        let faces = (0..mesh.num_faces(Ownership::Used))
            .map(|f| {
                let (c1, c2) = mesh.face_cells(f);
                let t1 = half_transmissibility(mesh.as_ref(), c1, f, &perm[c1])?;
                let z1 = mesh.elevation(&mesh.cell_centroid(c1));
                let (t2, z2) = match c2 {
                    Some(c2) => (
                        half_transmissibility(mesh.as_ref(), c2, f, &perm[c2])?,
                        mesh.elevation(&mesh.cell_centroid(c2)),
                    ),
                    None => (0.0, mesh.elevation(&mesh.face_centroid(f))),
                };
                Ok(TpfaFace {
                    c1,
                    c2,
                    t1,
                    t2,
                    z1,
                    z2,
                    area: mesh.face_area(f),
                })
            })
            .collect::<OperatorResult<Vec<_>>>()?;
        tracing::debug!(
            cells = n_cells,
            faces = faces.len(),
            method = ?config.rel_perm,
            "TPFA operator built"
        );
        Ok(Self {
            mesh,
            wrm,
            fluid,
            method: config.rel_perm,
            compute_derivatives: config.compute_derivatives,
            bcs,
            faces,
            n_cells,
        })
    }

    pub fn mesh(&self) -> &dyn Mesh {
        self.mesh.as_ref()
    }

    pub fn fluid(&self) -> &FluidProperties {
        &self.fluid
    }

    /// Cell `k_rel` and `dk_rel/dp` at pressures `x`.
    fn cell_rel_perm(&self, x: &DVector<f64>) -> (Vec<f64>, Vec<f64>) {
        let p_atm = self.fluid.p_atm_pa();
        x.as_slice()
            .par_iter()
            .enumerate()
            .map(|(c, &p)| {
                let model = self.wrm.model(c);
                let pc = p_atm - p;
                (model.k_relative(pc), -model.d_k_relative(pc))
            })
            .unzip()
    }

    /// Face value of face `f` and its derivatives with respect to the first
    /// and second cell pressures.
    fn face_rel_perm(&self, f: usize, x: &DVector<f64>, kr: &[f64], dkr: &[f64]) -> (f64, [f64; 2]) {
        let face = &self.faces[f];
        let rho_g = self.fluid.rho() * self.fluid.g();
        let c1 = face.c1;
        let phi1 = x[c1] + rho_g * face.z1;
        let dgrav = rho_g * (face.z1 - face.z2);
        if let Some(c2) = face.c2 {
            let dphi = phi1 - (x[c2] + rho_g * face.z2);
            let (v, w) = self.method.face_value(kr[c1], kr[c2], dphi, dgrav);
            return (v, [w[0] * dkr[c1], w[1] * dkr[c2]]);
        }
        let pb = match self.bcs.face(f) {
            FaceBc::Pressure(pb) => pb,
            FaceBc::Seepage => self.fluid.p_atm_pa(),
            FaceBc::None | FaceBc::MassFlux(_) => return (1.0, [0.0, 0.0]),
        };
        let kr_b = self.wrm.model(c1).k_relative(self.fluid.capillary(pb));
        let dphi = phi1 - (pb + rho_g * face.z2);
        let (v, w) = self.method.face_value(kr[c1], kr_b, dphi, dgrav);
        (v, [w[0] * dkr[c1], 0.0])
    }

    /// Relative permeability with derivatives, whatever the operator was
    /// built for.
    fn full_rel_perm(&self, x: &DVector<f64>) -> RelPermField {
        let (kr, dkr) = self.cell_rel_perm(x);
        let (faces, d_faces) = (0..self.faces.len())
            .into_par_iter()
            .map(|f| self.face_rel_perm(f, x, &kr, &dkr))
            .unzip();
        let (cells, d_cells) = if self.method.uses_cell_values() {
            (kr, dkr)
        } else {
            (vec![1.0; x.len()], vec![0.0; x.len()])
        };
        RelPermField {
            cells,
            faces,
            d_cells,
            d_faces,
        }
    }

    fn face_flux(&self, f: usize, x: &DVector<f64>, field: &RelPermField) -> FaceFlux {
        let face = &self.faces[f];
        let m = self.fluid.mobility();
        let rho_g = self.fluid.rho() * self.fluid.g();
        let c1 = face.c1;
        let d_cell = |c: usize| field.d_cells.get(c).copied().unwrap_or(0.0);
        let (cell1, dcell1) = (field.cells[c1], d_cell(c1));
        let fv = field.faces[f];
        let d_face = field.d_faces.get(f).copied().unwrap_or([0.0, 0.0]);
        let phi1 = x[c1] + rho_g * face.z1;

        if let Some(c2) = face.c2 {
            let (cell2, dcell2) = (field.cells[c2], d_cell(c2));
            let dphi = phi1 - (x[c2] + rho_g * face.z2);
            let (h, ha, hb) = harmonic(cell1 * face.t1, cell2 * face.t2);
            let coef = fv * h;
            let dc1 = d_face[0] * h + fv * ha * face.t1 * dcell1;
            let dc2 = d_face[1] * h + fv * hb * face.t2 * dcell2;
            return FaceFlux {
                q: m * coef * dphi,
                dq1: m * (coef + dc1 * dphi),
                dq2: m * (-coef + dc2 * dphi),
                coef: m * coef,
                phi_b: None,
            };
        }

        let dirichlet = |pb: f64| {
            let phi_b = pb + rho_g * face.z2;
            let dphi = phi1 - phi_b;
            let coef = fv * cell1 * face.t1;
            let dc1 = d_face[0] * cell1 * face.t1 + fv * dcell1 * face.t1;
            FaceFlux {
                q: m * coef * dphi,
                dq1: m * (coef + dc1 * dphi),
                dq2: 0.0,
                coef: m * coef,
                phi_b: Some(phi_b),
            }
        };
        match self.bcs.face(f) {
            FaceBc::None => FaceFlux::default(),
            FaceBc::MassFlux(q_in) => FaceFlux {
                q: -q_in * face.area,
                ..FaceFlux::default()
            },
            FaceBc::Pressure(pb) => dirichlet(pb),
            FaceBc::Seepage => {
                let active = dirichlet(self.fluid.p_atm_pa());
                if active.q >= 0.0 {
                    active
                } else {
                    FaceFlux::default()
                }
            }
        }
    }

    fn face_fluxes(&self, x: &DVector<f64>, field: &RelPermField) -> Vec<FaceFlux> {
        (0..self.faces.len())
            .into_par_iter()
            .map(|f| self.face_flux(f, x, field))
            .collect()
    }

    fn all_face_fluxes(&self, x: &DVector<f64>) -> Vec<FaceFlux> {
        self.face_fluxes(x, &self.full_rel_perm(x))
    }

    /// Exact Jacobian of [`DiffusionOperator::flux_divergence`] (`CreateJac`)
    /// from a relative permeability field evaluated at `x` with its
    /// derivatives. Adds into `matrix`.
    pub fn add_flux_jacobian(
        &self,
        x: &DVector<f64>,
        field: &RelPermField,
        pattern: &SparsityPattern,
        matrix: &mut CsMat<f64>,
    ) -> OperatorResult<()> {
        if field.d_cells.len() != field.cells.len() || field.d_faces.len() != self.faces.len() {
            return Err(OperatorError::Setup {
                what: "relative permeability derivatives are missing; build the operator \
                       with compute_derivatives"
                    .into(),
            });
        }
        let fluxes = self.face_fluxes(x, field);
        let n = self.n_cells;
        for (face, flux) in self.faces.iter().zip(&fluxes) {
            let c1 = face.c1;
            if c1 < n {
                add_value(pattern, matrix, c1, c1, flux.dq1)?;
            }
            if let Some(c2) = face.c2 {
                if c1 < n {
                    add_value(pattern, matrix, c1, c2, flux.dq2)?;
                }
                if c2 < n {
                    add_value(pattern, matrix, c2, c1, -flux.dq1)?;
                    add_value(pattern, matrix, c2, c2, -flux.dq2)?;
                }
            }
        }
        Ok(())
    }
}

impl DiffusionOperator for TpfaOperator {
    fn layout(&self) -> UnknownLayout {
        UnknownLayout::Cells
    }

    fn num_cells(&self) -> usize {
        self.n_cells
    }

    fn num_unknowns(&self) -> usize {
        self.n_cells
    }

    fn rel_perm_method(&self) -> RelPermMethod {
        self.method
    }

    fn update_boundary(&mut self, t: f64) {
        self.bcs.compute(t, self.mesh.as_ref(), &self.fluid);
    }

    fn boundary(&self) -> &BoundaryConditions {
        &self.bcs
    }

    fn flux_divergence(&self, x: &DVector<f64>, out: &mut DVector<f64>) {
        out.fill(0.0);
        let n = self.n_cells;
        for (face, flux) in self.faces.iter().zip(self.all_face_fluxes(x)) {
            if face.c1 < n {
                out[face.c1] += flux.q;
            }
            if let Some(c2) = face.c2.filter(|&c2| c2 < n) {
                out[c2] -= flux.q;
            }
        }
    }

    fn rel_perm(&self, x: &DVector<f64>) -> RelPermField {
        let mut field = self.full_rel_perm(x);
        if !self.compute_derivatives {
            field.d_cells.clear();
            field.d_faces.clear();
        }
        field
    }

    fn computes_derivatives(&self) -> bool {
        self.compute_derivatives
    }

    fn assemble(
        &self,
        x: &DVector<f64>,
        pattern: &SparsityPattern,
        matrix: &mut CsMat<f64>,
        rhs: &mut DVector<f64>,
    ) -> OperatorResult<()> {
        zero_values(matrix);
        rhs.fill(0.0);
        let n = self.n_cells;
        let rho_g = self.fluid.rho() * self.fluid.g();
        for (face, flux) in self.faces.iter().zip(self.all_face_fluxes(x)) {
            let c1 = face.c1;
            match (face.c2, flux.phi_b) {
                (Some(c2), _) => {
                    let grav = flux.coef * rho_g * (face.z1 - face.z2);
                    if c1 < n {
                        add_value(pattern, matrix, c1, c1, flux.coef)?;
                        add_value(pattern, matrix, c1, c2, -flux.coef)?;
                        rhs[c1] -= grav;
                    }
                    if c2 < n {
                        add_value(pattern, matrix, c2, c2, flux.coef)?;
                        add_value(pattern, matrix, c2, c1, -flux.coef)?;
                        rhs[c2] += grav;
                    }
                }
                (None, Some(phi_b)) if c1 < n => {
                    add_value(pattern, matrix, c1, c1, flux.coef)?;
                    rhs[c1] += flux.coef * (phi_b - rho_g * face.z1);
                }
                (None, _) if c1 < n => {
                    // flux-type boundary: outflow is independent of pressure
                    rhs[c1] -= flux.q;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn darcy_flux(&self, x: &DVector<f64>) -> Vec<f64> {
        self.all_face_fluxes(x).into_iter().map(|f| f.q).collect()
    }

    fn extend_cell_field(&self, cells: &DVector<f64>) -> DVector<f64> {
        cells.clone()
    }

    fn as_tpfa(&self) -> Option<&TpfaOperator> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bc::{BcFunction, BcKind, BcSpec};
    use crate::skeleton::build_op_skel;
    use rf_core::SerialComm;
    use rf_mesh::BoxMeshBuilder;
    use rf_wrm::VanGenuchten;

    fn column(method: RelPermMethod, specs: &[BcSpec], gravity: bool) -> TpfaOperator {
        let mesh: Arc<dyn Mesh> = Arc::new(
            BoxMeshBuilder::new(&[0.0, 0.0], &[1.0, 4.0], &[1, 4])
                .build()
                .unwrap(),
        );
        let wrm = CellWrmMap::uniform(Arc::new(VanGenuchten::new(2e-4, 1.8, 0.1).unwrap()), 4);
        let perm = vec![Matrix3::identity() * 1e-12; 4];
        let fluid = if gravity {
            FluidProperties::water()
        } else {
            FluidProperties::water().without_gravity()
        };
        let bcs = BoundaryConditions::new(mesh.as_ref(), specs).unwrap();
        let config = OperatorConfig {
            rel_perm: method,
            compute_derivatives: true,
            ..OperatorConfig::default()
        };
        let mut op = TpfaOperator::new(mesh, &perm, wrm, fluid, bcs, &config).unwrap();
        op.update_boundary(0.0);
        op
    }

    fn top_pressure(p: f64) -> Vec<BcSpec> {
        vec![BcSpec {
            region: "ymax".into(),
            kind: BcKind::Pressure,
            function: Some(BcFunction::Constant { value: p }),
        }]
    }

    #[test]
    fn constant_pressure_has_zero_divergence() {
        let op = column(RelPermMethod::UpwindDarcyFlux, &[], false);
        let x = DVector::from_element(4, 80_000.0);
        let mut out = DVector::zeros(4);
        op.flux_divergence(&x, &mut out);
        assert!(out.amax() < 1e-18);
    }

    #[test]
    fn hydrostatic_column_has_zero_divergence() {
        let op = column(RelPermMethod::UpwindGravity, &[], true);
        let f = op.fluid();
        let x = DVector::from_fn(4, |c, _| {
            let z = 0.5 + c as f64;
            f.p_atm_pa() - f.rho() * f.g() * z
        });
        let mut out = DVector::zeros(4);
        op.flux_divergence(&x, &mut out);
        assert!(out.amax() < 1e-15, "{out}");
    }

    #[test]
    fn assembled_operator_matches_divergence() {
        for method in [
            RelPermMethod::UpwindGravity,
            RelPermMethod::UpwindDarcyFlux,
            RelPermMethod::ArithmeticMean,
            RelPermMethod::Experimental,
            RelPermMethod::CellCentered,
        ] {
            let op = column(method, &top_pressure(70_000.0), true);
            let skel =
                build_op_skel(op.mesh(), &SerialComm, UnknownLayout::Cells, false).unwrap();
            let x = DVector::from_vec(vec![90_000.0, 85_000.0, 60_000.0, 75_000.0]);
            let mut a = skel.pattern.zero_matrix();
            let mut rhs = DVector::zeros(4);
            op.assemble(&x, &skel.pattern, &mut a, &mut rhs).unwrap();
            let mut ax = DVector::zeros(4);
            for (r, row) in a.outer_iterator().enumerate() {
                for (c, v) in row.iter() {
                    ax[r] += v * x[c];
                }
            }
            let mut div = DVector::zeros(4);
            op.flux_divergence(&x, &mut div);
            let diff = (ax - rhs - &div).amax();
            assert!(diff <= 1e-10 * div.amax().max(1e-12), "{method:?}: {diff}");
        }
    }

    #[test]
    fn analytic_jacobian_matches_finite_differences() {
        for method in [
            RelPermMethod::UpwindDarcyFlux,
            RelPermMethod::ArithmeticMean,
            RelPermMethod::CellCentered,
        ] {
            let op = column(method, &top_pressure(70_000.0), true);
            let skel =
                build_op_skel(op.mesh(), &SerialComm, UnknownLayout::Cells, false).unwrap();
            let x = DVector::from_vec(vec![90_000.0, 80_000.0, 62_000.0, 55_000.0]);
            let mut jac = skel.pattern.zero_matrix();
            let field = op.rel_perm(&x);
            op.add_flux_jacobian(&x, &field, &skel.pattern, &mut jac).unwrap();
            let scale = jac.data().iter().fold(0.0_f64, |m, v| m.max(v.abs()));

            let mut base = DVector::zeros(4);
            op.flux_divergence(&x, &mut base);
            for j in 0..4 {
                let h = 1e-3;
                let mut xp = x.clone();
                xp[j] += h;
                let mut fp = DVector::zeros(4);
                op.flux_divergence(&xp, &mut fp);
                let mut xm = x.clone();
                xm[j] -= h;
                let mut fm = DVector::zeros(4);
                op.flux_divergence(&xm, &mut fm);
                for i in 0..4 {
                    let fd = (fp[i] - fm[i]) / (2.0 * h);
                    let exact = jac.get(i, j).copied().unwrap_or(0.0);
                    assert!(
                        (fd - exact).abs() <= 1e-5 * fd.abs() + 1e-8 * scale,
                        "{method:?} J[{i},{j}]: fd={fd} exact={exact}"
                    );
                }
            }
        }
    }

    #[test]
    fn jacobian_needs_derivative_fields() {
        let mut op = column(RelPermMethod::UpwindDarcyFlux, &top_pressure(70_000.0), true);
        op.compute_derivatives = false;
        let skel = build_op_skel(op.mesh(), &SerialComm, UnknownLayout::Cells, false).unwrap();
        let x = DVector::from_vec(vec![90_000.0, 80_000.0, 62_000.0, 55_000.0]);
        let field = op.rel_perm(&x);
        assert!(field.d_cells.is_empty() && field.d_faces.is_empty());
        assert!(!op.computes_derivatives());
        let mut jac = skel.pattern.zero_matrix();
        assert!(matches!(
            op.add_flux_jacobian(&x, &field, &skel.pattern, &mut jac),
            Err(OperatorError::Setup { .. })
        ));
    }

    #[test]
    fn cell_centered_faces_default_to_one() {
        let op = column(RelPermMethod::CellCentered, &[], false);
        let x = DVector::from_element(4, 50_000.0);
        let field = op.rel_perm(&x);
        assert!(field.faces.iter().all(|&v| v == 1.0));
        assert!(field.cells.iter().all(|&v| v < 1.0));

        let op = column(RelPermMethod::UpwindDarcyFlux, &[], false);
        let field = op.rel_perm(&x);
        assert!(field.cells.iter().all(|&v| v == 1.0));
        assert_eq!(field.d_faces.len(), field.faces.len());
    }

    #[test]
    fn seepage_blocks_inflow() {
        let specs = vec![BcSpec {
            region: "ymin".into(),
            kind: BcKind::Seepage,
            function: None,
        }];
        let op = column(RelPermMethod::UpwindDarcyFlux, &specs, false);
        let f = op.mesh().region_faces("ymin").unwrap()[0];
        let dry = DVector::from_element(4, 50_000.0);
        assert_eq!(op.darcy_flux(&dry)[f], 0.0);
        let wet = DVector::from_element(4, 150_000.0);
        assert!(op.darcy_flux(&wet)[f] > 0.0);
    }
}
