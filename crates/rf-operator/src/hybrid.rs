//! Hybrid mimetic finite differences with cell and face pressure unknowns.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Matrix3};
use rayon::prelude::*;
use rf_mesh::{Mesh, Ownership};
use rf_wrm::CellWrmMap;
use sprs::CsMat;

use crate::bc::{BoundaryConditions, FaceBc};
use crate::fluid::FluidProperties;
use crate::mfd::inverse_mass_matrix;
use crate::operator::{DiffusionOperator, OperatorConfig, add_value, zero_values};
use crate::relperm::{RelPermField, RelPermMethod};
use crate::skeleton::{SparsityPattern, UnknownLayout};
use crate::{OperatorError, OperatorResult};

struct LocalCell {
    faces: Vec<usize>,
    w: DMatrix<f64>,
    z: f64,
}

/// Mimetic operator on the unknown vector `[p_c..., lambda_f...]`.
///
/// Cell rows are the net mass outflow. Interior face rows are flux
/// continuity written as the negated sum of the two outflows, which keeps
/// the frozen-coefficient matrix symmetric. Dirichlet faces replace their
/// row by `m W_ff (lambda_f - p_b)`.
pub struct MfdOperator {
    mesh: Arc<dyn Mesh>,
    wrm: CellWrmMap,
    fluid: FluidProperties,
    method: RelPermMethod,
    compute_derivatives: bool,
    bcs: BoundaryConditions,
    cells: Vec<LocalCell>,
    face_z: Vec<f64>,
    /// Local position of each face within its first cell.
    face_slot: Vec<usize>,
    n_cells: usize,
}

/// Cell-local coefficients `m kr_c sqrt(kr_i) W_ij sqrt(kr_j)`.
type LocalSystem = DMatrix<f64>;

impl MfdOperator {
    pub fn new(
        mesh: Arc<dyn Mesh>,
        perm: &[Matrix3<f64>],
        wrm: CellWrmMap,
        fluid: FluidProperties,
        bcs: BoundaryConditions,
        config: &OperatorConfig,
    ) -> OperatorResult<Self> {
        let n_cells = mesh.num_cells(Ownership::Owned);
        let n_faces = mesh.num_faces(Ownership::Owned);
        if n_cells != mesh.num_cells(Ownership::Used) || n_faces != mesh.num_faces(Ownership::Used)
        {
            return Err(OperatorError::Setup {
                what: "the hybrid operator needs a mesh without ghost entities".into(),
            });
        }
        if perm.len() != n_cells || wrm.len() != n_cells {
            return Err(OperatorError::Setup {
                what: format!(
                    "expected {n_cells} permeability tensors and WRM cells, got {} and {}",
                    perm.len(),
                    wrm.len()
                ),
            });
        }
        let cells = (0..n_cells)
            .into_par_iter()
            .map(|c| {
                Ok(LocalCell {
                    faces: mesh.cell_faces(c).to_vec(),
                    w: inverse_mass_matrix(mesh.as_ref(), c, &perm[c], config.stability_scaling)?,
                    z: mesh.elevation(&mesh.cell_centroid(c)),
                })
            })
            .collect::<OperatorResult<Vec<_>>>()?;
        let face_z = (0..n_faces)
            .map(|f| mesh.elevation(&mesh.face_centroid(f)))
            .collect();
        let mut face_slot = vec![0; n_faces];
        for f in 0..n_faces {
            let c1 = mesh.face_cells(f).0;
            face_slot[f] = cells[c1]
                .faces
                .iter()
                .position(|&g| g == f)
                .ok_or_else(|| OperatorError::Setup {
                    what: format!("face {f} is missing from the face list of cell {c1}"),
                })?;
        }
        tracing::debug!(
            cells = n_cells,
            faces = n_faces,
            method = ?config.rel_perm,
            "MFD operator built"
        );
        Ok(Self {
            mesh,
            wrm,
            fluid,
            method: config.rel_perm,
            compute_derivatives: config.compute_derivatives,
            bcs,
            cells,
            face_z,
            face_slot,
            n_cells,
        })
    }

    pub fn mesh(&self) -> &dyn Mesh {
        self.mesh.as_ref()
    }

    fn rho_g(&self) -> f64 {
        self.fluid.rho() * self.fluid.g()
    }

    fn kr(&self, c: usize, p: f64) -> (f64, f64) {
        let model = self.wrm.model(c);
        let pc = self.fluid.capillary(p);
        (model.k_relative(pc), -model.d_k_relative(pc))
    }

    /// Cell and face relative permeabilities with their derivatives.
    fn rel_perm_parts(&self, x: &DVector<f64>) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<[f64; 2]>) {
        let n = self.n_cells;
        let rho_g = self.rho_g();
        let (kr, dkr): (Vec<f64>, Vec<f64>) = (0..n)
            .into_par_iter()
            .map(|c| self.kr(c, x[c]))
            .unzip();
        let (faces, d_faces): (Vec<f64>, Vec<[f64; 2]>) = (0..self.face_z.len())
            .into_par_iter()
            .map(|f| {
                let (c1, c2) = self.mesh.face_cells(f);
                let z1 = self.cells[c1].z;
                let phi1 = x[c1] + rho_g * z1;
                let (kr2, dkr2, phi2, z2) = match (c2, self.bcs.face(f)) {
                    (Some(c2), _) => (kr[c2], dkr[c2], x[c2] + rho_g * self.cells[c2].z, self.cells[c2].z),
                    (None, FaceBc::Pressure(pb)) => {
                        let zf = self.face_z[f];
                        (self.kr(c1, pb).0, 0.0, x[n + f] + rho_g * zf, zf)
                    }
                    (None, _) => {
                        let zf = self.face_z[f];
                        (kr[c1], 0.0, x[n + f] + rho_g * zf, zf)
                    }
                };
                let (v, w) = self
                    .method
                    .face_value(kr[c1], kr2, phi1 - phi2, rho_g * (z1 - z2));
                (v, [w[0] * dkr[c1], w[1] * dkr2])
            })
            .unzip();
        let cells = if self.method.uses_cell_values() {
            kr
        } else {
            vec![1.0; n]
        };
        let d_cells = if self.method.uses_cell_values() {
            dkr
        } else {
            vec![0.0; n]
        };
        (cells, d_cells, faces, d_faces)
    }

    fn local_systems(&self, x: &DVector<f64>) -> Vec<LocalSystem> {
        let (cells, _, faces, _) = self.rel_perm_parts(x);
        let m = self.fluid.mobility();
        self.cells
            .par_iter()
            .enumerate()
            .map(|(c, local)| {
                let s: Vec<f64> = local.faces.iter().map(|&f| faces[f].max(0.0).sqrt()).collect();
                let nf = local.faces.len();
                DMatrix::from_fn(nf, nf, |i, j| m * cells[c] * s[i] * local.w[(i, j)] * s[j])
            })
            .collect()
    }

    /// Outward mass flux of every cell through each of its faces.
    fn cell_fluxes(&self, x: &DVector<f64>, systems: &[LocalSystem]) -> Vec<Vec<f64>> {
        let n = self.n_cells;
        let rho_g = self.rho_g();
        self.cells
            .par_iter()
            .zip(systems.par_iter())
            .enumerate()
            .map(|(c, (local, mloc))| {
                let phi_c = x[c] + rho_g * local.z;
                let drops = DVector::from_iterator(
                    local.faces.len(),
                    local
                        .faces
                        .iter()
                        .map(|&f| phi_c - (x[n + f] + rho_g * self.face_z[f])),
                );
                (mloc * drops).as_slice().to_vec()
            })
            .collect()
    }

    /// Scale for boundary rows so they are commensurate with flux rows.
    fn dirichlet_weight(&self, f: usize) -> f64 {
        let c1 = self.mesh.face_cells(f).0;
        let i = self.face_slot[f];
        self.fluid.mobility() * self.cells[c1].w[(i, i)]
    }

    fn active_dirichlet(&self, f: usize, lambda: f64) -> Option<f64> {
        match self.bcs.face(f) {
            FaceBc::Pressure(pb) => Some(pb),
            FaceBc::Seepage if lambda >= self.fluid.p_atm_pa() => Some(self.fluid.p_atm_pa()),
            _ => None,
        }
    }
}

impl DiffusionOperator for MfdOperator {
    fn layout(&self) -> UnknownLayout {
        UnknownLayout::CellsAndFaces
    }

    fn num_cells(&self) -> usize {
        self.n_cells
    }

    fn num_unknowns(&self) -> usize {
        self.n_cells + self.face_z.len()
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
        let n = self.n_cells;
        out.fill(0.0);
        let systems = self.local_systems(x);
        let fluxes = self.cell_fluxes(x, &systems);
        for (c, (local, q)) in self.cells.iter().zip(&fluxes).enumerate() {
            for (&f, &qf) in local.faces.iter().zip(q) {
                out[c] += qf;
                out[n + f] -= qf;
            }
        }
        for f in 0..self.face_z.len() {
            if self.mesh.face_cells(f).1.is_some() {
                continue;
            }
            let lambda = x[n + f];
            match (self.bcs.face(f), self.active_dirichlet(f, lambda)) {
                (_, Some(pb)) => out[n + f] = self.dirichlet_weight(f) * (lambda - pb),
                (FaceBc::MassFlux(q_in), None) => out[n + f] -= q_in * self.mesh.face_area(f),
                _ => {}
            }
        }
    }

    fn rel_perm(&self, x: &DVector<f64>) -> RelPermField {
        let (cells, d_cells, faces, d_faces) = self.rel_perm_parts(x);
        if self.compute_derivatives {
            RelPermField {
                cells,
                faces,
                d_cells,
                d_faces,
            }
        } else {
            RelPermField {
                cells,
                faces,
                ..RelPermField::default()
            }
        }
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
        let rho_g = self.rho_g();
        let dirichlet: Vec<Option<f64>> = (0..self.face_z.len())
            .map(|f| self.active_dirichlet(f, x[n + f]))
            .collect();
        let systems = self.local_systems(x);

        for (c, (local, mloc)) in self.cells.iter().zip(&systems).enumerate() {
            for (i, &fi) in local.faces.iter().enumerate() {
                let row_f = n + fi;
                let keep_face_row = dirichlet[fi].is_none();
                for (j, &fj) in local.faces.iter().enumerate() {
                    let mij = mloc[(i, j)];
                    let grav = mij * rho_g * (local.z - self.face_z[fj]);
                    add_value(pattern, matrix, c, c, mij)?;
                    add_value(pattern, matrix, c, n + fj, -mij)?;
                    rhs[c] -= grav;
                    if keep_face_row {
                        add_value(pattern, matrix, row_f, c, -mij)?;
                        add_value(pattern, matrix, row_f, n + fj, mij)?;
                        rhs[row_f] += grav;
                    }
                }
            }
        }
        for f in 0..self.face_z.len() {
            if self.mesh.face_cells(f).1.is_some() {
                continue;
            }
            match (self.bcs.face(f), dirichlet[f]) {
                (_, Some(pb)) => {
                    let w = self.dirichlet_weight(f);
                    add_value(pattern, matrix, n + f, n + f, w)?;
                    rhs[n + f] += w * pb;
                }
                (FaceBc::MassFlux(q_in), None) => rhs[n + f] += q_in * self.mesh.face_area(f),
                _ => {}
            }
        }
        Ok(())
    }

    fn darcy_flux(&self, x: &DVector<f64>) -> Vec<f64> {
        let systems = self.local_systems(x);
        let fluxes = self.cell_fluxes(x, &systems);
        let mut out = vec![0.0; self.face_z.len()];
        let mut seen = vec![0u8; self.face_z.len()];
        for (c, (local, q)) in self.cells.iter().zip(&fluxes).enumerate() {
            for (&f, &qf) in local.faces.iter().zip(q) {
                let first = self.mesh.face_cells(f).0 == c;
                out[f] += if first { qf } else { -qf };
                seen[f] += 1;
            }
        }
        for (v, &k) in out.iter_mut().zip(&seen) {
            if k > 1 {
                *v /= f64::from(k);
            }
        }
        out
    }

    fn extend_cell_field(&self, cells: &DVector<f64>) -> DVector<f64> {
        let n = self.n_cells;
        let mut full = DVector::zeros(self.num_unknowns());
        full.rows_mut(0, n).copy_from(&cells.rows(0, n));
        for f in 0..self.face_z.len() {
            full[n + f] = match (self.mesh.face_cells(f), self.bcs.face(f)) {
                ((c1, Some(c2)), _) => 0.5 * (cells[c1] + cells[c2]),
                (_, FaceBc::Pressure(pb)) => pb,
                ((c1, None), _) => cells[c1],
            };
        }
        full
    }
}
