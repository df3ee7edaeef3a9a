//! Linear solver service used for the Newton correction `J y = F`.
//!
//! The driver treats a solver as a black box: it is updated with the current
//! Jacobian, then asked for `J^{-1} rhs`. A nonzero return code means the
//! solve failed and the Newton iteration diverges.

use nalgebra::{DMatrix, DVector, Dyn, linalg::LU};
use sprs::CsMat;

use crate::control::LinearSolverKind;
use crate::{SolverError, SolverResult};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearSolveReport {
    pub iterations: usize,
    /// Final residual 2-norm `|rhs - J x|`.
    pub residual: f64,
    /// 0 on success.
    pub code: i32,
}

impl LinearSolveReport {
    pub fn succeeded(&self) -> bool {
        self.code == 0
    }
}

pub trait LinearSolver: Send {
    fn name(&self) -> &'static str;

    /// Sets the operator for subsequent solves.
    fn update(&mut self, matrix: &CsMat<f64>) -> SolverResult<()>;

    /// Solves `J x = rhs`; `x` holds the initial guess on entry.
    fn apply_inverse(&mut self, rhs: &DVector<f64>, x: &mut DVector<f64>) -> LinearSolveReport;
}

pub fn build_linear_solver(
    kind: LinearSolverKind,
    tolerance: f64,
    max_iterations: usize,
) -> Box<dyn LinearSolver> {
    match kind {
        LinearSolverKind::DenseLu => Box::new(DenseLu::default()),
        LinearSolverKind::BiCgStab => Box::new(BiCgStab::new(tolerance, max_iterations)),
    }
}

/// `y = A x` for a CSR matrix.
pub fn csr_mul(a: &CsMat<f64>, x: &DVector<f64>, y: &mut DVector<f64>) {
    for (r, row) in a.outer_iterator().enumerate() {
        y[r] = row.iter().map(|(c, v)| v * x[c]).sum();
    }
}

fn to_dense(a: &CsMat<f64>) -> DMatrix<f64> {
    let mut d = DMatrix::zeros(a.rows(), a.cols());
    for (r, row) in a.outer_iterator().enumerate() {
        for (c, &v) in row.iter() {
            d[(r, c)] += v;
        }
    }
    d
}

fn residual_norm(a: &CsMat<f64>, rhs: &DVector<f64>, x: &DVector<f64>) -> f64 {
    let mut ax = DVector::zeros(rhs.len());
    csr_mul(a, x, &mut ax);
    (rhs - ax).norm()
}

/// Direct LU factorization of the densified Jacobian.
#[derive(Default)]
pub struct DenseLu {
    matrix: Option<CsMat<f64>>,
    lu: Option<LU<f64, Dyn, Dyn>>,
}

impl LinearSolver for DenseLu {
    fn name(&self) -> &'static str {
        "dense-lu"
    }

    fn update(&mut self, matrix: &CsMat<f64>) -> SolverResult<()> {
        if matrix.rows() != matrix.cols() {
            return Err(SolverError::Linear {
                what: format!("matrix is {}x{}", matrix.rows(), matrix.cols()),
            });
        }
        self.lu = Some(to_dense(matrix).lu());
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn apply_inverse(&mut self, rhs: &DVector<f64>, x: &mut DVector<f64>) -> LinearSolveReport {
        let (Some(lu), Some(a)) = (&self.lu, &self.matrix) else {
            return LinearSolveReport {
                iterations: 0,
                residual: f64::INFINITY,
                code: -2,
            };
        };
        match lu.solve(rhs) {
            Some(sol) if sol.iter().all(|v| v.is_finite()) => {
                *x = sol;
                LinearSolveReport {
                    iterations: 1,
                    residual: residual_norm(a, rhs, x),
                    code: 0,
                }
            }
            _ => LinearSolveReport {
                iterations: 1,
                residual: f64::INFINITY,
                code: -1,
            },
        }
    }
}

/// Jacobi-preconditioned BiCGStab.
pub struct BiCgStab {
    tolerance: f64,
    max_iterations: usize,
    matrix: Option<CsMat<f64>>,
    inv_diag: DVector<f64>,
}

impl BiCgStab {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
            matrix: None,
            inv_diag: DVector::zeros(0),
        }
    }
}

impl LinearSolver for BiCgStab {
    fn name(&self) -> &'static str {
        "bicgstab"
    }

    fn update(&mut self, matrix: &CsMat<f64>) -> SolverResult<()> {
        if matrix.rows() != matrix.cols() {
            return Err(SolverError::Linear {
                what: format!("matrix is {}x{}", matrix.rows(), matrix.cols()),
            });
        }
        let mut diag = DVector::from_element(matrix.rows(), 1.0);
        for (r, row) in matrix.outer_iterator().enumerate() {
            if let Some(&d) = row.get(r) {
                if d != 0.0 {
                    diag[r] = 1.0 / d;
                }
            }
        }
        self.inv_diag = diag;
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn apply_inverse(&mut self, rhs: &DVector<f64>, x: &mut DVector<f64>) -> LinearSolveReport {
        let Some(a) = &self.matrix else {
            return LinearSolveReport {
                iterations: 0,
                residual: f64::INFINITY,
                code: -2,
            };
        };
        let n = rhs.len();
        let b_norm = rhs.norm();
        if b_norm == 0.0 {
            x.fill(0.0);
            return LinearSolveReport {
                iterations: 0,
                residual: 0.0,
                code: 0,
            };
        }
        let target = self.tolerance * b_norm;
        let precond = |v: &DVector<f64>| v.component_mul(&self.inv_diag);

        let mut ax = DVector::zeros(n);
        csr_mul(a, x, &mut ax);
        let mut r = rhs - &ax;
        if r.norm() <= target {
            return LinearSolveReport {
                iterations: 0,
                residual: r.norm(),
                code: 0,
            };
        }
        let r_hat = r.clone();
        let (mut rho, mut alpha, mut omega) = (1.0, 1.0, 1.0);
        let mut v = DVector::zeros(n);
        let mut p = DVector::zeros(n);
        let mut s_tmp = DVector::zeros(n);
        let mut t = DVector::zeros(n);

        for it in 1..=self.max_iterations {
            let rho_new = r_hat.dot(&r);
            if rho_new == 0.0 || omega == 0.0 {
                return LinearSolveReport {
                    iterations: it,
                    residual: r.norm(),
                    code: 2,
                };
            }
            let beta = (rho_new / rho) * (alpha / omega);
            rho = rho_new;
            p = &r + beta * (&p - omega * &v);
            let p_hat = precond(&p);
            csr_mul(a, &p_hat, &mut v);
            alpha = rho / r_hat.dot(&v);
            let s = &r - alpha * &v;
            if s.norm() <= target {
                x.axpy(alpha, &p_hat, 1.0);
                return LinearSolveReport {
                    iterations: it,
                    residual: s.norm(),
                    code: 0,
                };
            }
            let s_hat = precond(&s);
            csr_mul(a, &s_hat, &mut t);
            let tt = t.dot(&t);
            omega = if tt > 0.0 { t.dot(&s) / tt } else { 0.0 };
            x.axpy(alpha, &p_hat, 1.0);
            x.axpy(omega, &s_hat, 1.0);
            s_tmp.copy_from(&s);
            r = &s_tmp - omega * &t;
            let res = r.norm();
            if !res.is_finite() {
                return LinearSolveReport {
                    iterations: it,
                    residual: res,
                    code: 2,
                };
            }
            if res <= target {
                return LinearSolveReport {
                    iterations: it,
                    residual: res,
                    code: 0,
                };
            }
        }
        LinearSolveReport {
            iterations: self.max_iterations,
            residual: r.norm(),
            code: 1,
        }
    }
}
