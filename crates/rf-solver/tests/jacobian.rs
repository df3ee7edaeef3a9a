//! Jacobian strategies agree with each other on a transient column.

use std::sync::Arc;

use nalgebra::{DVector, Matrix3};
use rf_core::SerialComm;
use rf_core::constants::P_ATM_PA;
use rf_mesh::{BoxMeshBuilder, Mesh};
use rf_operator::{
    BcFunction, BcKind, BcSpec, BoundaryConditions, FluidProperties, OperatorConfig,
    RelPermMethod, SourceSpec, Sources, build_operator,
};
use rf_solver::{
    Accumulation, JacobianStrategy, NlsConfig, RichardsEvaluator, SolverError, SolverResult, Storage,
};
use rf_wrm::{BrooksCorey, VanGenuchten, WrmRegistry};
use sprs::CsMat;

fn evaluator(strategy: JacobianStrategy, rel_perm: RelPermMethod) -> RichardsEvaluator {
    try_evaluator(strategy, rel_perm, strategy.needs_rel_perm_derivatives()).expect("evaluator")
}

fn try_evaluator(
    strategy: JacobianStrategy,
    rel_perm: RelPermMethod,
    compute_derivatives: bool,
) -> SolverResult<RichardsEvaluator> {
    let mesh: Arc<dyn Mesh> = Arc::new(
        BoxMeshBuilder::new(&[0.0, 0.0, 0.0], &[2.0, 1.0, 3.0], &[2, 1, 4])
            .cell_region("lower", &[0.0, 0.0, 0.0], &[2.0, 1.0, 1.5])
            .cell_region("upper", &[0.0, 0.0, 1.5], &[2.0, 1.0, 3.0])
            .build()
            .expect("box mesh"),
    );
    let n = mesh.num_cells(rf_mesh::Ownership::Owned);
    let perm: Vec<Matrix3<f64>> = (0..n)
        .map(|c| Matrix3::from_diagonal_element(1e-12 * (1.0 + 0.3 * c as f64)))
        .collect();
    let mut registry = WrmRegistry::new();
    registry
        .insert("lower", Arc::new(BrooksCorey::new(2e3, 1.5, 0.1).expect("brooks-corey")))
        .insert("upper", Arc::new(VanGenuchten::new(3e-5, 1.8, 0.05).expect("van Genuchten")));
    let wrm = registry.cell_map(mesh.as_ref()).expect("cell map");
    let fluid = FluidProperties::water();
    let specs = vec![
        BcSpec {
            region: "zmax".into(),
            kind: BcKind::Pressure,
            function: Some(BcFunction::Constant {
                value: 0.75 * P_ATM_PA,
            }),
        },
        BcSpec {
            region: "xmin".into(),
            kind: BcKind::MassFlux,
            function: Some(BcFunction::Constant { value: 2e-4 }),
        },
    ];
    let bcs = BoundaryConditions::new(mesh.as_ref(), &specs).expect("bcs");
    let config = OperatorConfig {
        rel_perm,
        compute_derivatives,
        ..OperatorConfig::default()
    };
    let operator =
        build_operator(mesh.clone(), &perm, wrm.clone(), fluid, bcs, &config).expect("operator");
    let sources = Sources::new(
        mesh.as_ref(),
        &[SourceSpec {
            region: "lower".into(),
            function: BcFunction::Constant { value: -1e-5 },
        }],
    )
    .expect("sources");
    let storage = Storage {
        accumulation: Accumulation::Richards,
        porosity: vec![0.35; n],
        specific_storage: vec![0.0; n],
    };
    let nls = NlsConfig {
        jacobian: strategy,
        centered_diff: true,
        fd_epsilon: 1e-6,
        ..NlsConfig::default()
    };
    RichardsEvaluator::new(mesh, &SerialComm, operator, wrm, fluid, sources, storage, &nls)
}

fn jacobian_at(ev: &mut RichardsEvaluator, p_n: &DVector<f64>, x: &DVector<f64>) -> CsMat<f64> {
    ev.begin_step(p_n, 50.0, 50.0);
    let mut f = DVector::zeros(x.len());
    ev.residual(x, &mut f);
    let mut j = ev.skeleton().pattern.zero_matrix();
    ev.jacobian(x, &f, &mut j).expect("jacobian");
    j
}

fn states(n: usize) -> (DVector<f64>, DVector<f64>) {
    let p_n = DVector::from_fn(n, |c, _| (0.8 + 0.02 * c as f64) * P_ATM_PA);
    let x = DVector::from_fn(n, |c, _| (0.78 + 0.025 * c as f64) * P_ATM_PA);
    (p_n, x)
}

fn assert_close(a: &CsMat<f64>, b: &CsMat<f64>, rel: f64) {
    assert_eq!(a.nnz(), b.nnz());
    let scale = a.data().iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    for (k, (x, y)) in a.data().iter().zip(b.data()).enumerate() {
        assert!(
            (x - y).abs() <= rel * scale,
            "entry {k}: {x} vs {y} (scale {scale})"
        );
    }
}

#[test]
fn semi_analytic_matches_finite_differences() {
    let mut fd = evaluator(JacobianStrategy::FdColoring, RelPermMethod::UpwindGravity);
    let mut semi = evaluator(JacobianStrategy::SemiAnalytic, RelPermMethod::UpwindGravity);
    let (p_n, x) = states(fd.num_cells());
    let a = jacobian_at(&mut fd, &p_n, &x);
    let b = jacobian_at(&mut semi, &p_n, &x);
    assert_close(&a, &b, 1e-5);
}

#[test]
fn analytic_matches_finite_differences() {
    for method in [
        RelPermMethod::UpwindGravity,
        RelPermMethod::ArithmeticMean,
        RelPermMethod::CellCentered,
    ] {
        let mut fd = evaluator(JacobianStrategy::FdColoring, method);
        let mut exact = evaluator(JacobianStrategy::Analytic, method);
        let (p_n, x) = states(fd.num_cells());
        let a = jacobian_at(&mut fd, &p_n, &x);
        let b = jacobian_at(&mut exact, &p_n, &x);
        assert_close(&a, &b, 1e-5);
    }
}

#[test]
fn steady_jacobian_has_no_storage() {
    let mut ev = evaluator(JacobianStrategy::Analytic, RelPermMethod::UpwindGravity);
    let (p_n, x) = states(ev.num_cells());
    let transient = jacobian_at(&mut ev, &p_n, &x);
    ev.begin_step(&p_n, 50.0, 0.0);
    let mut f = DVector::zeros(x.len());
    ev.residual(&x, &mut f);
    let mut steady = ev.skeleton().pattern.zero_matrix();
    ev.jacobian(&x, &f, &mut steady).expect("jacobian");
    let pattern = &ev.skeleton().pattern;
    for c in 0..ev.num_cells() {
        let k = pattern.slot(c, c).expect("diagonal");
        let storage = transient.data()[k] - steady.data()[k];
        let expected = ev.d_stored_mass(c, x[c]) / 50.0;
        assert!((storage - expected).abs() <= 1e-9 * expected.abs().max(1e-300));
    }
    assert_eq!(ev.jacobian_assemblies(), 2);
}

#[test]
fn analytic_needs_derivative_fields() {
    let err = try_evaluator(JacobianStrategy::Analytic, RelPermMethod::UpwindGravity, false)
        .err()
        .expect("operator without derivatives must be rejected");
    assert!(matches!(err, SolverError::ProblemSetup { .. }), "{err}");
}

#[test]
fn picard_matches_finite_differences_when_saturated() {
    // above p_atm k_rel and s are constant, so freezing them is exact
    let mut fd = evaluator(JacobianStrategy::FdColoring, RelPermMethod::UpwindGravity);
    let mut picard = evaluator(JacobianStrategy::Picard, RelPermMethod::UpwindGravity);
    let n = fd.num_cells();
    let p_n = DVector::from_fn(n, |c, _| (1.1 + 0.01 * c as f64) * P_ATM_PA);
    let x = DVector::from_fn(n, |c, _| (1.05 + 0.02 * c as f64) * P_ATM_PA);
    let a = jacobian_at(&mut fd, &p_n, &x);
    let b = jacobian_at(&mut picard, &p_n, &x);
    assert_close(&a, &b, 1e-5);
}

#[test]
fn picard_drops_rel_perm_derivatives() {
    let mut exact = evaluator(JacobianStrategy::Analytic, RelPermMethod::UpwindGravity);
    let mut picard = evaluator(JacobianStrategy::Picard, RelPermMethod::UpwindGravity);
    let (p_n, x) = states(exact.num_cells());
    let a = jacobian_at(&mut exact, &p_n, &x);
    let b = jacobian_at(&mut picard, &p_n, &x);
    let pattern = &exact.skeleton().pattern;
    // storage diagonal is shared; the flux part differs by the k_rel terms
    let differs = a
        .data()
        .iter()
        .zip(b.data())
        .any(|(u, v)| (u - v).abs() > 1e-6 * u.abs().max(v.abs()));
    assert!(differs);
    for c in 0..exact.num_cells() {
        let k = pattern.slot(c, c).expect("diagonal");
        assert!(b.data()[k] > 0.0, "cell {c}");
    }
}
