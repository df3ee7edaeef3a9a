//! Integration tests: Newton solves on small vertical columns.

use std::sync::Arc;

use nalgebra::{DVector, Matrix3};
use rf_core::SerialComm;
use rf_core::constants::P_ATM_PA;
use rf_mesh::{BoxMeshBuilder, Mesh};
use rf_operator::{
    BcFunction, BcKind, BcSpec, BoundaryConditions, Discretization, FluidProperties,
    OperatorConfig, Sources, build_operator,
};
use rf_solver::{
    Accumulation, ConvergedReason, DivergedReason, JacobianStrategy, NlsConfig, NlsControl,
    RichardsEvaluator, RichardsSolver, SolveStatus, SolverError, SolverResult, Storage,
    LinearSolverKind, build_linear_solver,
};
use rf_wrm::{CellWrmMap, VanGenuchten};

struct Column {
    n_cells: usize,
    bcs: Vec<BcSpec>,
    fluid: FluidProperties,
    operator: OperatorConfig,
    nls: NlsConfig,
}

impl Column {
    fn new(n_cells: usize) -> Self {
        Self {
            n_cells,
            bcs: Vec::new(),
            fluid: FluidProperties::water(),
            operator: OperatorConfig::default(),
            nls: NlsConfig::default(),
        }
    }

    fn bc(mut self, region: &str, kind: BcKind, value: f64) -> Self {
        self.bcs.push(BcSpec {
            region: region.into(),
            kind,
            function: Some(BcFunction::Constant { value }),
        });
        self
    }

    fn evaluator(&self) -> SolverResult<RichardsEvaluator> {
        let mesh: Arc<dyn Mesh> = Arc::new(
            BoxMeshBuilder::new(&[0.0, 0.0, 0.0], &[1.0, 1.0, 2.0], &[1, 1, self.n_cells])
                .build()
                .expect("box mesh"),
        );
        let n = self.n_cells;
        let perm = vec![Matrix3::identity() * 1e-12; n];
        let wrm = CellWrmMap::uniform(
            Arc::new(VanGenuchten::new(2e-5, 2.0, 0.1).expect("van Genuchten")),
            n,
        );
        let bcs = BoundaryConditions::new(mesh.as_ref(), &self.bcs)?;
        let config = OperatorConfig {
            compute_derivatives: self.nls.jacobian.needs_rel_perm_derivatives(),
            ..self.operator
        };
        let operator = build_operator(mesh.clone(), &perm, wrm.clone(), self.fluid, bcs, &config)?;
        let sources = Sources::empty(mesh.as_ref());
        let storage = Storage {
            accumulation: Accumulation::Richards,
            porosity: vec![0.3; n],
            specific_storage: vec![0.0; n],
        };
        RichardsEvaluator::new(
            mesh,
            &SerialComm,
            operator,
            wrm,
            self.fluid,
            sources,
            storage,
            &self.nls,
        )
    }

    fn solver(&self, p0: f64) -> RichardsSolver {
        let evaluator = self.evaluator().expect("evaluator");
        let mut solver =
            RichardsSolver::new(evaluator, Arc::new(SerialComm), self.nls.clone()).expect("solver");
        solver
            .set_initial_pressure(&DVector::from_element(self.n_cells, p0))
            .expect("initial pressure");
        solver
    }
}

#[test]
fn tiny_step_is_refused_without_evaluation() {
    let mut solver = Column::new(4).solver(0.9 * P_ATM_PA);
    let mut ctl = NlsControl::new();
    let outcome = solver.solve(0.0, 0.005, 1, &mut ctl).expect("solve");
    assert_eq!(outcome.status, SolveStatus::DtTooSmall);
    assert_eq!(outcome.iterations, 0);
    assert_eq!(ctl.function_evaluations, 0);
    assert_eq!(solver.evaluator().residual_evaluations(), 0);
}

#[test]
fn drying_column_converges_between_bounds() {
    let mut column = Column::new(5).bc("zmax", BcKind::Pressure, 0.6 * P_ATM_PA);
    column.fluid = FluidProperties::water().without_gravity();
    column.nls.jacobian = JacobianStrategy::Analytic;
    let p0 = 0.95 * P_ATM_PA;
    let mut solver = column.solver(p0);
    let mut ctl = NlsControl::new();

    let dt = 100.0;
    for step in 0..5 {
        let t0 = step as f64 * dt;
        let outcome = solver.solve(t0, t0 + dt, step, &mut ctl).expect("solve");
        assert!(outcome.is_converged(), "step {step}: {}", outcome.status);
        assert!(outcome.residual_norm < 1e-6, "step {step}: {}", outcome.residual_norm);
        solver.commit();
    }
    let p = solver.cell_pressure();
    for (c, &pc) in p.iter().enumerate() {
        assert!(pc > 0.0 && pc < P_ATM_PA, "cell {c}: {pc}");
        assert!(pc >= 0.6 * P_ATM_PA - 1.0 && pc <= p0 + 1.0, "cell {c}: {pc}");
    }
    // drying front starts at the top
    assert!(p[4] < p[0]);
}

#[test]
fn infiltration_balances_mass() {
    let q_in = 1e-3;
    let column = Column::new(6).bc("zmax", BcKind::MassFlux, q_in);
    let mut solver = column.solver(0.9 * P_ATM_PA);
    let mut ctl = NlsControl::new();
    let dt = 500.0;
    let n = 6.0_f64;
    for step in 0..3 {
        let t0 = step as f64 * dt;
        let mass_before = solver.evaluator().total_mass(solver.pressure_n());
        let outcome = solver.solve(t0, t0 + dt, step, &mut ctl).expect("solve");
        assert!(outcome.is_converged(), "step {step}: {}", outcome.status);
        let mass_after = solver.evaluator().total_mass(&solver.cell_pressure());
        // unit top area: the summed residual is (mass change)/dt - inflow
        let imbalance = ((mass_after - mass_before) / dt - q_in).abs();
        let bound = n.sqrt() * outcome.residual_norm + 1e-9 * q_in;
        assert!(imbalance <= bound, "step {step}: {imbalance} > {bound}");
        solver.commit();
    }
}

#[test]
fn jacobian_reuse_follows_countdown() {
    let mut column = Column::new(5).bc("zmax", BcKind::Pressure, 0.7 * P_ATM_PA);
    column.nls.max_num_jacobian_reuses = 2;
    column.nls.max_iterations = 30;
    let mut solver = column.solver(0.9 * P_ATM_PA);
    let mut ctl = NlsControl::new();
    for step in 0..2 {
        let t0 = step as f64 * 200.0;
        solver.solve(t0, t0 + 200.0, step, &mut ctl).expect("solve");
        assert!(ctl.jacobian_calls >= 1);
        assert_eq!(ctl.jacobian_assemblies, (ctl.jacobian_calls + 2) / 3);
        assert_eq!(ctl.jacobian_reuses, ctl.jacobian_calls - ctl.jacobian_assemblies);
        solver.commit();
    }
}

#[test]
fn diverged_solve_keeps_incoming_state() {
    let mut column = Column::new(4).bc("zmax", BcKind::Pressure, 0.5 * P_ATM_PA);
    column.nls.max_iterations = 1;
    column.nls.atol = 0.0;
    column.nls.rtol = 0.0;
    column.nls.stol = 0.0;
    let p0 = 0.9 * P_ATM_PA;
    let mut solver = column.solver(p0);
    let before = solver.solution().clone();
    let mut ctl = NlsControl::new();
    let outcome = solver.solve(0.0, 100.0, 0, &mut ctl).expect("solve");
    assert_eq!(outcome.status, SolveStatus::Diverged(DivergedReason::MaxIterations));
    assert_eq!(solver.solution(), &before);
    assert_eq!(ctl.iterations_taken, 1);
}

#[test]
fn uniform_equilibrium_converges_immediately() {
    let mut column = Column::new(3).bc("zmax", BcKind::Pressure, 0.8 * P_ATM_PA);
    column.fluid = FluidProperties::water().without_gravity();
    let mut solver = column.solver(0.8 * P_ATM_PA);
    let mut ctl = NlsControl::new();
    let outcome = solver.solve(0.0, 10.0, 0, &mut ctl).expect("solve");
    assert_eq!(
        outcome.status,
        SolveStatus::Converged(ConvergedReason::FnormAbsolute)
    );
    assert_eq!(outcome.iterations, 0);
    assert_eq!(ctl.jacobian_calls, 0);
}

#[test]
fn hybrid_column_converges() {
    let mut column = Column::new(4).bc("zmax", BcKind::Pressure, 0.7 * P_ATM_PA);
    column.operator.discretization = Discretization::Mfd;
    let mut solver = column.solver(0.9 * P_ATM_PA);
    assert_eq!(solver.solution().len(), 4 + solver.evaluator().mesh().num_faces(rf_mesh::Ownership::Owned));
    let mut ctl = NlsControl::new();
    let outcome = solver.solve(0.0, 500.0, 0, &mut ctl).expect("solve");
    assert!(outcome.is_converged(), "{}", outcome.status);
    let p = solver.cell_pressure();
    assert!(p.iter().all(|&v| v > 0.5 * P_ATM_PA && v < P_ATM_PA));
}

#[test]
fn picard_jacobian_converges_on_both_discretizations() {
    for discretization in [Discretization::Tpfa, Discretization::Mfd] {
        let mut column = Column::new(4).bc("zmax", BcKind::Pressure, 0.7 * P_ATM_PA);
        column.operator.discretization = discretization;
        column.nls.jacobian = JacobianStrategy::Picard;
        column.nls.max_iterations = 60;
        let mut solver = column.solver(0.9 * P_ATM_PA);
        let mut ctl = NlsControl::new();
        let outcome = solver.solve(0.0, 500.0, 0, &mut ctl).expect("solve");
        assert!(outcome.is_converged(), "{discretization:?}: {}", outcome.status);
        assert!(ctl.jacobian_assemblies >= 1);
        let p = solver.cell_pressure();
        assert!(p.iter().all(|&v| v > 0.5 * P_ATM_PA && v < P_ATM_PA), "{discretization:?}");
    }
}

#[test]
fn analytic_jacobian_requires_two_point_operator() {
    let mut column = Column::new(3);
    column.operator.discretization = Discretization::Mfd;
    column.nls.jacobian = JacobianStrategy::Analytic;
    match column.evaluator() {
        Err(err @ SolverError::OperatorMismatch { .. }) => assert!(err.is_fatal()),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("analytic Jacobian accepted an MFD operator"),
    }
}

#[test]
fn clipped_steps_bound_saturation_change() {
    let mut column = Column::new(4).bc("zmax", BcKind::Pressure, 0.3 * P_ATM_PA);
    column.nls.clip_saturation_step = true;
    column.nls.max_saturation_change = 0.05;
    column.nls.max_iterations = 50;
    let mut solver = column.solver(0.95 * P_ATM_PA);
    let s_old = solver.evaluator().saturations(solver.pressure_n().as_slice());
    let mut ctl = NlsControl::new();
    let outcome = solver.solve(0.0, 1000.0, 0, &mut ctl).expect("solve");
    assert!(outcome.is_converged(), "{}", outcome.status);
    assert!(ctl.iterations_taken >= 1);
    assert!(ctl.saturation_clips > 0);
    assert!(outcome.function_evaluations >= ctl.iterations_taken + 1);

    // each Newton update is bounded, so the step is bounded by their count
    let s_new = solver.evaluator().saturations(solver.cell_pressure().as_slice());
    let bound = 0.05 * ctl.iterations_taken as f64 + 1e-9;
    for c in 0..4 {
        let ds = (s_new[c] - s_old[c]).abs();
        assert!(ds <= bound, "cell {c}: {ds} > {bound}");
    }
}

#[test]
fn reversed_interval_is_rejected() {
    let mut solver = Column::new(4).solver(0.9 * P_ATM_PA);
    let before = solver.solution().clone();
    let mut ctl = NlsControl::new();
    match solver.solve(100.0, 50.0, 1, &mut ctl) {
        Err(err @ SolverError::InvalidInterval { .. }) => assert!(err.is_fatal()),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(outcome) => panic!("reversed interval solved: {}", outcome.status),
    }
    assert_eq!(ctl.function_evaluations, 0);
    assert_eq!(solver.evaluator().residual_evaluations(), 0);
    assert_eq!(solver.solution(), &before);
}

#[test]
fn nan_update_gives_nan_error_norm() {
    let solver = Column::new(4).solver(0.9 * P_ATM_PA);
    let u = solver.cell_pressure();
    let mut du = DVector::from_element(4, 10.0);
    assert!(solver.error_norm(&u, &du).is_finite());
    du[2] = f64::NAN;
    assert!(solver.error_norm(&u, &du).is_nan());
}

#[test]
fn iterative_linear_solver_reaches_the_same_state() {
    let column = Column::new(5).bc("zmax", BcKind::Pressure, 0.7 * P_ATM_PA);
    let mut direct = column.solver(0.9 * P_ATM_PA);
    let mut iterative = column
        .solver(0.9 * P_ATM_PA)
        .with_linear_solver(build_linear_solver(LinearSolverKind::BiCgStab, 1e-12, 200));

    let mut ctl = NlsControl::new();
    let a = direct.solve(0.0, 300.0, 0, &mut ctl).expect("direct solve");
    let mut ctl = NlsControl::new();
    let b = iterative.solve(0.0, 300.0, 0, &mut ctl).expect("iterative solve");
    assert!(a.is_converged(), "{}", a.status);
    assert!(b.is_converged(), "{}", b.status);
    let diff = (direct.cell_pressure() - iterative.cell_pressure()).amax();
    assert!(diff < 10.0, "pressures differ by {diff} Pa");
}

#[test]
fn correction_hook_limits_saturation_change() {
    let mut column = Column::new(3);
    column.nls.max_saturation_change = 0.05;
    let solver = column.solver(0.95 * P_ATM_PA);
    let u = solver.solution().clone();
    let target = 0.3 * P_ATM_PA;
    let mut du = u.map(|p| p - target);
    assert!(solver.modify_correction(1.0, &u, &mut du));

    let s0 = solver.evaluator().saturations(u.as_slice());
    let next = &u - &du;
    let s1 = solver.evaluator().saturations(next.as_slice());
    for c in 0..3 {
        assert!((s1[c] - s0[c]).abs() <= 0.05 + 1e-9, "cell {c}");
        assert!(next[c] > target);
    }

    let mut small = DVector::from_element(u.len(), 1.0);
    assert!(!solver.modify_correction(1.0, &u, &mut small));
    assert!(small.iter().all(|&v| v == 1.0));
}
