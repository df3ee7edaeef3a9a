//! Assembles a ready-to-run Richards solver from a validated problem.

use std::sync::Arc;

use nalgebra::{DVector, Matrix3};
use rf_core::Communicator;
use rf_mesh::{Mesh, Ownership};
use rf_operator::{BoundaryConditions, OperatorConfig, Sources, build_operator};
use rf_solver::{RichardsEvaluator, RichardsSolver, Storage};
use rf_wrm::WrmRegistry;

use crate::config::{InitialCondition, ProblemConfig};
use crate::validate::{ValidationError, validate_problem};
use crate::SimResult;

pub struct Problem {
    pub mesh: Arc<dyn Mesh>,
    pub solver: RichardsSolver,
}

impl Problem {
    pub fn num_cells(&self) -> usize {
        self.solver.evaluator().num_cells()
    }

    /// Cell saturations of the committed state.
    pub fn saturation(&self) -> Vec<f64> {
        self.solver
            .evaluator()
            .saturations(self.solver.pressure_n().as_slice())
    }

    /// Stored water mass of the committed state [kg].
    pub fn total_mass(&self) -> f64 {
        self.solver.evaluator().total_mass(self.solver.pressure_n())
    }
}

/// Per-cell rock properties, in material order of first match.
struct CellMaterials {
    permeability: Vec<Matrix3<f64>>,
    porosity: Vec<f64>,
    specific_storage: Vec<f64>,
}

fn cell_materials(config: &ProblemConfig, mesh: &dyn Mesh) -> SimResult<CellMaterials> {
    let n = mesh.num_cells(Ownership::Used);
    let dim = mesh.space_dimension();
    let mut owner: Vec<Option<usize>> = vec![None; n];
    for (i, m) in config.materials.iter().enumerate() {
        for &c in mesh.region_cells(&m.region)? {
            if let Some(prev) = owner[c] {
                return Err(ValidationError::InvalidValue {
                    field: format!("materials[{i}].region"),
                    value: m.region.clone(),
                    reason: format!("cell {c} is already covered by materials[{prev}]"),
                }
                .into());
            }
            owner[c] = Some(i);
        }
    }
    let mut out = CellMaterials {
        permeability: Vec::with_capacity(n),
        porosity: Vec::with_capacity(n),
        specific_storage: Vec::with_capacity(n),
    };
    for (c, m) in owner.into_iter().enumerate() {
        let Some(i) = m else {
            return Err(ValidationError::Missing {
                what: format!("material for cell {c}"),
            }
            .into());
        };
        let material = &config.materials[i];
        out.permeability.push(material.permeability.to_matrix(dim, c)?);
        out.porosity.push(material.porosity);
        out.specific_storage.push(material.specific_storage);
    }
    Ok(out)
}

/// Validates `config` and builds the mesh, operator, evaluator, and solver,
/// with the initial condition loaded as the committed state.
pub fn build_problem(config: &ProblemConfig, comm: Arc<dyn Communicator>) -> SimResult<Problem> {
    validate_problem(config)?;
    let mesh: Arc<dyn Mesh> = Arc::new(config.mesh.build()?);
    let fluid = config.fluid.properties();
    let materials = cell_materials(config, mesh.as_ref())?;

    let mut registry = WrmRegistry::new();
    for m in &config.materials {
        registry.insert(m.region.clone(), m.retention.build()?);
    }
    let wrm = registry.cell_map(mesh.as_ref())?;

    let bcs = BoundaryConditions::new(mesh.as_ref(), &config.boundary_conditions)?;
    let operator_config = OperatorConfig {
        compute_derivatives: config.solver.jacobian.needs_rel_perm_derivatives(),
        ..config.richards.operator
    };
    let operator = build_operator(
        mesh.clone(),
        &materials.permeability,
        wrm.clone(),
        fluid,
        bcs,
        &operator_config,
    )?;
    let sources = Sources::new(mesh.as_ref(), &config.sources)?;
    let storage = Storage {
        accumulation: config.richards.accumulation,
        porosity: materials.porosity,
        specific_storage: materials.specific_storage,
    };
    let evaluator = RichardsEvaluator::new(
        mesh.clone(),
        comm.as_ref(),
        operator,
        wrm,
        fluid,
        sources,
        storage,
        &config.solver,
    )?;
    let mut solver = RichardsSolver::new(evaluator, comm, config.solver.clone())?;
    solver.set_error_control(config.richards.error_control);

    let n = mesh.num_cells(Ownership::Owned);
    let initial = match config.initial {
        InitialCondition::Uniform { pressure } => DVector::from_element(n, pressure),
        InitialCondition::Hydrostatic { water_table } => DVector::from_fn(n, |c, _| {
            let z = mesh.elevation(&mesh.cell_centroid(c));
            fluid.p_atm_pa() + fluid.rho() * fluid.g() * (water_table - z)
        }),
    };
    solver.set_initial_pressure(&initial)?;
    tracing::info!(
        cells = n,
        unknowns = solver.evaluator().num_unknowns(),
        discretization = ?config.richards.operator.discretization,
        "problem assembled"
    );
    Ok(Problem { mesh, solver })
}
