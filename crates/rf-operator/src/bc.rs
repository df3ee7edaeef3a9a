//! Boundary conditions and their functions of space and time.

use rf_mesh::{Mesh, Ownership};
use serde::{Deserialize, Serialize};

use crate::fluid::FluidProperties;
use crate::{OperatorError, OperatorResult};

/// Scalar function of `(t, x, y, z)`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BcFunction {
    Constant {
        value: f64,
    },
    /// `y0 + grad . (args - x0)` where `args = (t, x, y, z)` truncated to
    /// the gradient length.
    Linear {
        y0: f64,
        gradient: Vec<f64>,
        #[serde(default)]
        x0: Option<Vec<f64>>,
    },
    /// Piecewise linear in time, constant outside the table.
    Tabular {
        times: Vec<f64>,
        values: Vec<f64>,
    },
}

impl BcFunction {
    /// Checks the function against the number of available arguments
    /// (`1 + space dimension`).
    pub fn validate(&self, n_args: usize) -> OperatorResult<()> {
        let bad = |what: &str| {
            Err(OperatorError::InvalidFunction {
                what: what.to_string(),
            })
        };
        match self {
            BcFunction::Constant { value } if !value.is_finite() => bad("non-finite constant"),
            BcFunction::Constant { .. } => Ok(()),
            BcFunction::Linear { gradient, x0, .. } => {
                if gradient.is_empty() {
                    return bad("at least one value required for the gradient vector");
                }
                if x0.as_ref().is_some_and(|x0| x0.len() != gradient.len()) {
                    return bad("mismatch of gradient and point dimensions");
                }
                if gradient.len() > n_args {
                    return bad("linear function expects a higher-dimensional argument");
                }
                Ok(())
            }
            BcFunction::Tabular { times, values } => {
                if times.is_empty() || times.len() != values.len() {
                    return bad("tabular function needs equally many (>0) times and values");
                }
                if times.windows(2).any(|w| !(w[1] > w[0])) {
                    return bad("tabular times must be strictly increasing");
                }
                Ok(())
            }
        }
    }

    /// Evaluates at `args = (t, x, y, z)`. Assumes [`BcFunction::validate`] passed.
    pub fn eval(&self, args: &[f64]) -> f64 {
        match self {
            BcFunction::Constant { value } => *value,
            BcFunction::Linear { y0, gradient, x0 } => {
                gradient.iter().enumerate().fold(*y0, |y, (j, g)| {
                    let origin = x0.as_ref().map_or(0.0, |x0| x0[j]);
                    y + g * (args[j] - origin)
                })
            }
            BcFunction::Tabular { times, values } => {
                let t = args[0];
                let last = times.len() - 1;
                if t <= times[0] {
                    return values[0];
                }
                if t >= times[last] {
                    return values[last];
                }
                let i = times.partition_point(|&ti| ti <= t) - 1;
                let w = (t - times[i]) / (times[i + 1] - times[i]);
                values[i] + w * (values[i + 1] - values[i])
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BcKind {
    /// Dirichlet liquid pressure [Pa].
    Pressure,
    /// Inward mass flux density [kg/(s m²)].
    MassFlux,
    /// Water-table elevation [m]; pressure is hydrostatic below it.
    StaticHead,
    /// Seepage face: outflow at atmospheric pressure, no inflow.
    Seepage,
}

/// One boundary condition as it appears in problem files.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BcSpec {
    pub region: String,
    pub kind: BcKind,
    #[serde(default)]
    pub function: Option<BcFunction>,
}

/// Boundary data for one face at the current time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FaceBc {
    /// No condition: zero flux.
    None,
    Pressure(f64),
    MassFlux(f64),
    Seepage,
}

struct ResolvedBc {
    kind: BcKind,
    faces: Vec<usize>,
    function: Option<BcFunction>,
}

/// Boundary conditions resolved to faces. Values are refreshed with
/// [`BoundaryConditions::compute`] before each residual evaluation.
pub struct BoundaryConditions {
    specs: Vec<ResolvedBc>,
    face_bc: Vec<FaceBc>,
    time: Option<f64>,
}

impl BoundaryConditions {
    pub fn none(mesh: &dyn Mesh) -> Self {
        Self {
            specs: Vec::new(),
            face_bc: vec![FaceBc::None; mesh.num_faces(Ownership::Used)],
            time: None,
        }
    }

    pub fn new(mesh: &dyn Mesh, specs: &[BcSpec]) -> OperatorResult<Self> {
        let n_faces = mesh.num_faces(Ownership::Used);
        let n_args = 1 + mesh.space_dimension();
        let mut owner: Vec<Option<&str>> = vec![None; n_faces];
        let mut resolved = Vec::with_capacity(specs.len());
        for spec in specs {
            let faces = mesh.region_faces(&spec.region).map_err(|e| {
                OperatorError::BoundaryCondition {
                    what: format!("{:?} condition: {e}", spec.kind),
                }
            })?;
            for &f in faces {
                if mesh.face_cells(f).1.is_some() {
                    return Err(OperatorError::BoundaryCondition {
                        what: format!("region '{}' contains interior face {f}", spec.region),
                    });
                }
                if let Some(prev) = owner[f] {
                    return Err(OperatorError::BoundaryCondition {
                        what: format!(
                            "face {f} is assigned by both '{prev}' and '{}'",
                            spec.region
                        ),
                    });
                }
                owner[f] = Some(spec.region.as_str());
            }
            match (&spec.function, spec.kind) {
                (None, BcKind::Seepage) => {}
                (None, kind) => {
                    return Err(OperatorError::BoundaryCondition {
                        what: format!("{kind:?} condition on '{}' needs a function", spec.region),
                    });
                }
                (Some(f), _) => f.validate(n_args)?,
            }
            resolved.push(ResolvedBc {
                kind: spec.kind,
                faces: faces.to_vec(),
                function: spec.function.clone(),
            });
        }
        tracing::debug!(conditions = resolved.len(), "boundary conditions resolved");
        Ok(Self {
            specs: resolved,
            face_bc: vec![FaceBc::None; n_faces],
            time: None,
        })
    }

    /// Refreshes face values at time `t`.
    pub fn compute(&mut self, t: f64, mesh: &dyn Mesh, fluid: &FluidProperties) {
        let dim = mesh.space_dimension();
        let mut args = vec![t; 1 + dim];
        for spec in &self.specs {
            for &f in &spec.faces {
                let xf = mesh.face_centroid(f);
                args[1..].copy_from_slice(&xf.as_slice()[..dim]);
                let value = spec.function.as_ref().map_or(0.0, |func| func.eval(&args));
                self.face_bc[f] = match spec.kind {
                    BcKind::Pressure => FaceBc::Pressure(value),
                    BcKind::MassFlux => FaceBc::MassFlux(value),
                    BcKind::StaticHead => {
                        let z = mesh.elevation(&xf);
                        FaceBc::Pressure(fluid.p_atm_pa() + fluid.rho() * fluid.g() * (value - z))
                    }
                    BcKind::Seepage => FaceBc::Seepage,
                };
            }
        }
        self.time = Some(t);
    }

    #[inline]
    pub fn face(&self, f: usize) -> FaceBc {
        self.face_bc[f]
    }

    /// Time of the last [`BoundaryConditions::compute`], if any.
    pub fn time(&self) -> Option<f64> {
        self.time
    }
}
