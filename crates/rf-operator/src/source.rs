//! Volumetric mass sources.

use nalgebra::DVector;
use rf_mesh::{Mesh, Ownership};
use serde::{Deserialize, Serialize};

use crate::OperatorResult;
use crate::bc::BcFunction;

/// Mass source density [kg/(s m³)] on a cell region. Positive injects water.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SourceSpec {
    pub region: String,
    pub function: BcFunction,
}

/// Sources resolved to cells; overlapping regions add up.
pub struct Sources {
    terms: Vec<(Vec<usize>, BcFunction)>,
    n_cells: usize,
}

impl Sources {
    pub fn new(mesh: &dyn Mesh, specs: &[SourceSpec]) -> OperatorResult<Self> {
        let n_args = 1 + mesh.space_dimension();
        let n_cells = mesh.num_cells(Ownership::Owned);
        let mut terms = Vec::with_capacity(specs.len());
        for spec in specs {
            spec.function.validate(n_args)?;
            let cells = mesh
                .region_cells(&spec.region)?
                .iter()
                .copied()
                .filter(|&c| c < n_cells)
                .collect();
            terms.push((cells, spec.function.clone()));
        }
        Ok(Self { terms, n_cells })
    }

    pub fn empty(mesh: &dyn Mesh) -> Self {
        Self {
            terms: Vec::new(),
            n_cells: mesh.num_cells(Ownership::Owned),
        }
    }

    /// Integrated source [kg/s] per owned cell at time `t`.
    pub fn compute(&self, t: f64, mesh: &dyn Mesh) -> DVector<f64> {
        let dim = mesh.space_dimension();
        let mut q = DVector::zeros(self.n_cells);
        let mut args = vec![t; 1 + dim];
        for (cells, function) in &self.terms {
            for &c in cells {
                let xc = mesh.cell_centroid(c);
                args[1..].copy_from_slice(&xc.as_slice()[..dim]);
                q[c] += function.eval(&args) * mesh.cell_volume(c);
            }
        }
        q
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_mesh::BoxMeshBuilder;

    #[test]
    fn sources_integrate_over_volume() {
        let mesh = BoxMeshBuilder::new(&[0.0, 0.0], &[2.0, 1.0], &[2, 1])
            .cell_region("left", &[0.0, 0.0], &[1.0, 1.0])
            .build()
            .unwrap();
        let specs = vec![
            SourceSpec {
                region: "left".into(),
                function: BcFunction::Constant { value: 3.0 },
            },
            SourceSpec {
                region: "All".into(),
                function: BcFunction::Tabular {
                    times: vec![0.0, 1.0],
                    values: vec![0.0, 1.0],
                },
            },
        ];
        let sources = Sources::new(&mesh, &specs).unwrap();
        let q = sources.compute(0.5, &mesh);
        assert!((q[0] - 3.5).abs() < 1e-14);
        assert!((q[1] - 0.5).abs() < 1e-14);
    }
}
