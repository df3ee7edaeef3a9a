//! Region-keyed water retention model registry.

use std::sync::Arc;

use rayon::prelude::*;
use rf_mesh::{Mesh, Ownership};
use serde::{Deserialize, Serialize};

use crate::model::Wrm;
use crate::{BrooksCorey, VanGenuchten, WrmError, WrmResult};

/// Serializable model description, as it appears in problem files.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum WrmSpec {
    VanGenuchten {
        /// Inverse air-entry pressure [1/Pa].
        alpha: f64,
        n: f64,
        #[serde(default)]
        residual_saturation: f64,
    },
    BrooksCorey {
        /// Air-entry capillary pressure [Pa].
        air_entry: f64,
        lambda: f64,
        #[serde(default)]
        residual_saturation: f64,
    },
}

impl WrmSpec {
    pub fn build(&self) -> WrmResult<Arc<dyn Wrm>> {
        Ok(match *self {
            WrmSpec::VanGenuchten {
                alpha,
                n,
                residual_saturation,
            } => Arc::new(VanGenuchten::new(alpha, n, residual_saturation)?),
            WrmSpec::BrooksCorey {
                air_entry,
                lambda,
                residual_saturation,
            } => Arc::new(BrooksCorey::new(air_entry, lambda, residual_saturation)?),
        })
    }
}

/// Models keyed by mesh region name, in insertion order.
#[derive(Default, Clone)]
pub struct WrmRegistry {
    entries: Vec<(String, Arc<dyn Wrm>)>,
}

impl WrmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: impl Into<String>, model: Arc<dyn Wrm>) -> &mut Self {
        self.entries.push((region.into(), model));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves the cell→model map. Every used cell must belong to exactly
    /// one registered region.
    pub fn cell_map(&self, mesh: &dyn Mesh) -> WrmResult<CellWrmMap> {
        let n_used = mesh.num_cells(Ownership::Used);
        let mut cell_model: Vec<Option<usize>> = vec![None; n_used];
        for (k, (region, _)) in self.entries.iter().enumerate() {
            for &c in mesh.region_cells(region)? {
                if let Some(prev) = cell_model[c] {
                    return Err(WrmError::OverlappingRegions {
                        cell: c,
                        first: self.entries[prev].0.clone(),
                        second: region.clone(),
                    });
                }
                cell_model[c] = Some(k);
            }
        }
        let cell_model = cell_model
            .into_iter()
            .enumerate()
            .map(|(c, m)| m.ok_or(WrmError::UncoveredCell { cell: c }))
            .collect::<WrmResult<Vec<_>>>()?;
        tracing::debug!(regions = self.entries.len(), cells = n_used, "resolved WRM cell map");
        Ok(CellWrmMap {
            models: self.entries.iter().map(|(_, m)| Arc::clone(m)).collect(),
            cell_model,
        })
    }
}

/// Per-cell model lookup built once at setup.
#[derive(Clone)]
pub struct CellWrmMap {
    models: Vec<Arc<dyn Wrm>>,
    cell_model: Vec<usize>,
}

impl CellWrmMap {
    /// Same model on every cell.
    pub fn uniform(model: Arc<dyn Wrm>, n_cells: usize) -> Self {
        Self {
            models: vec![model],
            cell_model: vec![0; n_cells],
        }
    }

    pub fn len(&self) -> usize {
        self.cell_model.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_model.is_empty()
    }

    pub fn model(&self, c: usize) -> &dyn Wrm {
        self.models[self.cell_model[c]].as_ref()
    }

    /// Saturation for a slice of per-cell capillary pressures.
    pub fn saturations(&self, pc: &[f64]) -> Vec<f64> {
        pc.par_iter()
            .enumerate()
            .map(|(c, &p)| self.model(c).saturation(p))
            .collect()
    }

    pub fn k_relatives(&self, pc: &[f64]) -> Vec<f64> {
        pc.par_iter()
            .enumerate()
            .map(|(c, &p)| self.model(c).k_relative(p))
            .collect()
    }
}
