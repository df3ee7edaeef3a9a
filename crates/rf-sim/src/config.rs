//! YAML problem description.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use rf_core::constants::{G0_MPS2, P_ATM_PA};
use rf_core::units::{kgpm3, mps2, pa, pa_s};
use rf_mesh::{BoxMeshBuilder, MeshResult, UnstructuredMesh};
use rf_operator::{BcSpec, FluidProperties, OperatorConfig, PermTensor, SourceSpec};
use rf_solver::{Accumulation, ErrorControl, NlsConfig};
use rf_wrm::WrmSpec;
use serde::{Deserialize, Serialize};

use crate::controller::TimeStepping;
use crate::{SimError, SimResult};

const AXES: [&str; 3] = ["x", "y", "z"];

/// Axis-aligned box `[lo, hi]`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RegionConfig {
    pub name: String,
    pub lo: Vec<f64>,
    pub hi: Vec<f64>,
}

/// Structured box mesh with optional named regions.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MeshConfig {
    pub lo: Vec<f64>,
    pub hi: Vec<f64>,
    pub cells: Vec<usize>,
    #[serde(default)]
    pub cell_regions: Vec<RegionConfig>,
    #[serde(default)]
    pub face_regions: Vec<RegionConfig>,
}

impl MeshConfig {
    pub fn dimension(&self) -> usize {
        self.cells.len()
    }

    pub fn build(&self) -> MeshResult<UnstructuredMesh> {
        let mut builder = BoxMeshBuilder::new(&self.lo, &self.hi, &self.cells);
        for r in &self.cell_regions {
            builder = builder.cell_region(r.name.clone(), &r.lo, &r.hi);
        }
        for r in &self.face_regions {
            builder = builder.face_region(r.name.clone(), &r.lo, &r.hi);
        }
        builder.build()
    }

    /// Cell region names the built mesh will know.
    pub fn cell_region_names(&self) -> BTreeSet<String> {
        std::iter::once("All".to_string())
            .chain(self.cell_regions.iter().map(|r| r.name.clone()))
            .collect()
    }

    /// Face region names the built mesh will know.
    pub fn face_region_names(&self) -> BTreeSet<String> {
        AXES.iter()
            .take(self.dimension())
            .flat_map(|a| [format!("{a}min"), format!("{a}max")])
            .chain(self.face_regions.iter().map(|r| r.name.clone()))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FluidConfig {
    /// [kg/m³]
    pub density: f64,
    /// [Pa s]
    pub viscosity: f64,
    /// [m/s²], acting along the negative last axis.
    pub gravity: f64,
    /// [Pa]
    pub atmospheric_pressure: f64,
}

impl Default for FluidConfig {
    fn default() -> Self {
        let water = FluidProperties::water();
        Self {
            density: water.rho(),
            viscosity: water.mu(),
            gravity: G0_MPS2,
            atmospheric_pressure: P_ATM_PA,
        }
    }
}

impl FluidConfig {
    pub fn properties(&self) -> FluidProperties {
        FluidProperties {
            density: kgpm3(self.density),
            viscosity: pa_s(self.viscosity),
            gravity: mps2(self.gravity),
            p_atm: pa(self.atmospheric_pressure),
        }
    }
}

/// Rock and retention properties of one cell region.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MaterialConfig {
    pub region: String,
    pub porosity: f64,
    /// [m²]
    pub permeability: PermTensor,
    pub retention: WrmSpec,
    /// [1/m], only used by saturated storage.
    #[serde(default)]
    pub specific_storage: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InitialCondition {
    Uniform {
        pressure: f64,
    },
    /// Hydrostatic pressure with atmospheric pressure at `water_table` [m].
    Hydrostatic {
        water_table: f64,
    },
}

/// Discretization and physics options of the Richards model.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RichardsOptions {
    pub operator: OperatorConfig,
    pub accumulation: Accumulation,
    pub error_control: ErrorControl,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProblemConfig {
    pub mesh: MeshConfig,
    #[serde(default)]
    pub fluid: FluidConfig,
    pub materials: Vec<MaterialConfig>,
    #[serde(default)]
    pub boundary_conditions: Vec<BcSpec>,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
    pub initial: InitialCondition,
    #[serde(default)]
    pub solver: NlsConfig,
    #[serde(default)]
    pub richards: RichardsOptions,
    pub time: TimeStepping,
    /// Where `run` writes its summary and snapshots.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl ProblemConfig {
    pub fn from_yaml(text: &str) -> SimResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: &Path) -> SimResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&text)?;
        tracing::debug!(path = %path.display(), "problem loaded");
        Ok(config)
    }
}
