//! Discrete Darcy operators for Richards flow.
//!
//! This crate turns a mesh, a permeability field, and water retention models
//! into a nonlinear flux-divergence operator. It provides:
//! - the operator skeleton (sparsity pattern + column coloring), built once
//!   per mesh with coarse/fine stencil extension and ghost-row exchange
//! - two-point (TPFA) and hybrid mimetic (MFD) discretizations behind the
//!   [`DiffusionOperator`] trait
//! - relative permeability policies, boundary conditions, and sources

pub mod bc;
pub mod coloring;
pub mod error;
pub mod fluid;
pub mod hybrid;
pub mod mfd;
pub mod operator;
pub mod relperm;
pub mod skeleton;
pub mod source;
pub mod tensor;
pub mod tpfa;

use std::sync::Arc;

use nalgebra::Matrix3;
use rf_mesh::Mesh;
use rf_wrm::CellWrmMap;

pub use bc::{BcFunction, BcKind, BcSpec, BoundaryConditions, FaceBc};
pub use coloring::ColumnColoring;
pub use error::{OperatorError, OperatorResult};
pub use fluid::FluidProperties;
pub use hybrid::MfdOperator;
pub use operator::{DiffusionOperator, Discretization, OperatorConfig};
pub use relperm::{RelPermField, RelPermMethod};
pub use skeleton::{OperatorSkeleton, SparsityPattern, UnknownLayout, build_op_skel};
pub use source::{SourceSpec, Sources};
pub use tensor::PermTensor;
pub use tpfa::TpfaOperator;

/// Builds the operator selected by `config.discretization`.
pub fn build_operator(
    mesh: Arc<dyn Mesh>,
    perm: &[Matrix3<f64>],
    wrm: CellWrmMap,
    fluid: FluidProperties,
    bcs: BoundaryConditions,
    config: &OperatorConfig,
) -> OperatorResult<Box<dyn DiffusionOperator>> {
    Ok(match config.discretization {
        Discretization::Tpfa => Box::new(TpfaOperator::new(mesh, perm, wrm, fluid, bcs, config)?),
        Discretization::Mfd => Box::new(MfdOperator::new(mesh, perm, wrm, fluid, bcs, config)?),
    })
}
