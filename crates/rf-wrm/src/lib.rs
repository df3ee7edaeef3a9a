//! Water retention models (WRM) for variably saturated flow.
//!
//! A water retention model relates capillary pressure `pc = p_atm - p` to
//! liquid saturation and relative permeability. Models are attached to mesh
//! regions through a [`WrmRegistry`], which resolves a per-cell lookup once
//! at setup.

pub mod brooks_corey;
pub mod error;
pub mod model;
pub mod registry;
pub mod van_genuchten;

pub use brooks_corey::BrooksCorey;
pub use error::{WrmError, WrmResult};
pub use model::Wrm;
pub use registry::{CellWrmMap, WrmRegistry, WrmSpec};
pub use van_genuchten::VanGenuchten;
