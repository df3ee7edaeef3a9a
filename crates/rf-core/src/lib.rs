//! rf-core: shared foundation for the Richards flow workspace.
//!
//! Contains:
//! - units (uom SI types + constructors, atmospheric pressure, gravity)
//! - numeric (Real, field checks, located maxima, owned norms)
//! - comm (SPMD communicator with collective reductions)
//! - timing (opt-in accumulating timers for the nonlinear solve)
//! - error (shared error types)

pub mod comm;
pub mod error;
pub mod numeric;
pub mod timing;
pub mod units;

// Re-exports: nice ergonomics for downstream crates
pub use comm::{Communicator, SerialComm};
pub use error::{RfError, RfResult};
pub use numeric::*;
pub use units::*;
