//! rf-sim: problem files, assembly, and the outer timestep loop.
//!
//! A run goes YAML -> [`ProblemConfig`] -> [`validate_problem`] ->
//! [`build_problem`] -> [`run_richards`]. The Newton solve of each step lives
//! in `rf-solver`; this crate decides step sizes, retries failed steps with a
//! smaller `dt`, and records the results.

pub mod config;
pub mod controller;
pub mod error;
pub mod problem;
pub mod run;
pub mod validate;

pub use config::{
    FluidConfig, InitialCondition, MaterialConfig, MeshConfig, ProblemConfig, RegionConfig,
    RichardsOptions,
};
pub use controller::{StepController, TimeStepping};
pub use error::{SimError, SimResult};
pub use problem::{Problem, build_problem};
pub use run::{RunRecord, RunSummary, Snapshot, StepReport, run_richards, save_run};
pub use validate::{ValidationError, validate_problem};
