//! Read-only mesh service for the Richards flow solver.
//!
//! The solver only ever queries a mesh through the [`Mesh`] trait: entity
//! counts, face/cell adjacency, geometry, refinement level, and named region
//! membership. [`UnstructuredMesh`] stores these arrays flat, and
//! [`BoxMeshBuilder`] generates one for logically rectangular domains.

pub mod boxmesh;
pub mod error;
pub mod mesh;
pub mod unstructured;

pub use boxmesh::BoxMeshBuilder;
pub use error::{MeshError, MeshResult};
pub use mesh::{Mesh, Ownership, Point};
pub use unstructured::{MeshBuilder, UnstructuredMesh};
