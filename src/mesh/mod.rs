//! Triangle mesh generation from voxel data

pub mod vertex;
pub mod converter;

pub use vertex::MeshVertex;
pub use converter::{MeshConverter, MeshImportResult};
