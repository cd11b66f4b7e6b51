//! Voxel edit operations and the dirty tracking they drive.

pub mod delta;
pub mod invalidator;

pub use delta::EditOp;
pub use invalidator::{boundary_faces, ChunkInvalidator, DirtyKind};
