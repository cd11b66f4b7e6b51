//! Voxcore - chunked voxel world with streaming, meshing, collider
//! synthesis and physics synchronisation

pub mod core;
pub mod math;
pub mod voxel;
pub mod mesh;
pub mod physics;
pub mod render;
