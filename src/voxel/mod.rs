//! Voxel data structures and operations

pub mod palette;
pub mod hierarchy;
pub mod chunk;
pub mod edit;
pub mod terrain;
pub mod streaming;
pub mod world;
pub mod object;
pub mod destruction;

pub use palette::{MaterialEntry, MaterialId, MaterialPalette, PhysicalMaterial, SceneMaterial, EMPTY};
pub use hierarchy::HierarchyMask;
pub use chunk::{Chunk, ChunkCoord, Face, NeighborFaces, VoxelGrid};
pub use edit::{ChunkInvalidator, DirtyKind, EditOp};
pub use terrain::{EmptyTerrain, FlatTerrain, NoiseTerrain, TerrainParams, TerrainSource};
pub use streaming::{ChunkPool, ChunkPoolStats, JobScheduler};
pub use world::{PhysicsSyncStats, TickStats, VoxelWorld, WorldStats};
pub use object::{EntityKind, ObjectInstance, ObjectLibrary, VoxelEntity, VoxelObject};
pub use destruction::{analyze_connectivity, split_entity, validate_structural_integrity, Island};
