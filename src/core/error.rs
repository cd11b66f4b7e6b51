//! Error types for the voxel core

use glam::IVec3;
use thiserror::Error;

use crate::voxel::chunk::ChunkCoord;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("chunk {0:?} is already loaded")]
    AlreadyLoaded(ChunkCoord),

    #[error("chunk {0:?} is not loaded")]
    NotLoaded(ChunkCoord),

    #[error("voxel {local} in chunk {coord:?} is out of range")]
    OutOfRange { coord: ChunkCoord, local: IVec3 },

    #[error("stale or invalid handle")]
    InvalidHandle,

    #[error("body capacity exceeded ({capacity} bodies)")]
    CapacityExceeded { capacity: usize },

    #[error("physics system is not initialized")]
    NotInitialized,

    #[error("malformed voxel data: {0}")]
    MalformedVoxelData(String),

    #[error("background job failed: {0}")]
    JobFailed(String),

    #[error("material palette is full")]
    PaletteFull,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
