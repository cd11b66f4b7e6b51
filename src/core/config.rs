//! Engine configuration loaded from JSON

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;

/// Voxel world configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Voxels per chunk side (power of two, at least 4)
    pub chunk_size: u32,
    /// Finest HierarchyMask block edge in voxels
    pub mask_block_size: u32,
    /// Maximum number of recycled chunks kept by the pool
    pub pool_capacity: usize,
    /// Streaming radius in chunks around each point of interest
    pub streaming_radius: i32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32,
            mask_block_size: 4,
            pool_capacity: 256,
            streaming_radius: 4,
        }
    }
}

/// Physics synchronisation configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Body budget of the simulation
    pub max_bodies: usize,
    /// Simulation step in seconds
    pub fixed_timestep: f32,
    /// Cap on steps per update to avoid a death spiral after a long frame
    pub max_substeps: u32,
    pub gravity: [f32; 3],
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            max_bodies: 4096,
            fixed_timestep: 1.0 / 60.0,
            max_substeps: 10,
            gravity: [0.0, -9.81, 0.0],
        }
    }
}

/// Mesh/collider worker configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Worker threads; 0 runs jobs inline on the submitting thread
    pub worker_threads: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self { worker_threads: 2 }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub world: WorldConfig,
    pub physics: PhysicsConfig,
    pub jobs: JobConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check invariants the rest of the crate relies on
    pub fn validate(&self) -> Result<()> {
        let w = &self.world;
        if w.chunk_size < 4 || !w.chunk_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "chunk_size must be a power of two >= 4, got {}",
                w.chunk_size
            )));
        }
        if w.chunk_size > 256 {
            return Err(Error::Config(format!(
                "chunk_size must be <= 256, got {}",
                w.chunk_size
            )));
        }
        if w.mask_block_size < 2
            || !w.mask_block_size.is_power_of_two()
            || w.mask_block_size > w.chunk_size
        {
            return Err(Error::Config(format!(
                "mask_block_size must be a power of two in 2..={}, got {}",
                w.chunk_size, w.mask_block_size
            )));
        }
        if w.streaming_radius < 0 {
            return Err(Error::Config("streaming_radius must be >= 0".into()));
        }

        let p = &self.physics;
        if !(p.fixed_timestep > 0.0) {
            return Err(Error::Config("fixed_timestep must be positive".into()));
        }
        if p.max_substeps == 0 {
            return Err(Error::Config("max_substeps must be >= 1".into()));
        }
        Ok(())
    }
}
