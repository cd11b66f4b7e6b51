//! Terrain sources that populate freshly loaded chunks

use glam::IVec3;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use crate::voxel::chunk::{ChunkCoord, VoxelGrid};
use crate::voxel::palette::MaterialId;

/// Fills the voxel grid of a chunk that is being loaded.
///
/// The grid is all-empty on entry. Implementations must be deterministic for
/// a given coordinate so that unload + reload reproduces the same chunk.
pub trait TerrainSource: Send + Sync {
    fn generate(&self, coord: ChunkCoord, grid: &mut VoxelGrid);
}

/// Leaves every chunk empty
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyTerrain;

impl TerrainSource for EmptyTerrain {
    fn generate(&self, _coord: ChunkCoord, _grid: &mut VoxelGrid) {}
}

/// Solid below a fixed world height
#[derive(Clone, Copy, Debug)]
pub struct FlatTerrain {
    /// Voxels with world y < height are solid
    pub height: i32,
    pub material: MaterialId,
}

impl TerrainSource for FlatTerrain {
    fn generate(&self, coord: ChunkCoord, grid: &mut VoxelGrid) {
        let size = grid.size();
        let base_y = coord.y.saturating_mul(size as i32);
        let top = self.height.saturating_sub(base_y).clamp(0, size as i32) as u32;
        for z in 0..size {
            for y in 0..top {
                for x in 0..size {
                    grid.set(x, y, z, self.material);
                }
            }
        }
    }
}

/// Parameters controlling terrain generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerrainParams {
    pub seed: u32,
    pub scale: f32,        // Horizontal scale (larger = smoother)
    pub height_scale: f32, // Vertical scale (max height)
    pub octaves: u32,      // FBM octaves (detail levels)
    pub persistence: f32,  // FBM persistence (0.5 typical)
    pub lacunarity: f32,   // FBM lacunarity (2.0 typical)
    /// Material of the top voxel layer
    pub surface_material: MaterialId,
    /// Material of everything below the surface layer
    pub subsurface_material: MaterialId,
    /// Thickness of the surface layer in voxels
    pub surface_depth: u32,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            scale: 100.0,
            height_scale: 32.0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            surface_material: 2,
            subsurface_material: 1,
            surface_depth: 1,
        }
    }
}

/// Heightfield terrain using fractal Brownian motion (FBM)
pub struct NoiseTerrain {
    params: TerrainParams,
    noise: Fbm<Perlin>,
}

impl NoiseTerrain {
    pub fn new(params: TerrainParams) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence as f64)
            .set_lacunarity(params.lacunarity as f64);

        Self { params, noise }
    }

    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Get terrain height at world position (x, z)
    pub fn height_at(&self, x: f32, z: f32) -> f32 {
        let nx = (x / self.params.scale) as f64;
        let nz = (z / self.params.scale) as f64;

        // [-1, 1] -> [0, height_scale]
        let normalized = (self.noise.get([nx, nz]) + 1.0) / 2.0;
        (normalized.clamp(0.0, 1.0) * self.params.height_scale as f64) as f32
    }
}

impl TerrainSource for NoiseTerrain {
    fn generate(&self, coord: ChunkCoord, grid: &mut VoxelGrid) {
        let size = grid.size();
        let s = size as i32;
        let base = IVec3::new(
            coord.x.saturating_mul(s),
            coord.y.saturating_mul(s),
            coord.z.saturating_mul(s),
        );

        // Chunk entirely above the highest possible surface
        if base.y as f32 >= self.params.height_scale {
            return;
        }

        for z in 0..size {
            for x in 0..size {
                let wx = base.x.saturating_add(x as i32) as f32 + 0.5;
                let wz = base.z.saturating_add(z as i32) as f32 + 0.5;
                let surface = self.height_at(wx, wz).floor() as i32;

                for y in 0..size {
                    let wy = base.y.saturating_add(y as i32);
                    if wy > surface {
                        break;
                    }
                    let material = if surface.saturating_sub(wy) < self.params.surface_depth as i32 {
                        self.params.surface_material
                    } else {
                        self.params.subsurface_material
                    };
                    grid.set(x, y, z, material);
                }
            }
        }
    }
}
