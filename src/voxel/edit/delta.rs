//! Edit operations in world voxel coordinates.

use glam::IVec3;
use serde::{Deserialize, Serialize};

use crate::voxel::chunk::ChunkCoord;
use crate::voxel::palette::{MaterialId, EMPTY};

/// Type of edit operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EditOp {
    /// Set a single voxel to a material
    SetVoxel { position: IVec3, material: MaterialId },
    /// Clear a single voxel (make empty)
    ClearVoxel { position: IVec3 },
    /// Fill an inclusive box of voxels with a material
    FillRegion { min: IVec3, max: IVec3, material: MaterialId },
    /// Clear an inclusive box of voxels
    ClearRegion { min: IVec3, max: IVec3 },
}

impl EditOp {
    /// Inclusive voxel bounds touched by this edit
    pub fn bounds(&self) -> (IVec3, IVec3) {
        match *self {
            EditOp::SetVoxel { position, .. } | EditOp::ClearVoxel { position } => (position, position),
            EditOp::FillRegion { min, max, .. } | EditOp::ClearRegion { min, max } => {
                (min.min(max), min.max(max))
            }
        }
    }

    /// Material written by this edit
    pub fn material(&self) -> MaterialId {
        match *self {
            EditOp::SetVoxel { material, .. } | EditOp::FillRegion { material, .. } => material,
            EditOp::ClearVoxel { .. } | EditOp::ClearRegion { .. } => EMPTY,
        }
    }

    /// Every voxel position touched, z-major then y then x
    pub fn positions(&self) -> impl Iterator<Item = IVec3> {
        let (min, max) = self.bounds();
        (min.z..=max.z).flat_map(move |z| {
            (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| IVec3::new(x, y, z)))
        })
    }

    /// Chunks overlapped by this edit, sorted
    pub fn affected_chunks(&self, chunk_size: u32) -> Vec<ChunkCoord> {
        let (min, max) = self.bounds();
        let (lo, _) = ChunkCoord::from_voxel(min, chunk_size);
        let (hi, _) = ChunkCoord::from_voxel(max, chunk_size);

        let mut chunks = Vec::new();
        for x in lo.x..=hi.x {
            for y in lo.y..=hi.y {
                for z in lo.z..=hi.z {
                    chunks.push(ChunkCoord::new(x, y, z));
                }
            }
        }
        chunks.sort();
        chunks
    }
}
