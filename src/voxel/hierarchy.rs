//! HierarchyMask: multi-resolution occupancy summary over a chunk.
//!
//! Level 0 splits the chunk into cubic blocks of `block_size` voxels; each
//! following level doubles the block edge until one block covers the whole
//! chunk. Per block and level the mask keeps two bits:
//! - `occupied`: at least one voxel in the block is non-empty
//! - `full`: every voxel in the block is non-empty
//!
//! Level 0 additionally keeps a `uniform` bit (full and single material),
//! which lets the mesher skip block interiors.
//!
//! Edits recompute one level-0 block and then only the ancestors of that
//! block, so the cost of `update_voxel` is `block_size^3 + levels * 8`.

use super::palette::{MaterialId, EMPTY};

fn bit(words: &[u64], index: usize) -> bool {
    words[index >> 6] & (1u64 << (index & 63)) != 0
}

fn set_bit(words: &mut [u64], index: usize, value: bool) {
    let mask = 1u64 << (index & 63);
    if value {
        words[index >> 6] |= mask;
    } else {
        words[index >> 6] &= !mask;
    }
}

/// One resolution level of the mask
#[derive(Clone, Debug)]
struct MaskLevel {
    block_size: u32,
    blocks_per_side: u32,
    occupied: Vec<u64>,
    full: Vec<u64>,
}

impl MaskLevel {
    fn new(block_size: u32, chunk_size: u32) -> Self {
        let blocks_per_side = chunk_size / block_size;
        let count = (blocks_per_side * blocks_per_side * blocks_per_side) as usize;
        let words = count.div_ceil(64);
        Self {
            block_size,
            blocks_per_side,
            occupied: vec![0; words],
            full: vec![0; words],
        }
    }

    #[inline]
    fn index(&self, bx: u32, by: u32, bz: u32) -> usize {
        (bx + by * self.blocks_per_side + bz * self.blocks_per_side * self.blocks_per_side) as usize
    }
}

/// Sparse occupancy summary for one chunk
#[derive(Clone, Debug)]
pub struct HierarchyMask {
    chunk_size: u32,
    levels: Vec<MaskLevel>,
    /// Level-0 blocks that are full of a single material
    uniform: Vec<u64>,
}

impl HierarchyMask {
    /// Create an all-empty mask
    ///
    /// `chunk_size` and `block_size` must be powers of two with
    /// `block_size <= chunk_size` (enforced by `EngineConfig::validate`).
    pub fn new(chunk_size: u32, block_size: u32) -> Self {
        debug_assert!(chunk_size.is_power_of_two() && block_size.is_power_of_two());
        debug_assert!(block_size <= chunk_size);

        let mut levels = Vec::new();
        let mut size = block_size;
        while size <= chunk_size {
            levels.push(MaskLevel::new(size, chunk_size));
            size *= 2;
        }
        let uniform = vec![0; levels[0].occupied.len()];

        Self {
            chunk_size,
            levels,
            uniform,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Block edge in voxels at `level`
    pub fn block_size(&self, level: usize) -> u32 {
        self.levels[level].block_size
    }

    pub fn blocks_per_side(&self, level: usize) -> u32 {
        self.levels[level].blocks_per_side
    }

    pub fn is_occupied(&self, level: usize, bx: u32, by: u32, bz: u32) -> bool {
        let l = &self.levels[level];
        bit(&l.occupied, l.index(bx, by, bz))
    }

    pub fn is_full(&self, level: usize, bx: u32, by: u32, bz: u32) -> bool {
        let l = &self.levels[level];
        bit(&l.full, l.index(bx, by, bz))
    }

    /// Level-0 block is full of one material
    pub fn is_uniform(&self, bx: u32, by: u32, bz: u32) -> bool {
        bit(&self.uniform, self.levels[0].index(bx, by, bz))
    }

    /// Level-0 block containing voxel `(x, y, z)` has no solid voxel
    #[inline]
    pub fn is_block_empty_at(&self, x: u32, y: u32, z: u32) -> bool {
        let s = self.levels[0].block_size;
        !self.is_occupied(0, x / s, y / s, z / s)
    }

    /// Whole chunk is empty
    pub fn is_empty(&self) -> bool {
        !self.is_occupied(self.levels.len() - 1, 0, 0, 0)
    }

    /// Whole chunk is solid
    pub fn is_solid(&self) -> bool {
        self.is_full(self.levels.len() - 1, 0, 0, 0)
    }

    /// Number of occupied blocks at `level`
    pub fn occupied_count(&self, level: usize) -> u32 {
        self.levels[level].occupied.iter().map(|w| w.count_ones()).sum()
    }

    /// Reset to all-empty without reallocating
    pub fn clear(&mut self) {
        for level in &mut self.levels {
            level.occupied.fill(0);
            level.full.fill(0);
        }
        self.uniform.fill(0);
    }

    /// Recompute every level from dense voxel data (x-fastest order)
    pub fn rebuild(&mut self, voxels: &[MaterialId]) {
        let per_side = self.levels[0].blocks_per_side;
        for bz in 0..per_side {
            for by in 0..per_side {
                for bx in 0..per_side {
                    self.recompute_base_block(voxels, bx, by, bz);
                }
            }
        }
        for level in 1..self.levels.len() {
            let per_side = self.levels[level].blocks_per_side;
            for bz in 0..per_side {
                for by in 0..per_side {
                    for bx in 0..per_side {
                        self.recompute_parent(level, bx, by, bz);
                    }
                }
            }
        }
    }

    /// Incrementally update after voxel `(x, y, z)` changed
    pub fn update_voxel(&mut self, voxels: &[MaterialId], x: u32, y: u32, z: u32) {
        let s = self.levels[0].block_size;
        let (mut bx, mut by, mut bz) = (x / s, y / s, z / s);
        self.recompute_base_block(voxels, bx, by, bz);

        for level in 1..self.levels.len() {
            bx /= 2;
            by /= 2;
            bz /= 2;
            self.recompute_parent(level, bx, by, bz);
        }
    }

    fn recompute_base_block(&mut self, voxels: &[MaterialId], bx: u32, by: u32, bz: u32) {
        let size = self.chunk_size as usize;
        let s = self.levels[0].block_size;
        let (x0, y0, z0) = ((bx * s) as usize, (by * s) as usize, (bz * s) as usize);

        let first = voxels[x0 + y0 * size + z0 * size * size];
        let mut any = false;
        let mut all = true;
        let mut same = true;

        for z in z0..z0 + s as usize {
            for y in y0..y0 + s as usize {
                let row = y * size + z * size * size;
                for &m in &voxels[row + x0..row + x0 + s as usize] {
                    if m == EMPTY {
                        all = false;
                    } else {
                        any = true;
                    }
                    if m != first {
                        same = false;
                    }
                }
            }
        }

        let level = &mut self.levels[0];
        let index = level.index(bx, by, bz);
        set_bit(&mut level.occupied, index, any);
        set_bit(&mut level.full, index, all);
        set_bit(&mut self.uniform, index, all && same);
    }

    fn recompute_parent(&mut self, level: usize, bx: u32, by: u32, bz: u32) {
        let (lower, upper) = self.levels.split_at_mut(level);
        let child = &lower[level - 1];
        let parent = &mut upper[0];

        let mut any = false;
        let mut all = true;
        for dz in 0..2 {
            for dy in 0..2 {
                for dx in 0..2 {
                    let ci = child.index(bx * 2 + dx, by * 2 + dy, bz * 2 + dz);
                    any |= bit(&child.occupied, ci);
                    all &= bit(&child.full, ci);
                }
            }
        }

        let index = parent.index(bx, by, bz);
        set_bit(&mut parent.occupied, index, any);
        set_bit(&mut parent.full, index, all);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    fn index(size: u32, x: u32, y: u32, z: u32) -> usize {
        (x + y * size + z * size * size) as usize
    }

    /// Brute-force check of every bit at every level against the voxels
    fn assert_matches_voxels(mask: &HierarchyMask, voxels: &[MaterialId]) {
        let size = mask.chunk_size();
        for level in 0..mask.level_count() {
            let bs = mask.block_size(level);
            let per_side = mask.blocks_per_side(level);
            for bz in 0..per_side {
                for by in 0..per_side {
                    for bx in 0..per_side {
                        let mut any = false;
                        let mut all = true;
                        for z in bz * bs..(bz + 1) * bs {
                            for y in by * bs..(by + 1) * bs {
                                for x in bx * bs..(bx + 1) * bs {
                                    let solid = voxels[index(size, x, y, z)] != EMPTY;
                                    any |= solid;
                                    all &= solid;
                                }
                            }
                        }
                        assert_eq!(mask.is_occupied(level, bx, by, bz), any, "occupied L{level} ({bx},{by},{bz})");
                        assert_eq!(mask.is_full(level, bx, by, bz), all, "full L{level} ({bx},{by},{bz})");
                    }
                }
            }
        }
    }

    #[test]
    fn test_levels() {
        let mask = HierarchyMask::new(32, 4);
        assert_eq!(mask.level_count(), 4); // 4, 8, 16, 32
        assert_eq!(mask.block_size(0), 4);
        assert_eq!(mask.blocks_per_side(0), 8);
        assert_eq!(mask.block_size(3), 32);
        assert_eq!(mask.blocks_per_side(3), 1);
        assert!(mask.is_empty());
        assert!(!mask.is_solid());
    }

    #[test]
    fn test_single_voxel() {
        let size = 16;
        let mut voxels = vec![EMPTY; (size * size * size) as usize];
        let mut mask = HierarchyMask::new(size, 4);

        voxels[index(size, 5, 9, 14)] = 3;
        mask.update_voxel(&voxels, 5, 9, 14);

        assert!(!mask.is_empty());
        assert!(mask.is_occupied(0, 1, 2, 3));
        assert_eq!(mask.occupied_count(0), 1);
        assert!(!mask.is_block_empty_at(5, 9, 14));
        assert!(mask.is_block_empty_at(0, 0, 0));
        assert_matches_voxels(&mask, &voxels);

        voxels[index(size, 5, 9, 14)] = EMPTY;
        mask.update_voxel(&voxels, 5, 9, 14);
        assert!(mask.is_empty());
        assert_matches_voxels(&mask, &voxels);
    }

    #[test]
    fn test_uniform_block() {
        let size = 8;
        let mut voxels = vec![EMPTY; (size * size * size) as usize];
        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    voxels[index(size, x, y, z)] = 2;
                }
            }
        }
        let mut mask = HierarchyMask::new(size, 4);
        mask.rebuild(&voxels);
        assert!(mask.is_full(0, 0, 0, 0));
        assert!(mask.is_uniform(0, 0, 0));

        voxels[index(size, 1, 1, 1)] = 5;
        mask.update_voxel(&voxels, 1, 1, 1);
        assert!(mask.is_full(0, 0, 0, 0));
        assert!(!mask.is_uniform(0, 0, 0));
    }

    #[test]
    fn test_solid_chunk() {
        let size = 8;
        let voxels = vec![1; (size * size * size) as usize];
        let mut mask = HierarchyMask::new(size, 2);
        mask.rebuild(&voxels);
        assert!(mask.is_solid());
        assert_matches_voxels(&mask, &voxels);

        mask.clear();
        assert!(mask.is_empty());
    }

    #[test]
    fn test_random_chunks_match_brute_force() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for &(size, block, density) in &[(16u32, 4u32, 0.02f32), (16, 2, 0.5), (32, 4, 0.1), (8, 8, 0.9)] {
            let mut voxels = vec![EMPTY; (size * size * size) as usize];
            for v in voxels.iter_mut() {
                if rng.r#gen::<f32>() < density {
                    *v = rng.gen_range(1..4);
                }
            }
            let mut rebuilt = HierarchyMask::new(size, block);
            rebuilt.rebuild(&voxels);
            assert_matches_voxels(&rebuilt, &voxels);

            // Incremental edits must agree with the brute force scan too
            let mut incremental = rebuilt.clone();
            for _ in 0..200 {
                let (x, y, z) = (rng.gen_range(0..size), rng.gen_range(0..size), rng.gen_range(0..size));
                voxels[index(size, x, y, z)] = if rng.gen_bool(0.5) { EMPTY } else { rng.gen_range(1..4) };
                incremental.update_voxel(&voxels, x, y, z);
            }
            assert_matches_voxels(&incremental, &voxels);
        }
    }
}
