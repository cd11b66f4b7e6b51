//! Voxel grid to box-collider conversion.
//!
//! Greedy 3D box merging over solid voxels. Scans z, y, x; from each
//! unvisited solid voxel the box grows along x, then y, then z while every
//! covered voxel is solid and unvisited. Materials do not affect merging;
//! each box takes its dominant material (ties go to the lowest index).
//!
//! Every box is entirely solid and boxes never overlap, so the union is
//! always a subset of the solid voxels.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::Aabb;
use crate::voxel::chunk::VoxelGrid;
use crate::voxel::hierarchy::HierarchyMask;
use crate::voxel::palette::{MaterialId, MaterialPalette, EMPTY};

/// Axis-aligned collision box in grid-local voxel units
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColliderBox {
    pub min: Vec3,
    pub size: Vec3,
    /// Dominant palette index of the covered voxels
    pub material: MaterialId,
}

impl ColliderBox {
    pub fn aabb(&self) -> Aabb {
        Aabb::from_min_size(self.min, self.size)
    }

    pub fn volume(&self) -> f32 {
        self.size.x * self.size.y * self.size.z
    }

    pub fn translated(&self, offset: Vec3) -> ColliderBox {
        ColliderBox {
            min: self.min + offset,
            ..*self
        }
    }
}

/// Stateless collider builder
pub struct VoxelColliderBuilder;

impl VoxelColliderBuilder {
    /// Build boxes for a standalone grid, computing its mask on the fly
    pub fn build_grid(voxels: &VoxelGrid) -> Result<Vec<ColliderBox>> {
        let size = voxels.size();
        if !size.is_power_of_two() {
            return Err(Error::MalformedVoxelData(format!(
                "grid size {} is not a power of two",
                size
            )));
        }
        let mut mask = HierarchyMask::new(size, size.min(4));
        mask.rebuild(voxels.cells());
        Self::build(voxels, &mask)
    }

    /// Build boxes for a chunk grid, ordered by their min corner (z, y, x)
    pub fn build(voxels: &VoxelGrid, mask: &HierarchyMask) -> Result<Vec<ColliderBox>> {
        let size = voxels.size();
        if mask.chunk_size() != size {
            return Err(Error::MalformedVoxelData(format!(
                "mask covers {}^3 but grid is {}^3",
                mask.chunk_size(),
                size
            )));
        }

        let mut boxes = Vec::new();
        if mask.is_empty() {
            return Ok(boxes);
        }
        if mask.is_solid() {
            let s = size as f32;
            boxes.push(ColliderBox {
                min: Vec3::ZERO,
                size: Vec3::splat(s),
                material: dominant_material(voxels, [0, 0, 0], [size, size, size]),
            });
            return Ok(boxes);
        }

        let bs = mask.block_size(0);
        let mut visited = vec![false; voxels.cells().len()];
        let solid_free = |visited: &[bool], x: u32, y: u32, z: u32| {
            voxels.is_solid(x, y, z) && !visited[voxels.index(x, y, z)]
        };

        for z in 0..size {
            for y in 0..size {
                let mut x = 0;
                while x < size {
                    if x % bs == 0 && mask.is_block_empty_at(x, y, z) {
                        x += bs;
                        continue;
                    }
                    if !solid_free(&visited, x, y, z) {
                        x += 1;
                        continue;
                    }

                    let mut width = 1;
                    while x + width < size && solid_free(&visited, x + width, y, z) {
                        width += 1;
                    }

                    let mut height = 1;
                    while y + height < size
                        && (0..width).all(|w| solid_free(&visited, x + w, y + height, z))
                    {
                        height += 1;
                    }

                    let mut depth = 1;
                    while z + depth < size
                        && (0..height).all(|h| {
                            (0..width).all(|w| solid_free(&visited, x + w, y + h, z + depth))
                        })
                    {
                        depth += 1;
                    }

                    for d in 0..depth {
                        for h in 0..height {
                            for w in 0..width {
                                let i = voxels.index(x + w, y + h, z + d);
                                visited[i] = true;
                            }
                        }
                    }

                    boxes.push(ColliderBox {
                        min: Vec3::new(x as f32, y as f32, z as f32),
                        size: Vec3::new(width as f32, height as f32, depth as f32),
                        material: dominant_material(voxels, [x, y, z], [width, height, depth]),
                    });
                    x += width;
                }
            }
        }

        log::trace!("Built {} collider boxes for {}^3 grid", boxes.len(), size);
        Ok(boxes)
    }
}

/// Most frequent material in a box, lowest index on ties
fn dominant_material(voxels: &VoxelGrid, min: [u32; 3], size: [u32; 3]) -> MaterialId {
    let mut counts = [0u32; 256];
    for z in min[2]..min[2] + size[2] {
        for y in min[1]..min[1] + size[1] {
            for x in min[0]..min[0] + size[0] {
                counts[voxels.get(x, y, z) as usize] += 1;
            }
        }
    }
    counts[EMPTY as usize] = 0;

    let mut best = EMPTY;
    let mut best_count = 0;
    for (m, &count) in counts.iter().enumerate() {
        if count > best_count {
            best = m as MaterialId;
            best_count = count;
        }
    }
    best
}

/// Collision geometry handed to the physics system
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollisionShape {
    /// Boxes in body-local space
    pub boxes: Vec<ColliderBox>,
    /// Sum of box volume times material density
    pub mass: f32,
}

impl CollisionShape {
    /// Shape from boxes, with mass from palette densities
    pub fn from_boxes(boxes: Vec<ColliderBox>, palette: &MaterialPalette) -> Self {
        let mass = boxes
            .iter()
            .map(|b| b.volume() * palette.physical(b.material).density)
            .sum();
        Self { boxes, mass }
    }

    /// Compound shape: each part's boxes moved by its offset
    pub fn compound<'a>(
        parts: impl IntoIterator<Item = (Vec3, &'a [ColliderBox])>,
        palette: &MaterialPalette,
    ) -> Self {
        let boxes = parts
            .into_iter()
            .flat_map(|(offset, boxes)| boxes.iter().map(move |b| b.translated(offset)))
            .collect();
        Self::from_boxes(boxes, palette)
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Body-local bounds of all boxes
    pub fn bounds(&self) -> Aabb {
        self.boxes
            .iter()
            .fold(Aabb::EMPTY, |acc, b| acc.merged(&b.aabb()))
    }

    /// Center of mass in body-local space
    pub fn center_of_mass(&self, palette: &MaterialPalette) -> Vec3 {
        let mut weighted = Vec3::ZERO;
        let mut total = 0.0;
        for b in &self.boxes {
            let m = b.volume() * palette.physical(b.material).density;
            weighted += b.aabb().center() * m;
            total += m;
        }
        if total > 0.0 { weighted / total } else { self.bounds().center() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn fill_box(grid: &mut VoxelGrid, min: [u32; 3], max: [u32; 3], m: MaterialId) {
        for z in min[2]..max[2] {
            for y in min[1]..max[1] {
                for x in min[0]..max[0] {
                    grid.set(x, y, z, m);
                }
            }
        }
    }

    /// Every box fully solid, no overlaps, union within solid set
    fn assert_boxes_valid(grid: &VoxelGrid, boxes: &[ColliderBox]) {
        let mut covered = vec![false; grid.cells().len()];
        for b in boxes {
            let min = b.min.as_uvec3();
            let size = b.size.as_uvec3();
            for z in min.z..min.z + size.z {
                for y in min.y..min.y + size.y {
                    for x in min.x..min.x + size.x {
                        assert!(grid.is_solid(x, y, z), "box covers empty voxel");
                        let i = grid.index(x, y, z);
                        assert!(!covered[i], "boxes overlap");
                        covered[i] = true;
                    }
                }
            }
        }
    }

    #[test]
    fn test_empty() {
        let boxes = VoxelColliderBuilder::build_grid(&VoxelGrid::new(16)).unwrap();
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_cube_is_one_box() {
        let mut grid = VoxelGrid::new(16);
        fill_box(&mut grid, [14, 0, 7], [16, 2, 9], 3);
        let boxes = VoxelColliderBuilder::build_grid(&grid).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].min, Vec3::new(14.0, 0.0, 7.0));
        assert_eq!(boxes[0].size, Vec3::splat(2.0));
        assert_eq!(boxes[0].material, 3);
    }

    #[test]
    fn test_solid_chunk_single_box() {
        let mut grid = VoxelGrid::new(8);
        grid.fill(1);
        let boxes = VoxelColliderBuilder::build_grid(&grid).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].size, Vec3::splat(8.0));
    }

    #[test]
    fn test_materials_do_not_split_boxes() {
        let mut grid = VoxelGrid::new(8);
        fill_box(&mut grid, [0, 0, 0], [4, 1, 1], 2);
        grid.set(3, 0, 0, 1);
        let boxes = VoxelColliderBuilder::build_grid(&grid).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].material, 2);
    }

    #[test]
    fn test_dominant_material_tie_goes_low() {
        let mut grid = VoxelGrid::new(4);
        grid.set(0, 0, 0, 5);
        grid.set(1, 0, 0, 2);
        assert_eq!(dominant_material(&grid, [0, 0, 0], [2, 1, 1]), 2);
    }

    #[test]
    fn test_l_shape() {
        let mut grid = VoxelGrid::new(8);
        fill_box(&mut grid, [0, 0, 0], [3, 1, 1], 1);
        fill_box(&mut grid, [0, 1, 0], [1, 3, 1], 1);
        let boxes = VoxelColliderBuilder::build_grid(&grid).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_boxes_valid(&grid, &boxes);
        let volume: f32 = boxes.iter().map(|b| b.volume()).sum();
        assert_eq!(volume, 5.0);
    }

    #[test]
    fn test_random_grids_produce_valid_boxes() {
        let mut rng = StdRng::seed_from_u64(42);
        for density in [0.1f64, 0.5, 0.9] {
            let mut grid = VoxelGrid::new(16);
            for z in 0..16 {
                for y in 0..16 {
                    for x in 0..16 {
                        if rng.gen_bool(density) {
                            grid.set(x, y, z, rng.gen_range(1..4));
                        }
                    }
                }
            }
            let boxes = VoxelColliderBuilder::build_grid(&grid).unwrap();
            assert_boxes_valid(&grid, &boxes);
            // Greedy scan covers every solid voxel
            let volume: f32 = boxes.iter().map(|b| b.volume()).sum();
            assert_eq!(volume as usize, grid.solid_count());
        }
    }

    #[test]
    fn test_shape_mass() {
        let mut palette = MaterialPalette::new();
        let heavy = palette
            .register(
                "lead",
                crate::voxel::palette::PhysicalMaterial {
                    density: 11.0,
                    ..Default::default()
                },
                Default::default(),
            )
            .unwrap();
        let light = palette.register_color("foam", Vec4::ONE).unwrap();
        let shape = CollisionShape::from_boxes(
            vec![
                ColliderBox { min: Vec3::ZERO, size: Vec3::ONE, material: heavy },
                ColliderBox { min: Vec3::X, size: Vec3::new(2.0, 1.0, 1.0), material: light },
            ],
            &palette,
        );
        assert_eq!(shape.mass, 11.0 + 2.0);
        assert_eq!(shape.bounds(), Aabb::new(Vec3::ZERO, Vec3::new(3.0, 1.0, 1.0)));
        assert!(shape.center_of_mass(&palette).x < 1.0);
    }

    #[test]
    fn test_compound_offsets_parts() {
        let palette = MaterialPalette::new();
        let part = [ColliderBox { min: Vec3::ZERO, size: Vec3::ONE, material: 9 }];
        let shape = CollisionShape::compound([(Vec3::ZERO, &part[..]), (Vec3::splat(4.0), &part[..])], &palette);
        assert_eq!(shape.boxes.len(), 2);
        assert_eq!(shape.boxes[1].min, Vec3::splat(4.0));
        // Unknown material falls back to default density 1.0
        assert_eq!(shape.mass, 2.0);
    }
}
