//! Voxel grid to triangle mesh conversion.
//!
//! Face-culled surface extraction with greedy quad merging:
//!
//! 1. For each face direction (+X, -X, +Y, -Y, +Z, -Z)
//! 2. Sweep the slices perpendicular to that axis
//! 3. Build a 2D mask of visible faces, skipping empty mask blocks and the
//!    interior of uniform blocks
//! 4. Greedily merge runs of the same material, first along u then along v
//! 5. Emit quads sorted by (material, v, u) so output is deterministic
//!
//! A face is visible where a solid voxel borders an empty voxel or a voxel
//! of a different material. Voxels outside the chunk come from the captured
//! neighbour faces; an unloaded neighbour counts as empty.

use glam::Vec3;

use super::vertex::MeshVertex;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::Aabb;
use crate::voxel::chunk::{Face, NeighborFaces, VoxelGrid};
use crate::voxel::hierarchy::HierarchyMask;
use crate::voxel::palette::{MaterialId, MaterialPalette, EMPTY};

/// Output of a mesh conversion, ready for GPU upload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshImportResult {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    /// One entry per triangle
    pub triangle_materials: Vec<MaterialId>,
    /// Chunk-local bounds of all vertices; `Aabb::EMPTY` for an empty mesh
    pub bounds: Aabb,
}

impl MeshImportResult {
    pub fn empty() -> Self {
        Self {
            bounds: Aabb::EMPTY,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn quad_count(&self) -> usize {
        self.vertices.len() / 4
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    fn push_quad(&mut self, corners: [Vec3; 4], normal: Vec3, material: MaterialId) {
        let base = self.vertices.len() as u32;
        for corner in corners {
            self.vertices.push(MeshVertex::new(corner, normal, material as u32));
            self.bounds.expand(corner);
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        self.triangle_materials.extend_from_slice(&[material, material]);
    }
}

/// A merged rectangle of faces within one slice
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct SliceQuad {
    material: MaterialId,
    v: u32,
    u: u32,
    width: u32,
    height: u32,
}

/// Stateless voxel-to-mesh converter
#[derive(Clone, Copy, Debug)]
pub struct MeshConverter {
    /// Merge coplanar same-material faces; off emits one quad per voxel face
    pub greedy: bool,
}

impl Default for MeshConverter {
    fn default() -> Self {
        Self { greedy: true }
    }
}

impl MeshConverter {
    pub fn new(greedy: bool) -> Self {
        Self { greedy }
    }

    /// Mesh a standalone grid with no neighbours, building its mask on the fly
    pub fn convert_grid(&self, voxels: &VoxelGrid, palette: &MaterialPalette) -> Result<MeshImportResult> {
        let size = voxels.size();
        if !size.is_power_of_two() {
            return Err(Error::MalformedVoxelData(format!(
                "grid size {} is not a power of two",
                size
            )));
        }
        let mut mask = HierarchyMask::new(size, size.min(4));
        mask.rebuild(voxels.cells());
        self.convert(voxels, &mask, &NeighborFaces::default(), palette)
    }

    /// Mesh a chunk grid. Pure: identical input yields identical output.
    pub fn convert(
        &self,
        voxels: &VoxelGrid,
        mask: &HierarchyMask,
        neighbors: &NeighborFaces,
        palette: &MaterialPalette,
    ) -> Result<MeshImportResult> {
        let size = voxels.size();
        if mask.chunk_size() != size {
            return Err(Error::MalformedVoxelData(format!(
                "mask covers {}^3 but grid is {}^3",
                mask.chunk_size(),
                size
            )));
        }

        let mut mesh = MeshImportResult::empty();
        if mask.is_empty() {
            return Ok(mesh);
        }
        palette.check_cells(voxels.cells())?;

        let n = size as usize;
        let mut faces = vec![EMPTY; n * n];
        let mut quads = Vec::new();

        for face in Face::ALL {
            let axis = face.axis();
            let (ua, va) = ((axis + 1) % 3, (axis + 2) % 3);
            let normal = face.normal();

            for slice in 0..size {
                if !self.build_slice(voxels, mask, neighbors, face, slice, &mut faces) {
                    continue;
                }

                quads.clear();
                if self.greedy {
                    greedy_merge(&mut faces, size, &mut quads);
                } else {
                    single_faces(&mut faces, size, &mut quads);
                }
                quads.sort_unstable();

                let depth = (if face.is_positive() { slice + 1 } else { slice }) as f32;
                for q in &quads {
                    let mut origin = Vec3::ZERO;
                    origin[axis] = depth;
                    origin[ua] = q.u as f32;
                    origin[va] = q.v as f32;
                    let mut du = Vec3::ZERO;
                    du[ua] = q.width as f32;
                    let mut dv = Vec3::ZERO;
                    dv[va] = q.height as f32;

                    let corners = if face.is_positive() {
                        [origin, origin + du, origin + du + dv, origin + dv]
                    } else {
                        [origin, origin + dv, origin + du + dv, origin + du]
                    };
                    mesh.push_quad(corners, normal, q.material);
                }
            }
        }

        log::trace!(
            "Meshed {}^3 grid: {} quads, {} triangles",
            size,
            mesh.quad_count(),
            mesh.triangle_count()
        );
        Ok(mesh)
    }

    /// Fill `faces` with the visible face material of each cell in the
    /// slice (`EMPTY` = no face). Returns false if the slice has no faces.
    fn build_slice(
        &self,
        voxels: &VoxelGrid,
        mask: &HierarchyMask,
        neighbors: &NeighborFaces,
        face: Face,
        slice: u32,
        faces: &mut [MaterialId],
    ) -> bool {
        let size = voxels.size();
        let axis = face.axis();
        let (ua, va) = ((axis + 1) % 3, (axis + 2) % 3);
        let step: i32 = if face.is_positive() { 1 } else { -1 };

        let bs = mask.block_size(0);
        let per_side = mask.blocks_per_side(0);
        let layer = slice % bs;
        let on_block_boundary = if face.is_positive() { layer == bs - 1 } else { layer == 0 };

        faces.fill(EMPTY);
        let mut any = false;

        for bv in 0..per_side {
            for bu in 0..per_side {
                let mut b = [0u32; 3];
                b[axis] = slice / bs;
                b[ua] = bu;
                b[va] = bv;
                if !mask.is_occupied(0, b[0], b[1], b[2]) {
                    continue;
                }
                // Inside a uniform block the next voxel has the same material
                if !on_block_boundary && mask.is_uniform(b[0], b[1], b[2]) {
                    continue;
                }

                for v in bv * bs..(bv + 1) * bs {
                    for u in bu * bs..(bu + 1) * bs {
                        let mut p = [0u32; 3];
                        p[axis] = slice;
                        p[ua] = u;
                        p[va] = v;
                        let material = voxels.get(p[0], p[1], p[2]);
                        if material == EMPTY {
                            continue;
                        }

                        let next = slice as i32 + step;
                        let beyond = if next < 0 || next >= size as i32 {
                            neighbors.get(face, u, v, size)
                        } else {
                            let mut q = p;
                            q[axis] = next as u32;
                            voxels.get(q[0], q[1], q[2])
                        };

                        if beyond != material {
                            faces[(u + v * size) as usize] = material;
                            any = true;
                        }
                    }
                }
            }
        }
        any
    }
}

/// Merge runs of equal material into maximal rectangles, u first then v
fn greedy_merge(faces: &mut [MaterialId], size: u32, out: &mut Vec<SliceQuad>) {
    let at = |u: u32, v: u32| (u + v * size) as usize;

    for v in 0..size {
        let mut u = 0;
        while u < size {
            let material = faces[at(u, v)];
            if material == EMPTY {
                u += 1;
                continue;
            }

            let mut width = 1;
            while u + width < size && faces[at(u + width, v)] == material {
                width += 1;
            }

            let mut height = 1;
            'grow: while v + height < size {
                for k in 0..width {
                    if faces[at(u + k, v + height)] != material {
                        break 'grow;
                    }
                }
                height += 1;
            }

            for dv in 0..height {
                for du in 0..width {
                    faces[at(u + du, v + dv)] = EMPTY;
                }
            }
            out.push(SliceQuad {
                material,
                v,
                u,
                width,
                height,
            });
            u += width;
        }
    }
}

/// One quad per visible face
fn single_faces(faces: &mut [MaterialId], size: u32, out: &mut Vec<SliceQuad>) {
    for v in 0..size {
        for u in 0..size {
            let material = faces[(u + v * size) as usize];
            if material != EMPTY {
                out.push(SliceQuad {
                    material,
                    v,
                    u,
                    width: 1,
                    height: 1,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;
    use std::sync::Arc;

    fn palette(materials: usize) -> MaterialPalette {
        let mut palette = MaterialPalette::new();
        for i in 0..materials {
            palette.register_color(format!("m{}", i), Vec4::ONE).unwrap();
        }
        palette
    }

    fn grid_with(size: u32, cells: &[(u32, u32, u32, MaterialId)]) -> VoxelGrid {
        let mut grid = VoxelGrid::new(size);
        for &(x, y, z, m) in cells {
            grid.set(x, y, z, m);
        }
        grid
    }

    #[test]
    fn test_empty_grid_yields_empty_mesh() {
        let mesh = MeshConverter::default()
            .convert_grid(&VoxelGrid::new(16), &palette(0))
            .unwrap();
        assert!(mesh.is_empty());
        assert!(mesh.indices.is_empty());
        assert!(mesh.bounds.is_empty());
    }

    #[test]
    fn test_single_voxel() {
        let grid = grid_with(8, &[(2, 3, 4, 1)]);
        let mesh = MeshConverter::default().convert_grid(&grid, &palette(1)).unwrap();
        assert_eq!(mesh.quad_count(), 6);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
        assert_eq!(mesh.triangle_materials, vec![1; 12]);
        assert_eq!(mesh.bounds, Aabb::new(Vec3::new(2.0, 3.0, 4.0), Vec3::new(3.0, 4.0, 5.0)));
    }

    #[test]
    fn test_cube_merges_to_six_quads() {
        let mut grid = VoxelGrid::new(16);
        for z in 0..2 {
            for y in 0..2 {
                for x in 0..2 {
                    grid.set(x, y, z, 1);
                }
            }
        }
        let mesh = MeshConverter::default().convert_grid(&grid, &palette(1)).unwrap();
        assert_eq!(mesh.quad_count(), 6);

        let naive = MeshConverter::new(false).convert_grid(&grid, &palette(1)).unwrap();
        assert_eq!(naive.quad_count(), 24);
    }

    #[test]
    fn test_winding_faces_outward() {
        let grid = grid_with(4, &[(1, 1, 1, 1)]);
        let mesh = MeshConverter::default().convert_grid(&grid, &palette(1)).unwrap();
        for tri in mesh.indices.chunks(3) {
            let a = mesh.vertices[tri[0] as usize];
            let b = mesh.vertices[tri[1] as usize];
            let c = mesh.vertices[tri[2] as usize];
            let n = (b.position() - a.position()).cross(c.position() - a.position());
            assert!(n.dot(a.normal()) > 0.0);
        }
    }

    #[test]
    fn test_material_boundary_emits_faces() {
        let grid = grid_with(4, &[(1, 1, 1, 1), (2, 1, 1, 2)]);
        let mesh = MeshConverter::default().convert_grid(&grid, &palette(2)).unwrap();
        // Two unit cubes, shared face emitted from both sides
        assert_eq!(mesh.quad_count(), 12);

        let same = grid_with(4, &[(1, 1, 1, 1), (2, 1, 1, 1)]);
        let mesh = MeshConverter::default().convert_grid(&same, &palette(2)).unwrap();
        assert_eq!(mesh.quad_count(), 6);
    }

    #[test]
    fn test_uniform_solid_grid_only_outer_faces() {
        let mut grid = VoxelGrid::new(8);
        grid.fill(1);
        let mesh = MeshConverter::default().convert_grid(&grid, &palette(1)).unwrap();
        assert_eq!(mesh.quad_count(), 6);
        assert_eq!(mesh.bounds, Aabb::new(Vec3::ZERO, Vec3::splat(8.0)));
    }

    #[test]
    fn test_solid_neighbor_culls_boundary_face() {
        let grid = grid_with(4, &[(3, 0, 0, 1)]);
        let mut mask = HierarchyMask::new(4, 2);
        mask.rebuild(grid.cells());

        let open = MeshConverter::default()
            .convert(&grid, &mask, &NeighborFaces::default(), &palette(1))
            .unwrap();
        assert_eq!(open.quad_count(), 6);

        let mut neighbors = NeighborFaces::default();
        neighbors.slabs[Face::PosX.index()] = Some(Arc::from(vec![1u8; 16]));
        let culled = MeshConverter::default()
            .convert(&grid, &mask, &neighbors, &palette(1))
            .unwrap();
        assert_eq!(culled.quad_count(), 5);
        assert!(culled.vertices.iter().all(|v| v.normal() != Vec3::X));
    }

    #[test]
    fn test_unknown_material_is_malformed() {
        let grid = grid_with(4, &[(0, 0, 0, 9)]);
        assert!(matches!(
            MeshConverter::default().convert_grid(&grid, &palette(1)),
            Err(Error::MalformedVoxelData(_))
        ));
    }

    #[test]
    fn test_mask_size_mismatch_is_malformed() {
        let grid = VoxelGrid::new(8);
        let mask = HierarchyMask::new(16, 4);
        assert!(MeshConverter::default()
            .convert(&grid, &mask, &NeighborFaces::default(), &palette(0))
            .is_err());
    }

    #[test]
    fn test_quads_sorted_by_material_within_slice() {
        // Two voxels side by side in the same +Y slice with materials 2 then 1
        let grid = grid_with(4, &[(0, 0, 0, 2), (2, 0, 0, 1)]);
        let mesh = MeshConverter::default().convert_grid(&grid, &palette(2)).unwrap();
        let up: Vec<u32> = mesh
            .vertices
            .chunks(4)
            .filter(|q| q[0].normal() == Vec3::Y)
            .map(|q| q[0].material)
            .collect();
        assert_eq!(up, vec![1, 2]);
    }
}
