//! Chunk system for managing cubic regions of voxel space
//!
//! A chunk is a dense `size^3` grid of palette indices plus the
//! [`HierarchyMask`] summarising it. Voxel data lives behind an `Arc` so that
//! mesh and collider jobs can read an immutable snapshot while the main
//! thread keeps editing (`Arc::make_mut` copies on the first write after a
//! snapshot was taken).

use std::sync::Arc;

use glam::{IVec3, UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::Aabb;
use crate::mesh::MeshImportResult;
use crate::physics::{BodyHandle, ColliderBox};
use crate::voxel::hierarchy::HierarchyMask;
use crate::voxel::palette::{MaterialId, EMPTY};
use crate::voxel::streaming::JobTicket;

/// Integer coordinate identifying a chunk in the world grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkCoord {
    /// Create a new chunk coordinate
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn from_ivec3(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }

    pub fn as_ivec3(&self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }

    /// Convert world position to chunk coordinate (one voxel = one world unit)
    pub fn from_world_pos(pos: Vec3, chunk_size: u32) -> Self {
        let cs = chunk_size as f32;
        Self {
            x: (pos.x / cs).floor() as i32,
            y: (pos.y / cs).floor() as i32,
            z: (pos.z / cs).floor() as i32,
        }
    }

    /// Split a world voxel coordinate into chunk coordinate and local position
    pub fn from_voxel(voxel: IVec3, chunk_size: u32) -> (Self, UVec3) {
        let cs = chunk_size as i32;
        let chunk = IVec3::new(
            voxel.x.div_euclid(cs),
            voxel.y.div_euclid(cs),
            voxel.z.div_euclid(cs),
        );
        let local = IVec3::new(
            voxel.x.rem_euclid(cs),
            voxel.y.rem_euclid(cs),
            voxel.z.rem_euclid(cs),
        );
        (Self::from_ivec3(chunk), local.as_uvec3())
    }

    /// Get the world-space origin (minimum corner) of this chunk
    pub fn world_origin(&self, chunk_size: u32) -> Vec3 {
        self.as_ivec3().as_vec3() * chunk_size as f32
    }

    /// World-space bounds of this chunk
    pub fn world_bounds(&self, chunk_size: u32) -> Aabb {
        Aabb::from_min_size(self.world_origin(chunk_size), Vec3::splat(chunk_size as f32))
    }

    /// Chunk sharing the given face
    pub fn neighbor(&self, face: Face) -> Self {
        Self::from_ivec3(self.as_ivec3() + face.offset())
    }

    /// All six face-adjacent chunks in [`Face::ALL`] order
    pub fn neighbors(&self) -> [ChunkCoord; 6] {
        Face::ALL.map(|face| self.neighbor(face))
    }

    /// Max of per-axis distances
    pub fn chebyshev_distance(&self, other: &ChunkCoord) -> i32 {
        (self.x - other.x)
            .abs()
            .max((self.y - other.y).abs())
            .max((self.z - other.z).abs())
    }
}

/// One of the six faces of a cube, in meshing order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Face {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::PosX,
        Face::NegX,
        Face::PosY,
        Face::NegY,
        Face::PosZ,
        Face::NegZ,
    ];

    /// 0 = x, 1 = y, 2 = z
    pub fn axis(self) -> usize {
        self as usize / 2
    }

    pub fn is_positive(self) -> bool {
        self as usize % 2 == 0
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn opposite(self) -> Face {
        Face::ALL[self as usize ^ 1]
    }

    pub fn offset(self) -> IVec3 {
        let mut v = IVec3::ZERO;
        v[self.axis()] = if self.is_positive() { 1 } else { -1 };
        v
    }

    pub fn normal(self) -> Vec3 {
        self.offset().as_vec3()
    }
}

/// Dense voxel grid in x-fastest order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoxelGrid {
    size: u32,
    cells: Vec<MaterialId>,
}

impl VoxelGrid {
    /// All-empty grid of `size^3` cells
    pub fn new(size: u32) -> Self {
        Self {
            size,
            cells: vec![EMPTY; (size * size * size) as usize],
        }
    }

    /// Wrap existing cells, checking the length matches `size^3`
    pub fn from_cells(size: u32, cells: Vec<MaterialId>) -> Result<Self> {
        let expected = (size as usize).pow(3);
        if cells.len() != expected {
            return Err(Error::MalformedVoxelData(format!(
                "expected {} cells for a {}^3 grid, got {}",
                expected,
                size,
                cells.len()
            )));
        }
        Ok(Self { size, cells })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        (x + y * self.size + z * self.size * self.size) as usize
    }

    pub fn in_bounds(&self, p: IVec3) -> bool {
        let s = self.size as i32;
        p.x >= 0 && p.y >= 0 && p.z >= 0 && p.x < s && p.y < s && p.z < s
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32, z: u32) -> MaterialId {
        self.cells[self.index(x, y, z)]
    }

    /// Bounds-checked lookup; `None` outside the grid
    pub fn get_signed(&self, p: IVec3) -> Option<MaterialId> {
        self.in_bounds(p)
            .then(|| self.get(p.x as u32, p.y as u32, p.z as u32))
    }

    #[inline]
    pub fn is_solid(&self, x: u32, y: u32, z: u32) -> bool {
        self.get(x, y, z) != EMPTY
    }

    /// Set a cell, returning the previous value
    pub fn set(&mut self, x: u32, y: u32, z: u32, material: MaterialId) -> MaterialId {
        let i = self.index(x, y, z);
        std::mem::replace(&mut self.cells[i], material)
    }

    pub fn cells(&self) -> &[MaterialId] {
        &self.cells
    }

    pub fn fill(&mut self, material: MaterialId) {
        self.cells.fill(material);
    }

    pub fn clear(&mut self) {
        self.fill(EMPTY);
    }

    pub fn solid_count(&self) -> usize {
        self.cells.iter().filter(|&&m| m != EMPTY).count()
    }

    /// The layer of cells touching `face`, as `size * size` entries indexed
    /// `u + v * size` with `u = (axis + 1) % 3` and `v = (axis + 2) % 3`
    pub fn face_slab(&self, face: Face) -> Vec<MaterialId> {
        let axis = face.axis();
        let (ua, va) = ((axis + 1) % 3, (axis + 2) % 3);
        let layer = if face.is_positive() { self.size - 1 } else { 0 };

        let mut slab = Vec::with_capacity((self.size * self.size) as usize);
        let mut p = [0u32; 3];
        p[axis] = layer;
        for v in 0..self.size {
            for u in 0..self.size {
                p[ua] = u;
                p[va] = v;
                slab.push(self.get(p[0], p[1], p[2]));
            }
        }
        slab
    }
}

/// Boundary layers of the six face neighbours, captured when a mesh job is
/// submitted. `None` means the neighbour is not loaded and counts as empty.
#[derive(Clone, Debug, Default)]
pub struct NeighborFaces {
    /// Indexed by [`Face::index`] of the side of *this* chunk
    pub slabs: [Option<Arc<[MaterialId]>>; 6],
}

impl NeighborFaces {
    /// Material just outside the chunk on `face` at slab position `(u, v)`
    #[inline]
    pub fn get(&self, face: Face, u: u32, v: u32, size: u32) -> MaterialId {
        match &self.slabs[face.index()] {
            Some(slab) => slab[(u + v * size) as usize],
            None => EMPTY,
        }
    }
}

/// A single loaded chunk
pub struct Chunk {
    coord: ChunkCoord,
    voxels: Arc<VoxelGrid>,
    mask: HierarchyMask,
    /// World load generation this chunk was (re)loaded under
    generation: u64,

    dirty_mesh: bool,
    dirty_collider: bool,
    /// Bumped whenever `dirty_mesh` is raised
    pub(crate) mesh_revision: u64,
    /// Bumped whenever `dirty_collider` is raised
    pub(crate) collider_revision: u64,

    pub(crate) mesh_job: Option<JobTicket>,
    pub(crate) collider_job: Option<JobTicket>,

    /// Last successfully built render mesh
    pub(crate) mesh: Option<Arc<MeshImportResult>>,
    /// Last successfully built collision boxes
    pub(crate) colliders: Option<Arc<Vec<ColliderBox>>>,
    /// Physics body for the current colliders
    pub(crate) body: Option<BodyHandle>,
}

impl Chunk {
    /// Create a new empty chunk at the given coordinate
    pub fn new(coord: ChunkCoord, chunk_size: u32, mask_block_size: u32) -> Self {
        Self {
            coord,
            voxels: Arc::new(VoxelGrid::new(chunk_size)),
            mask: HierarchyMask::new(chunk_size, mask_block_size),
            generation: 0,
            dirty_mesh: false,
            dirty_collider: false,
            mesh_revision: 0,
            collider_revision: 0,
            mesh_job: None,
            collider_job: None,
            mesh: None,
            colliders: None,
            body: None,
        }
    }

    /// Clear every trace of a previous occupancy and rebind to `coord`
    pub fn reset(&mut self, coord: ChunkCoord, generation: u64) {
        match Arc::get_mut(&mut self.voxels) {
            Some(grid) => grid.clear(),
            // A job still holds the old snapshot; leave it to them
            None => self.voxels = Arc::new(VoxelGrid::new(self.size())),
        }
        self.mask.clear();
        self.coord = coord;
        self.generation = generation;
        self.dirty_mesh = false;
        self.dirty_collider = false;
        self.mesh_revision = 0;
        self.collider_revision = 0;
        self.mesh_job = None;
        self.collider_job = None;
        self.mesh = None;
        self.colliders = None;
        self.body = None;
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn size(&self) -> u32 {
        self.voxels.size()
    }

    pub fn voxels(&self) -> &VoxelGrid {
        &self.voxels
    }

    /// Cheap immutable snapshot for a background job
    pub fn snapshot(&self) -> Arc<VoxelGrid> {
        Arc::clone(&self.voxels)
    }

    pub fn mask(&self) -> &HierarchyMask {
        &self.mask
    }

    /// Check a local position and convert it to unsigned
    pub fn check_local(&self, local: IVec3) -> Result<UVec3> {
        if self.voxels.in_bounds(local) {
            Ok(local.as_uvec3())
        } else {
            Err(Error::OutOfRange {
                coord: self.coord,
                local,
            })
        }
    }

    pub fn get(&self, local: UVec3) -> MaterialId {
        self.voxels.get(local.x, local.y, local.z)
    }

    /// Write one voxel, keeping the mask current. Returns true if it changed.
    ///
    /// Marks this chunk dirty; neighbours are the caller's business.
    pub fn set_voxel(&mut self, local: UVec3, material: MaterialId) -> bool {
        if self.get(local) == material {
            return false;
        }
        let grid = Arc::make_mut(&mut self.voxels);
        grid.set(local.x, local.y, local.z, material);
        self.mask.update_voxel(grid.cells(), local.x, local.y, local.z);
        self.mark_dirty();
        true
    }

    /// Replace all voxel data at once and rebuild the mask
    pub fn fill_with(&mut self, f: impl FnOnce(&mut VoxelGrid)) {
        let grid = Arc::make_mut(&mut self.voxels);
        f(grid);
        self.mask.rebuild(grid.cells());
        self.mark_dirty();
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    pub fn world_bounds(&self) -> Aabb {
        self.coord.world_bounds(self.size())
    }

    pub fn is_dirty_mesh(&self) -> bool {
        self.dirty_mesh
    }

    pub fn is_dirty_collider(&self) -> bool {
        self.dirty_collider
    }

    pub fn mark_mesh_dirty(&mut self) {
        self.dirty_mesh = true;
        self.mesh_revision += 1;
    }

    pub fn mark_collider_dirty(&mut self) {
        self.dirty_collider = true;
        self.collider_revision += 1;
    }

    pub fn mark_dirty(&mut self) {
        self.mark_mesh_dirty();
        self.mark_collider_dirty();
    }

    /// Clear `dirty_mesh` only if nothing changed since `revision`
    pub(crate) fn settle_mesh(&mut self, revision: u64) -> bool {
        if self.mesh_revision == revision {
            self.dirty_mesh = false;
        }
        !self.dirty_mesh
    }

    /// Clear `dirty_collider` only if nothing changed since `revision`
    pub(crate) fn settle_collider(&mut self, revision: u64) -> bool {
        if self.collider_revision == revision {
            self.dirty_collider = false;
        }
        !self.dirty_collider
    }

    pub fn has_jobs_in_flight(&self) -> bool {
        self.mesh_job.is_some() || self.collider_job.is_some()
    }

    /// Flag in-flight jobs so their results are dropped on arrival
    pub(crate) fn cancel_jobs(&mut self) {
        if let Some(ticket) = self.mesh_job.take() {
            ticket.cancel();
        }
        if let Some(ticket) = self.collider_job.take() {
            ticket.cancel();
        }
    }

    pub fn mesh(&self) -> Option<&Arc<MeshImportResult>> {
        self.mesh.as_ref()
    }

    pub fn colliders(&self) -> Option<&Arc<Vec<ColliderBox>>> {
        self.colliders.as_ref()
    }

    pub fn body(&self) -> Option<BodyHandle> {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_coord_new() {
        let coord = ChunkCoord::new(1, 2, 3);
        assert_eq!(coord.x, 1);
        assert_eq!(coord.y, 2);
        assert_eq!(coord.z, 3);
    }

    #[test]
    fn test_from_world_pos() {
        assert_eq!(ChunkCoord::from_world_pos(Vec3::splat(8.0), 16), ChunkCoord::new(0, 0, 0));
        assert_eq!(ChunkCoord::from_world_pos(Vec3::new(16.0, 0.0, 0.0), 16), ChunkCoord::new(1, 0, 0));
        assert_eq!(ChunkCoord::from_world_pos(Vec3::new(-0.5, -16.0, -17.0), 16), ChunkCoord::new(-1, -1, -2));
    }

    #[test]
    fn test_from_voxel_negative() {
        let (coord, local) = ChunkCoord::from_voxel(IVec3::new(-1, 17, -16), 16);
        assert_eq!(coord, ChunkCoord::new(-1, 1, -1));
        assert_eq!(local, UVec3::new(15, 1, 0));
    }

    #[test]
    fn test_world_origin() {
        assert_eq!(ChunkCoord::new(1, -2, 0).world_origin(32), Vec3::new(32.0, -64.0, 0.0));
    }

    #[test]
    fn test_faces() {
        assert_eq!(Face::PosX.offset(), IVec3::X);
        assert_eq!(Face::NegZ.offset(), IVec3::NEG_Z);
        for face in Face::ALL {
            assert_eq!(face.opposite().opposite(), face);
            assert_eq!(face.offset() + face.opposite().offset(), IVec3::ZERO);
        }
        let n = ChunkCoord::new(0, 0, 0).neighbors();
        assert_eq!(n[Face::NegY.index()], ChunkCoord::new(0, -1, 0));
    }

    #[test]
    fn test_chebyshev() {
        let a = ChunkCoord::new(0, 0, 0);
        assert_eq!(a.chebyshev_distance(&ChunkCoord::new(2, -3, 1)), 3);
    }

    #[test]
    fn test_grid_from_cells_checks_length() {
        assert!(VoxelGrid::from_cells(4, vec![0; 64]).is_ok());
        assert!(matches!(
            VoxelGrid::from_cells(4, vec![0; 63]),
            Err(Error::MalformedVoxelData(_))
        ));
    }

    #[test]
    fn test_face_slab() {
        let mut grid = VoxelGrid::new(4);
        grid.set(3, 1, 2, 7);
        let slab = grid.face_slab(Face::PosX);
        // u = y, v = z
        assert_eq!(slab[1 + 2 * 4], 7);
        assert_eq!(slab.iter().filter(|&&m| m != EMPTY).count(), 1);
        assert!(grid.face_slab(Face::NegX).iter().all(|&m| m == EMPTY));
    }

    #[test]
    fn test_set_voxel_marks_dirty_and_updates_mask() {
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0, 0), 16, 4);
        assert!(chunk.is_empty());
        assert!(chunk.set_voxel(UVec3::new(1, 2, 3), 5));
        assert!(!chunk.is_empty());
        assert!(chunk.is_dirty_mesh());
        assert!(chunk.is_dirty_collider());
        assert!(!chunk.set_voxel(UVec3::new(1, 2, 3), 5));
    }

    #[test]
    fn test_snapshot_isolated_from_edits() {
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0, 0), 8, 2);
        let snapshot = chunk.snapshot();
        chunk.set_voxel(UVec3::ZERO, 1);
        assert_eq!(snapshot.get(0, 0, 0), EMPTY);
        assert_eq!(chunk.get(UVec3::ZERO), 1);
    }

    #[test]
    fn test_settle_respects_revision() {
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0, 0), 8, 2);
        chunk.mark_dirty();
        let rev = chunk.mesh_revision;
        chunk.set_voxel(UVec3::ONE, 2);
        assert!(!chunk.settle_mesh(rev));
        assert!(chunk.is_dirty_mesh());
        assert!(chunk.settle_mesh(chunk.mesh_revision));
        assert!(!chunk.is_dirty_mesh());
    }

    #[test]
    fn test_check_local() {
        let chunk = Chunk::new(ChunkCoord::new(0, 0, 0), 8, 2);
        assert!(chunk.check_local(IVec3::new(7, 0, 0)).is_ok());
        assert!(matches!(
            chunk.check_local(IVec3::new(8, 0, 0)),
            Err(Error::OutOfRange { .. })
        ));
        assert!(chunk.check_local(IVec3::new(0, -1, 0)).is_err());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0, 0), 8, 2);
        chunk.fill_with(|g| g.fill(3));
        let _held = chunk.snapshot();
        chunk.reset(ChunkCoord::new(1, 1, 1), 9);
        assert!(chunk.is_empty());
        assert_eq!(chunk.voxels().solid_count(), 0);
        assert_eq!(chunk.coord(), ChunkCoord::new(1, 1, 1));
        assert_eq!(chunk.generation(), 9);
        assert!(!chunk.is_dirty_mesh());
        assert!(chunk.mesh().is_none());
    }
}
