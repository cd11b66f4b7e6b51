//! Chunk invalidation tracking for dirty voxel regions after edits.

use std::collections::HashMap;

use glam::UVec3;

use crate::voxel::chunk::{ChunkCoord, Face};

/// Which derived products of a chunk need rebuilding
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirtyKind {
    pub mesh: bool,
    pub collider: bool,
}

impl DirtyKind {
    pub const BOTH: DirtyKind = DirtyKind {
        mesh: true,
        collider: true,
    };
    pub const MESH: DirtyKind = DirtyKind {
        mesh: true,
        collider: false,
    };

    fn merge(&mut self, other: DirtyKind) {
        self.mesh |= other.mesh;
        self.collider |= other.collider;
    }
}

/// Faces of the chunk that the voxel at `local` touches (at most three)
pub fn boundary_faces(local: UVec3, chunk_size: u32) -> impl Iterator<Item = Face> {
    let last = chunk_size - 1;
    Face::ALL.into_iter().filter(move |face| {
        let c = local[face.axis()];
        if face.is_positive() { c == last } else { c == 0 }
    })
}

/// Collects which chunks need rebuild after edits.
///
/// An edit dirties the edited chunk and every face neighbour whose shared
/// face borders the edited voxel. Loading or unloading a chunk changes what
/// its neighbours see across the shared face, which only affects their mesh.
#[derive(Debug)]
pub struct ChunkInvalidator {
    chunk_size: u32,
    dirty: HashMap<ChunkCoord, DirtyKind>,
}

impl ChunkInvalidator {
    pub fn new(chunk_size: u32) -> Self {
        Self {
            chunk_size,
            dirty: HashMap::new(),
        }
    }

    /// Record an edit of the voxel at `local` in `coord`
    pub fn mark_voxel(&mut self, coord: ChunkCoord, local: UVec3) {
        self.mark(coord, DirtyKind::BOTH);
        for face in boundary_faces(local, self.chunk_size) {
            self.mark(coord.neighbor(face), DirtyKind::BOTH);
        }
    }

    /// Record that `coord` was loaded or unloaded
    pub fn mark_neighbors_of(&mut self, coord: ChunkCoord) {
        for n in coord.neighbors() {
            self.mark(n, DirtyKind::MESH);
        }
    }

    pub fn mark(&mut self, coord: ChunkCoord, kind: DirtyKind) {
        self.dirty.entry(coord).or_default().merge(kind);
    }

    pub fn is_chunk_dirty(&self, coord: &ChunkCoord) -> bool {
        self.dirty.contains_key(coord)
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Take everything recorded so far, sorted by coordinate
    pub fn take_dirty(&mut self) -> Vec<(ChunkCoord, DirtyKind)> {
        let mut dirty: Vec<_> = self.dirty.drain().collect();
        dirty.sort_by_key(|(coord, _)| *coord);
        dirty
    }

    pub fn clear(&mut self) {
        self.dirty.clear();
    }

    pub fn dirty_chunk_count(&self) -> usize {
        self.dirty.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let invalidator = ChunkInvalidator::new(16);
        assert!(!invalidator.has_dirty());
        assert_eq!(invalidator.dirty_chunk_count(), 0);
    }

    #[test]
    fn test_interior_edit_marks_only_owner() {
        let mut invalidator = ChunkInvalidator::new(16);
        invalidator.mark_voxel(ChunkCoord::new(0, 0, 0), UVec3::new(5, 5, 5));
        let dirty = invalidator.take_dirty();
        assert_eq!(dirty, vec![(ChunkCoord::new(0, 0, 0), DirtyKind::BOTH)]);
        assert!(!invalidator.has_dirty());
    }

    #[test]
    fn test_face_edit_marks_one_neighbor() {
        let mut invalidator = ChunkInvalidator::new(16);
        invalidator.mark_voxel(ChunkCoord::new(0, 0, 0), UVec3::new(15, 5, 5));
        assert_eq!(invalidator.dirty_chunk_count(), 2);
        assert!(invalidator.is_chunk_dirty(&ChunkCoord::new(1, 0, 0)));
    }

    #[test]
    fn test_corner_edit_marks_three_neighbors() {
        let mut invalidator = ChunkInvalidator::new(16);
        invalidator.mark_voxel(ChunkCoord::new(2, 2, 2), UVec3::new(0, 15, 0));
        let dirty: Vec<_> = invalidator.take_dirty().into_iter().map(|(c, _)| c).collect();
        assert_eq!(
            dirty,
            vec![
                ChunkCoord::new(1, 2, 2),
                ChunkCoord::new(2, 2, 1),
                ChunkCoord::new(2, 2, 2),
                ChunkCoord::new(2, 3, 2),
            ]
        );
    }

    #[test]
    fn test_load_marks_mesh_only() {
        let mut invalidator = ChunkInvalidator::new(16);
        invalidator.mark_neighbors_of(ChunkCoord::new(0, 0, 0));
        let dirty = invalidator.take_dirty();
        assert_eq!(dirty.len(), 6);
        assert!(dirty.iter().all(|(_, kind)| *kind == DirtyKind::MESH));
    }

    #[test]
    fn test_kinds_merge() {
        let mut invalidator = ChunkInvalidator::new(16);
        invalidator.mark(ChunkCoord::new(0, 0, 0), DirtyKind::MESH);
        invalidator.mark(ChunkCoord::new(0, 0, 0), DirtyKind::BOTH);
        assert_eq!(invalidator.take_dirty()[0].1, DirtyKind::BOTH);
    }

    #[test]
    fn test_single_voxel_chunk_touches_all_faces() {
        assert_eq!(boundary_faces(UVec3::ZERO, 1).count(), 6);
    }
}
