//! Voxel objects, entities and instances outside the streamed world.
//!
//! - [`VoxelObject`]: one voxel grid with its render mesh and collider boxes
//! - [`VoxelEntity`]: a transform, an optional physics body and a list of
//!   object parts; [`EntityKind`] selects the variant
//! - [`ObjectInstance`]: a transform plus a shared object, for drawing many
//!   copies of the same geometry

use std::collections::HashMap;
use std::sync::Arc;

use glam::{IVec3, Mat4, Quat, UVec3, Vec3};

use crate::core::error::Error;
use crate::core::types::{Result, Transform};
use crate::math::Aabb;
use crate::mesh::{MeshConverter, MeshImportResult};
use crate::physics::{BodyHandle, ColliderBox, CollisionShape, VoxelColliderBuilder};
use crate::voxel::chunk::{ChunkCoord, VoxelGrid};
use crate::voxel::palette::{MaterialId, MaterialPalette, EMPTY};

/// A voxel grid with derived render and collision geometry
#[derive(Clone, Debug)]
pub struct VoxelObject {
    /// Offset of the grid origin in the owning entity's space
    pub position: IVec3,
    voxels: VoxelGrid,
    mesh: Arc<MeshImportResult>,
    colliders: Arc<Vec<ColliderBox>>,
    dirty: bool,
}

impl VoxelObject {
    /// Empty object of `size^3` voxels; `size` must be a power of two
    pub fn new(size: u32) -> Result<Self> {
        Self::from_grid(VoxelGrid::new(size), IVec3::ZERO)
    }

    pub fn from_grid(voxels: VoxelGrid, position: IVec3) -> Result<Self> {
        if !voxels.size().is_power_of_two() {
            return Err(Error::MalformedVoxelData(format!(
                "object grid size {} is not a power of two",
                voxels.size()
            )));
        }
        Ok(Self {
            position,
            voxels,
            mesh: Arc::new(MeshImportResult::empty()),
            colliders: Arc::new(Vec::new()),
            dirty: true,
        })
    }

    pub fn with_position(mut self, position: IVec3) -> Self {
        self.position = position;
        self
    }

    pub fn voxels(&self) -> &VoxelGrid {
        &self.voxels
    }

    pub fn size(&self) -> u32 {
        self.voxels.size()
    }

    /// Material at a grid-local position, `EMPTY` outside the grid
    pub fn get(&self, local: IVec3) -> MaterialId {
        self.voxels.get_signed(local).unwrap_or(EMPTY)
    }

    /// Write a voxel; returns true if it changed
    pub fn set_voxel(&mut self, local: UVec3, material: MaterialId) -> bool {
        if self.voxels.get(local.x, local.y, local.z) == material {
            return false;
        }
        self.voxels.set(local.x, local.y, local.z, material);
        self.dirty = true;
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Regenerate mesh and colliders. On failure the previous geometry stays.
    pub fn rebuild(&mut self, palette: &MaterialPalette) -> Result<()> {
        let mesh = MeshConverter::default().convert_grid(&self.voxels, palette)?;
        let colliders = VoxelColliderBuilder::build_grid(&self.voxels)?;
        self.mesh = Arc::new(mesh);
        self.colliders = Arc::new(colliders);
        self.dirty = false;
        Ok(())
    }

    pub fn mesh(&self) -> &Arc<MeshImportResult> {
        &self.mesh
    }

    pub fn colliders(&self) -> &Arc<Vec<ColliderBox>> {
        &self.colliders
    }

    pub fn solid_count(&self) -> usize {
        self.voxels.solid_count()
    }

    /// Bounds of the grid in entity space
    pub fn bounds(&self) -> Aabb {
        Aabb::from_min_size(self.position.as_vec3(), Vec3::splat(self.size() as f32))
    }

    fn contains(&self, point: IVec3) -> bool {
        self.voxels.in_bounds(point - self.position)
    }
}

/// Closed set of entity variants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    /// Geometry built once at creation
    Object,
    /// Geometry edited during its lifetime and rebuilt in place
    /// (destructible blobs, runtime-sculpted props)
    DynamicMesh,
    /// Proxy for a loaded world chunk; geometry lives in the world
    WorldChunk(ChunkCoord),
}

/// Runtime entity: transform, physics body and voxel parts
#[derive(Clone, Debug)]
pub struct VoxelEntity {
    pub name: String,
    pub kind: EntityKind,
    pub transform: Transform,
    pub body: Option<BodyHandle>,
    pub is_static: bool,
    /// Registers as a sensor body
    pub is_trigger: bool,
    pub parts: Vec<VoxelObject>,
    palette: Arc<MaterialPalette>,
    /// Bumped whenever part geometry is rebuilt
    geometry_revision: u64,
}

impl VoxelEntity {
    fn with_kind(
        name: impl Into<String>,
        kind: EntityKind,
        parts: Vec<VoxelObject>,
        palette: Arc<MaterialPalette>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            transform: Transform::IDENTITY,
            body: None,
            is_static: false,
            is_trigger: false,
            parts,
            palette,
            geometry_revision: 0,
        }
    }

    /// Fixed-geometry entity; parts are meshed immediately
    pub fn object(
        name: impl Into<String>,
        parts: Vec<VoxelObject>,
        palette: Arc<MaterialPalette>,
    ) -> Result<Self> {
        let mut entity = Self::with_kind(name, EntityKind::Object, parts, palette);
        entity.rebuild_dirty()?;
        Ok(entity)
    }

    /// Editable single-grid entity (a DynamicMeshObject)
    pub fn dynamic_mesh(
        name: impl Into<String>,
        voxels: VoxelGrid,
        palette: Arc<MaterialPalette>,
    ) -> Result<Self> {
        let part = VoxelObject::from_grid(voxels, IVec3::ZERO)?;
        let mut entity = Self::with_kind(name, EntityKind::DynamicMesh, vec![part], palette);
        entity.rebuild_dirty()?;
        Ok(entity)
    }

    /// Entity standing in for a world chunk
    pub fn world_chunk(coord: ChunkCoord, chunk_size: u32, palette: Arc<MaterialPalette>) -> Self {
        let mut entity = Self::with_kind(format!("chunk_{}_{}_{}", coord.x, coord.y, coord.z), EntityKind::WorldChunk(coord), Vec::new(), palette);
        entity.transform = Transform::from_translation(coord.world_origin(chunk_size));
        entity.is_static = true;
        entity
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    pub fn palette(&self) -> &Arc<MaterialPalette> {
        &self.palette
    }

    pub fn geometry_revision(&self) -> u64 {
        self.geometry_revision
    }

    /// Material at an entity-space voxel position
    pub fn get_voxel(&self, point: IVec3) -> MaterialId {
        self.parts
            .iter()
            .find(|p| p.contains(point))
            .map(|p| p.get(point - p.position))
            .unwrap_or(EMPTY)
    }

    /// Write the voxel at an entity-space position in the first part that
    /// covers it. Returns false if no part covers it or nothing changed.
    pub fn set_voxel(&mut self, point: IVec3, material: MaterialId) -> bool {
        match self.parts.iter_mut().find(|p| p.contains(point)) {
            Some(part) => part.set_voxel((point - part.position).as_uvec3(), material),
            None => false,
        }
    }

    pub fn needs_rebuild(&self) -> bool {
        self.parts.iter().any(VoxelObject::is_dirty)
    }

    /// Rebuild every dirty part. Returns true if any geometry changed.
    ///
    /// A part that fails keeps its previous geometry; the first error is
    /// returned after all parts were attempted.
    pub fn rebuild_dirty(&mut self) -> Result<bool> {
        let mut changed = false;
        let mut first_error = None;
        for part in self.parts.iter_mut().filter(|p| p.is_dirty()) {
            match part.rebuild(&self.palette) {
                Ok(()) => changed = true,
                Err(e) => {
                    log::warn!("Entity '{}': keeping previous geometry ({})", self.name, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if changed {
            self.geometry_revision += 1;
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(changed),
        }
    }

    /// Compound collision shape of all parts, in entity space
    pub fn collision_shape(&self) -> CollisionShape {
        CollisionShape::compound(
            self.parts
                .iter()
                .map(|p| (p.position.as_vec3(), p.colliders().as_slice())),
            &self.palette,
        )
    }

    /// Render meshes of all parts with their entity-space offsets
    pub fn meshes(&self) -> impl Iterator<Item = (Vec3, &Arc<MeshImportResult>)> {
        self.parts.iter().map(|p| (p.position.as_vec3(), p.mesh()))
    }

    pub fn solid_count(&self) -> usize {
        self.parts.iter().map(VoxelObject::solid_count).sum()
    }

    /// Bounds of all parts in entity space
    pub fn local_bounds(&self) -> Aabb {
        self.parts
            .iter()
            .fold(Aabb::EMPTY, |acc, p| acc.merged(&p.bounds()))
    }

    /// Total mass from part colliders and palette densities
    pub fn mass(&self) -> f32 {
        self.collision_shape().mass
    }
}

/// One placement of a shared voxel object
#[derive(Clone, Debug)]
pub struct ObjectInstance {
    pub object: Arc<VoxelObject>,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: f32,
}

impl ObjectInstance {
    pub fn new(object: Arc<VoxelObject>, position: Vec3) -> Self {
        Self {
            object,
            position,
            rotation: Quat::IDENTITY,
            scale: 1.0,
        }
    }

    /// Set rotation
    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// Set scale
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Get transformation matrix for this instance
    pub fn transform(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(Vec3::splat(self.scale), self.rotation, self.position)
    }

    pub fn mesh(&self) -> &Arc<MeshImportResult> {
        self.object.mesh()
    }

    /// World-space bounds of the instance's mesh
    pub fn world_bounds(&self) -> Aabb {
        let local = self.object.mesh().bounds;
        if local.is_empty() {
            return Aabb::EMPTY;
        }
        let m = self.transform();
        Aabb::from_points((0..8).map(|i| {
            let corner = Vec3::new(
                if i & 1 == 0 { local.min.x } else { local.max.x },
                if i & 2 == 0 { local.min.y } else { local.max.y },
                if i & 4 == 0 { local.min.z } else { local.max.z },
            );
            m.transform_point3(corner)
        }))
    }
}

/// Named, shared voxel objects ready for instancing
#[derive(Default)]
pub struct ObjectLibrary {
    objects: HashMap<String, Arc<VoxelObject>>,
}

impl ObjectLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the object's geometry and store it under `name`
    pub fn add(
        &mut self,
        name: impl Into<String>,
        mut object: VoxelObject,
        palette: &MaterialPalette,
    ) -> Result<Arc<VoxelObject>> {
        if object.is_dirty() {
            object.rebuild(palette)?;
        }
        let object = Arc::new(object);
        self.objects.insert(name.into(), Arc::clone(&object));
        Ok(object)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<VoxelObject>> {
        self.objects.get(name)
    }

    /// New instance of a stored object, sharing its geometry
    pub fn instantiate(&self, name: &str, position: Vec3) -> Option<ObjectInstance> {
        self.get(name)
            .map(|object| ObjectInstance::new(Arc::clone(object), position))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn palette() -> Arc<MaterialPalette> {
        let mut palette = MaterialPalette::new();
        palette.register_color("stone", Vec4::ONE).unwrap();
        Arc::new(palette)
    }

    fn cube_grid(size: u32, edge: u32) -> VoxelGrid {
        let mut grid = VoxelGrid::new(size);
        for z in 0..edge {
            for y in 0..edge {
                for x in 0..edge {
                    grid.set(x, y, z, 1);
                }
            }
        }
        grid
    }

    #[test]
    fn test_object_requires_power_of_two() {
        assert!(VoxelObject::new(8).is_ok());
        assert!(matches!(VoxelObject::new(6), Err(Error::MalformedVoxelData(_))));
    }

    #[test]
    fn test_object_entity_builds_geometry() {
        let part = VoxelObject::from_grid(cube_grid(8, 2), IVec3::ZERO).unwrap();
        let entity = VoxelEntity::object("crate", vec![part], palette()).unwrap();
        assert!(!entity.needs_rebuild());
        assert_eq!(entity.parts[0].mesh().quad_count(), 6);
        assert_eq!(entity.parts[0].colliders().len(), 1);
        assert_eq!(entity.mass(), 8.0);
        assert_eq!(entity.geometry_revision(), 1);
    }

    #[test]
    fn test_dynamic_mesh_rebuild_after_edit() {
        let mut entity = VoxelEntity::dynamic_mesh("blob", cube_grid(8, 2), palette()).unwrap();
        assert_eq!(entity.kind, EntityKind::DynamicMesh);
        assert!(entity.set_voxel(IVec3::new(1, 1, 1), EMPTY));
        assert!(entity.needs_rebuild());
        assert!(entity.rebuild_dirty().unwrap());
        assert_eq!(entity.solid_count(), 7);
        assert_eq!(entity.geometry_revision(), 2);
        assert!(!entity.rebuild_dirty().unwrap());
    }

    #[test]
    fn test_failed_rebuild_keeps_previous_mesh() {
        let mut entity = VoxelEntity::dynamic_mesh("blob", cube_grid(8, 1), palette()).unwrap();
        let before = Arc::clone(entity.parts[0].mesh());
        entity.set_voxel(IVec3::new(4, 4, 4), 77);
        assert!(entity.rebuild_dirty().is_err());
        assert!(Arc::ptr_eq(&before, entity.parts[0].mesh()));
        assert!(entity.needs_rebuild());
    }

    #[test]
    fn test_parts_offset_in_entity_space() {
        let a = VoxelObject::from_grid(cube_grid(4, 1), IVec3::ZERO).unwrap();
        let b = VoxelObject::from_grid(cube_grid(4, 1), IVec3::new(4, 0, 0)).unwrap();
        let entity = VoxelEntity::object("pair", vec![a, b], palette()).unwrap();
        assert_eq!(entity.get_voxel(IVec3::new(4, 0, 0)), 1);
        assert_eq!(entity.get_voxel(IVec3::new(5, 0, 0)), EMPTY);
        assert_eq!(entity.get_voxel(IVec3::new(-1, 0, 0)), EMPTY);
        let shape = entity.collision_shape();
        assert_eq!(shape.boxes[1].min, Vec3::new(4.0, 0.0, 0.0));
        assert_eq!(entity.local_bounds(), Aabb::new(Vec3::ZERO, Vec3::new(8.0, 4.0, 4.0)));
    }

    #[test]
    fn test_world_chunk_proxy() {
        let entity = VoxelEntity::world_chunk(ChunkCoord::new(1, 0, -1), 16, palette());
        assert_eq!(entity.kind, EntityKind::WorldChunk(ChunkCoord::new(1, 0, -1)));
        assert!(entity.is_static);
        assert_eq!(entity.transform.translation, Vec3::new(16.0, 0.0, -16.0));
        assert!(entity.collision_shape().is_empty());
    }

    #[test]
    fn test_instances_share_geometry() {
        let mut library = ObjectLibrary::new();
        let object = VoxelObject::from_grid(cube_grid(4, 2), IVec3::ZERO).unwrap();
        library.add("box", object, &palette()).unwrap();

        let a = library.instantiate("box", Vec3::ZERO).unwrap();
        let b = library.instantiate("box", Vec3::new(10.0, 0.0, 0.0)).unwrap().with_scale(2.0);
        assert!(Arc::ptr_eq(a.mesh(), b.mesh()));
        assert!(library.instantiate("missing", Vec3::ZERO).is_none());

        let bounds = b.world_bounds();
        assert_eq!(bounds.min, Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(14.0, 4.0, 4.0));
    }
}
