//! Physics system: body lifecycle and engine/simulation translation.
//!
//! The system owns the simulation backend and hands out generation-checked
//! [`BodyHandle`]s. Every call must come from one logical thread; the
//! voxel world marshals collider results to that thread before calling in.

use std::sync::Arc;

use glam::Vec3;

use super::backend::{BasicSimulation, BodyDesc, BodyId, Contact, MotionType, SimulationBackend};
use super::collider::CollisionShape;
use super::layers::{DefaultLayerFilter, LogActivationListener, ObjectLayer};
use crate::core::config::PhysicsConfig;
use crate::core::context::EngineContext;
use crate::core::error::Error;
use crate::core::handle::{Handle, HandleArena};
use crate::core::profiler::Profiler;
use crate::core::time::FixedTimestep;
use crate::core::types::{Result, Transform};
use crate::voxel::object::{EntityKind, VoxelEntity};
use crate::voxel::palette::MaterialPalette;

/// Generation-checked reference to a simulation body
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BodyHandle(pub Handle);

impl BodyHandle {
    pub const NULL: BodyHandle = BodyHandle(Handle::NULL);
}

/// Lifecycle state of a body handle. `Removed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyState {
    Unregistered,
    Active { motion: MotionType, sensor: bool },
    Removed,
}

#[derive(Clone, Copy, Debug)]
struct BodyRecord {
    id: BodyId,
    motion: MotionType,
    sensor: bool,
}

pub struct PhysicsSystem {
    config: PhysicsConfig,
    profiler: Arc<Profiler>,
    backend: Option<Box<dyn SimulationBackend>>,
    bodies: HandleArena<BodyRecord>,
    timestep: FixedTimestep,
}

impl PhysicsSystem {
    pub fn new(ctx: &EngineContext) -> Self {
        let config = ctx.config().physics.clone();
        let timestep = FixedTimestep::new(config.fixed_timestep, config.max_substeps);
        Self {
            config,
            profiler: Arc::clone(ctx.profiler()),
            backend: None,
            bodies: HandleArena::new(),
            timestep,
        }
    }

    /// Start the built-in simulation
    pub fn initialize(&mut self) {
        let backend = BasicSimulation::new(
            self.config.max_bodies,
            Vec3::from_array(self.config.gravity),
            Box::new(DefaultLayerFilter),
            Box::new(LogActivationListener),
        );
        self.initialize_with(Box::new(backend));
    }

    /// Start with a caller-provided backend. A running simulation is shut
    /// down first.
    pub fn initialize_with(&mut self, backend: Box<dyn SimulationBackend>) {
        if self.backend.is_some() {
            self.shutdown();
        }
        log::info!(
            "Physics initialized: capacity={}, step={:.4}s",
            backend.capacity().min(self.config.max_bodies),
            self.config.fixed_timestep
        );
        self.backend = Some(backend);
        self.timestep.reset();
    }

    /// Release every outstanding body and drop the simulation
    pub fn shutdown(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };
        let released = self.bodies.drain();
        for (_, record) in &released {
            backend.destroy_body(record.id);
        }
        log::info!("Physics shut down, released {} bodies", released.len());
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    fn backend_mut(&mut self) -> Result<&mut Box<dyn SimulationBackend>> {
        self.backend.as_mut().ok_or(Error::NotInitialized)
    }

    /// Resolve a handle to its record and the backend
    fn resolve(&self, handle: BodyHandle) -> Result<(BodyRecord, &dyn SimulationBackend)> {
        let backend = self.backend.as_deref().ok_or(Error::NotInitialized)?;
        let record = *self.bodies.get(handle.0).ok_or(Error::InvalidHandle)?;
        Ok((record, backend))
    }

    fn resolve_mut(&mut self, handle: BodyHandle) -> Result<(BodyRecord, &mut dyn SimulationBackend)> {
        let backend = self.backend.as_deref_mut().ok_or(Error::NotInitialized)?;
        let record = *self.bodies.get(handle.0).ok_or(Error::InvalidHandle)?;
        Ok((record, backend))
    }

    /// Register a static or dynamic body
    pub fn add_body(
        &mut self,
        shape: Arc<CollisionShape>,
        transform: Transform,
        is_static: bool,
    ) -> Result<BodyHandle> {
        let motion = if is_static { MotionType::Static } else { MotionType::Dynamic };
        self.add_body_as(shape, transform, motion, false)
    }

    /// Register a body with an explicit motion type. On failure nothing is
    /// left registered.
    pub fn add_body_as(
        &mut self,
        shape: Arc<CollisionShape>,
        transform: Transform,
        motion: MotionType,
        sensor: bool,
    ) -> Result<BodyHandle> {
        let budget = self.config.max_bodies;
        let registered = self.bodies.len();
        let backend = self.backend_mut()?;
        let capacity = budget.min(backend.capacity());
        if registered >= capacity {
            return Err(Error::CapacityExceeded { capacity });
        }

        let id = backend
            .create_body(BodyDesc {
                shape,
                transform,
                motion,
                layer: ObjectLayer::for_motion(motion),
                sensor,
            })
            .ok_or(Error::CapacityExceeded { capacity })?;

        let handle = BodyHandle(self.bodies.insert(BodyRecord { id, motion, sensor }));
        log::trace!("Added {:?} body {:?} as {:?}", motion, id, handle.0);
        Ok(handle)
    }

    /// Free the body's slot. Copies of `handle` stop resolving.
    pub fn remove_body(&mut self, handle: BodyHandle) -> Result<()> {
        let backend = self.backend.as_mut().ok_or(Error::NotInitialized)?;
        let record = self.bodies.remove(handle.0).ok_or(Error::InvalidHandle)?;
        backend.destroy_body(record.id);
        log::trace!("Removed body {:?}", record.id);
        Ok(())
    }

    /// Generation check: false once the body was removed, even if its slot
    /// now holds another body
    pub fn is_valid(&self, handle: BodyHandle) -> bool {
        self.backend.is_some() && self.bodies.contains(handle.0)
    }

    pub fn body_state(&self, handle: BodyHandle) -> BodyState {
        if let Some(record) = self.bodies.get(handle.0) {
            return BodyState::Active {
                motion: record.motion,
                sensor: record.sensor,
            };
        }
        match self.bodies.slot_generation(handle.0.index) {
            Some(generation) if !handle.0.is_null() && generation != handle.0.generation => {
                BodyState::Removed
            }
            _ => BodyState::Unregistered,
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn capacity(&self) -> usize {
        self.backend
            .as_ref()
            .map_or(0, |b| b.capacity().min(self.config.max_bodies))
    }

    /// Swap the collision shape without re-registering the body
    pub fn replace_shape(&mut self, handle: BodyHandle, shape: Arc<CollisionShape>) -> Result<()> {
        let (record, backend) = self.resolve_mut(handle)?;
        backend.set_shape(record.id, shape);
        Ok(())
    }

    pub fn body_shape(&self, handle: BodyHandle) -> Result<Arc<CollisionShape>> {
        let (record, backend) = self.resolve(handle)?;
        Ok(Arc::clone(backend.shape(record.id)))
    }

    /// Engine-side write of a body transform. Static bodies never move, so
    /// this is a no-op for them.
    pub fn set_body_transform(&mut self, handle: BodyHandle, transform: Transform) -> Result<()> {
        let (record, backend) = self.resolve_mut(handle)?;
        if record.motion == MotionType::Static {
            return Ok(());
        }
        backend.set_transform(record.id, transform);
        Ok(())
    }

    /// Current simulation transform of any body
    pub fn body_transform(&self, handle: BodyHandle) -> Result<Transform> {
        let (record, backend) = self.resolve(handle)?;
        Ok(backend.transform(record.id))
    }

    /// Simulation-side truth for dynamic bodies; `None` for bodies whose
    /// transform the engine owns
    pub fn sync_body_transform(&self, handle: BodyHandle) -> Result<Option<Transform>> {
        let (record, backend) = self.resolve(handle)?;
        if record.motion != MotionType::Dynamic {
            return Ok(None);
        }
        Ok(Some(backend.transform(record.id)))
    }

    pub fn set_body_type(&mut self, handle: BodyHandle, motion: MotionType) -> Result<()> {
        let (record, backend) = self.resolve_mut(handle)?;
        if record.motion == motion {
            return Ok(());
        }
        backend.set_motion_type(record.id, motion, ObjectLayer::for_motion(motion));
        if let Some(record) = self.bodies.get_mut(handle.0) {
            record.motion = motion;
        }
        Ok(())
    }

    /// Toggle between kinematic and dynamic. Static bodies are left alone.
    pub fn set_body_kinematic(&mut self, handle: BodyHandle, kinematic: bool) -> Result<()> {
        let (record, _) = self.resolve(handle)?;
        if record.motion == MotionType::Static {
            return Ok(());
        }
        let motion = if kinematic { MotionType::Kinematic } else { MotionType::Dynamic };
        self.set_body_type(handle, motion)
    }

    pub fn set_body_sensor(&mut self, handle: BodyHandle, sensor: bool) -> Result<()> {
        let (record, backend) = self.resolve_mut(handle)?;
        backend.set_sensor(record.id, sensor);
        if let Some(record) = self.bodies.get_mut(handle.0) {
            record.sensor = sensor;
        }
        Ok(())
    }

    pub fn linear_velocity(&self, handle: BodyHandle) -> Result<Vec3> {
        let (record, backend) = self.resolve(handle)?;
        Ok(backend.linear_velocity(record.id))
    }

    pub fn set_linear_velocity(&mut self, handle: BodyHandle, velocity: Vec3) -> Result<()> {
        let (record, backend) = self.resolve_mut(handle)?;
        backend.set_linear_velocity(record.id, velocity);
        Ok(())
    }

    pub fn angular_velocity(&self, handle: BodyHandle) -> Result<Vec3> {
        let (record, backend) = self.resolve(handle)?;
        Ok(backend.angular_velocity(record.id))
    }

    pub fn set_angular_velocity(&mut self, handle: BodyHandle, velocity: Vec3) -> Result<()> {
        let (record, backend) = self.resolve_mut(handle)?;
        backend.set_angular_velocity(record.id, velocity);
        Ok(())
    }

    pub fn is_body_active(&self, handle: BodyHandle) -> Result<bool> {
        let (record, backend) = self.resolve(handle)?;
        Ok(backend.is_active(record.id))
    }

    /// Advance by whole fixed steps. Returns the number of steps run.
    pub fn update(&mut self, dt: f32) -> Result<u32> {
        let backend = self.backend.as_mut().ok_or(Error::NotInitialized)?;
        let steps = self.timestep.advance(dt);
        let step = self.timestep.step();
        let profiler = Arc::clone(&self.profiler);
        let _scope = profiler.scope("physics_update");
        for _ in 0..steps {
            backend.step(step);
        }
        Ok(steps)
    }

    /// Interpolation factor between the last two steps
    pub fn alpha(&self) -> f32 {
        self.timestep.alpha()
    }

    /// Contacts from the last step, as handles
    pub fn contacts(&self) -> Vec<(BodyHandle, BodyHandle)> {
        let Some(backend) = self.backend.as_ref() else {
            return Vec::new();
        };
        let lookup = |id: BodyId| {
            self.bodies
                .iter()
                .find(|(_, r)| r.id == id)
                .map(|(h, _)| BodyHandle(h))
        };
        backend
            .contacts()
            .iter()
            .filter_map(|&Contact { a, b }| Some((lookup(a)?, lookup(b)?)))
            .collect()
    }

    /// Create, update or drop the entity's body to match its current parts.
    ///
    /// Returns the live handle, or `None` if the entity has no solid voxels.
    /// World chunk proxies are left alone: their bodies belong to the world
    /// and change only through `VoxelWorld::sync_physics`.
    pub fn register_entity(
        &mut self,
        entity: &mut VoxelEntity,
        palette: &MaterialPalette,
    ) -> Result<Option<BodyHandle>> {
        if let EntityKind::WorldChunk(coord) = entity.kind {
            log::warn!("Ignoring register_entity for world chunk {:?}", coord);
            return Ok(entity.body.filter(|h| self.is_valid(*h)));
        }
        let shape = CollisionShape::compound(
            entity
                .parts
                .iter()
                .map(|p| (p.position.as_vec3(), p.colliders().as_slice())),
            palette,
        );
        let existing = entity.body.filter(|h| self.is_valid(*h));

        if shape.is_empty() {
            if let Some(handle) = existing {
                self.remove_body(handle)?;
            }
            entity.body = None;
            return Ok(None);
        }

        let shape = Arc::new(shape);
        let handle = match existing {
            Some(handle) => {
                self.replace_shape(handle, shape)?;
                handle
            }
            None => {
                let motion = if entity.is_static { MotionType::Static } else { MotionType::Dynamic };
                self.add_body_as(shape, entity.transform, motion, entity.is_trigger)?
            }
        };
        entity.body = Some(handle);
        Ok(Some(handle))
    }

    /// Copy the simulation transform into a dynamic entity. Returns true if
    /// the entity moved.
    pub fn sync_entity(&self, entity: &mut VoxelEntity) -> Result<bool> {
        let Some(handle) = entity.body else {
            return Ok(false);
        };
        match self.sync_body_transform(handle)? {
            Some(transform) if transform != entity.transform => {
                entity.transform = transform;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl Drop for PhysicsSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
