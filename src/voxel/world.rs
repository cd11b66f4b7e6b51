//! Voxel world: loaded chunks, edits, streaming and regeneration.
//!
//! The world exclusively owns its chunks. Edits mark chunks dirty, `tick`
//! turns dirty chunks into background mesh and collider jobs and applies
//! the results that come back. Meshes leave through the upload queue;
//! collider swaps and body releases wait for `sync_physics`, which runs on
//! the physics thread.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{IVec3, UVec3, Vec3};

use crate::core::config::WorldConfig;
use crate::core::context::EngineContext;
use crate::core::error::Error;
use crate::core::profiler::Profiler;
use crate::core::types::{Result, Transform};
use crate::physics::{BodyHandle, ColliderBox, CollisionShape, PhysicsSystem};
use crate::render::upload::{MeshUpload, MeshUploadQueue, RenderCommand};
use crate::voxel::chunk::{Chunk, ChunkCoord, Face, NeighborFaces};
use crate::voxel::edit::{ChunkInvalidator, EditOp};
use crate::voxel::object::VoxelEntity;
use crate::voxel::palette::{MaterialEntry, MaterialId, MaterialPalette, PhysicalMaterial, SceneMaterial};
use crate::voxel::streaming::{ChunkPool, ChunkPoolStats, ChunkSnapshot, JobKind, JobOutput, JobPayload, JobResult, JobScheduler};
use crate::voxel::terrain::TerrainSource;

/// Snapshot of world bookkeeping
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorldStats {
    pub loaded_chunks: usize,
    pub dirty_chunks: usize,
    pub jobs_in_flight: usize,
    pub pooled_chunks: usize,
    /// Collider swaps and body releases waiting for `sync_physics`
    pub pending_physics: usize,
}

/// What one `tick` did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub submitted: usize,
    pub applied: usize,
    /// Results for unloaded, reloaded or cancelled chunks
    pub discarded: usize,
    /// Jobs that failed; the previous result was kept
    pub failed: usize,
}

impl TickStats {
    fn merge(&mut self, other: TickStats) {
        self.submitted += other.submitted;
        self.applied += other.applied;
        self.discarded += other.discarded;
        self.failed += other.failed;
    }
}

/// What one `sync_physics` did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhysicsSyncStats {
    pub added: usize,
    pub replaced: usize,
    pub removed: usize,
    /// Swaps left queued because the body budget is exhausted
    pub deferred: usize,
}

struct ColliderSwap {
    generation: u64,
    colliders: Arc<Vec<ColliderBox>>,
}

pub struct VoxelWorld {
    config: WorldConfig,
    profiler: Arc<Profiler>,
    chunks: HashMap<ChunkCoord, Box<Chunk>>,
    pool: ChunkPool,
    scheduler: JobScheduler,
    terrain: Arc<dyn TerrainSource>,
    palette: Arc<MaterialPalette>,
    invalidator: ChunkInvalidator,
    uploads: MeshUploadQueue,
    collider_swaps: BTreeMap<ChunkCoord, ColliderSwap>,
    body_releases: Vec<BodyHandle>,
    /// Bumped on every load; results from an older occupancy never apply
    next_generation: u64,
}

impl VoxelWorld {
    pub fn new(
        ctx: &EngineContext,
        terrain: Arc<dyn TerrainSource>,
        palette: Arc<MaterialPalette>,
    ) -> Self {
        let config = ctx.config().world.clone();
        let pool = ChunkPool::new(config.chunk_size, config.mask_block_size, config.pool_capacity);
        let scheduler = JobScheduler::new(ctx.config().jobs.worker_threads);
        log::info!(
            "Voxel world: {}^3 chunks, streaming radius {}",
            config.chunk_size,
            config.streaming_radius
        );
        Self {
            invalidator: ChunkInvalidator::new(config.chunk_size),
            config,
            profiler: Arc::clone(ctx.profiler()),
            chunks: HashMap::new(),
            pool,
            scheduler,
            terrain,
            palette,
            uploads: MeshUploadQueue::new(),
            collider_swaps: BTreeMap::new(),
            body_releases: Vec::new(),
            next_generation: 0,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.config.chunk_size
    }

    pub fn palette(&self) -> &Arc<MaterialPalette> {
        &self.palette
    }

    /// Append a material. Jobs in flight keep the palette they were given.
    pub fn register_material(
        &mut self,
        name: impl Into<String>,
        physical: PhysicalMaterial,
        scene: SceneMaterial,
    ) -> Result<MaterialId> {
        Arc::make_mut(&mut self.palette).register(name, physical, scene)
    }

    pub fn material(&self, id: MaterialId) -> Option<&MaterialEntry> {
        self.palette.get(id)
    }

    /// Shared handle to the mesh upload queue, for the graphics thread
    pub fn upload_queue(&self) -> MeshUploadQueue {
        self.uploads.clone()
    }

    pub fn is_loaded(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&coord)
    }

    pub fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.chunks.get(&coord).map(|c| c.as_ref())
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Loaded coordinates, sorted
    pub fn loaded_coords(&self) -> Vec<ChunkCoord> {
        let mut coords: Vec<_> = self.chunks.keys().copied().collect();
        coords.sort();
        coords
    }

    pub fn pool_stats(&self) -> ChunkPoolStats {
        self.pool.stats()
    }

    pub fn stats(&self) -> WorldStats {
        WorldStats {
            loaded_chunks: self.chunks.len(),
            dirty_chunks: self
                .chunks
                .values()
                .filter(|c| c.is_dirty_mesh() || c.is_dirty_collider())
                .count(),
            jobs_in_flight: self.scheduler.in_flight(),
            pooled_chunks: self.pool.pooled(),
            pending_physics: self.collider_swaps.len() + self.body_releases.len(),
        }
    }

    /// Load `coord` from the terrain source; both dirty flags start raised.
    ///
    /// Fails with `MalformedVoxelData` if the terrain writes a material the
    /// palette does not hold; the chunk is not loaded.
    pub fn load_chunk(&mut self, coord: ChunkCoord) -> Result<()> {
        if self.chunks.contains_key(&coord) {
            return Err(Error::AlreadyLoaded(coord));
        }

        self.next_generation += 1;
        let mut chunk = self.pool.acquire(coord, self.next_generation);
        let terrain = Arc::clone(&self.terrain);
        chunk.fill_with(|grid| terrain.generate(coord, grid));
        if let Err(e) = self.palette.check_cells(chunk.voxels().cells()) {
            log::warn!("Terrain for chunk {:?} is malformed: {}", coord, e);
            self.pool.release(chunk);
            return Err(e);
        }
        self.chunks.insert(coord, chunk);

        self.invalidator.mark_neighbors_of(coord);
        self.flush_invalidations();
        log::debug!("Loaded chunk {:?} (generation {})", coord, self.next_generation);
        Ok(())
    }

    /// Unload `coord`: cancel its jobs, queue its body for release and
    /// return its storage to the pool
    pub fn unload_chunk(&mut self, coord: ChunkCoord) -> Result<()> {
        let mut chunk = self.chunks.remove(&coord).ok_or(Error::NotLoaded(coord))?;

        chunk.cancel_jobs();
        if let Some(body) = chunk.body.take() {
            self.body_releases.push(body);
        }
        self.collider_swaps.remove(&coord);
        if chunk.mesh.is_some() {
            self.uploads.push(RenderCommand::Release(coord));
        }
        self.pool.release(chunk);

        self.invalidator.mark_neighbors_of(coord);
        self.flush_invalidations();
        log::debug!("Unloaded chunk {:?}", coord);
        Ok(())
    }

    /// Unload every chunk
    pub fn unload_all(&mut self) {
        for coord in self.loaded_coords() {
            // Only fails for coordinates that are not loaded
            let _ = self.unload_chunk(coord);
        }
    }

    /// Load every chunk within the streaming radius of any point and unload
    /// the rest. Returns `(loaded, unloaded)` counts.
    pub fn update_streaming(&mut self, points_of_interest: &[Vec3]) -> Result<(usize, usize)> {
        let profiler = Arc::clone(&self.profiler);
        let _scope = profiler.scope("world_streaming");
        let radius = self.config.streaming_radius;
        let size = self.config.chunk_size;

        let centers: Vec<ChunkCoord> = points_of_interest
            .iter()
            .map(|&p| ChunkCoord::from_world_pos(p, size))
            .collect();
        let mut wanted = HashSet::new();
        for center in &centers {
            for z in -radius..=radius {
                for y in -radius..=radius {
                    for x in -radius..=radius {
                        wanted.insert(ChunkCoord::new(center.x + x, center.y + y, center.z + z));
                    }
                }
            }
        }

        let mut unload: Vec<ChunkCoord> = self
            .chunks
            .keys()
            .filter(|c| !wanted.contains(c))
            .copied()
            .collect();
        unload.sort();
        for &coord in &unload {
            self.unload_chunk(coord)?;
        }

        // Nearest first so the area around the viewer fills in first
        let mut load: Vec<ChunkCoord> = wanted
            .into_iter()
            .filter(|c| !self.chunks.contains_key(c))
            .collect();
        load.sort_by_key(|c| {
            let d = centers.iter().map(|p| p.chebyshev_distance(c)).min().unwrap_or(0);
            (d, *c)
        });
        for &coord in &load {
            self.load_chunk(coord)?;
        }

        if !load.is_empty() || !unload.is_empty() {
            log::debug!("Streaming: loaded {}, unloaded {}", load.len(), unload.len());
        }
        Ok((load.len(), unload.len()))
    }

    fn chunk_mut_checked(&mut self, coord: ChunkCoord, local: IVec3) -> Result<(&mut Chunk, UVec3)> {
        let chunk = self
            .chunks
            .get_mut(&coord)
            .map(|c| c.as_mut())
            .ok_or(Error::OutOfRange { coord, local })?;
        let local = chunk.check_local(local)?;
        Ok((chunk, local))
    }

    fn check_material(&self, material: MaterialId) -> Result<()> {
        if self.palette.contains(material) {
            Ok(())
        } else {
            Err(Error::MalformedVoxelData(format!(
                "material {} is not in the palette",
                material
            )))
        }
    }

    /// Write one voxel. Returns true if the voxel changed.
    ///
    /// Fails with `OutOfRange` if the chunk is not loaded or `local` is
    /// outside it. The chunk and every face neighbour bordering the voxel
    /// are marked dirty.
    pub fn set_voxel(&mut self, coord: ChunkCoord, local: IVec3, material: MaterialId) -> Result<bool> {
        self.check_material(material)?;
        let (chunk, local) = self.chunk_mut_checked(coord, local)?;
        if !chunk.set_voxel(local, material) {
            return Ok(false);
        }
        self.invalidator.mark_voxel(coord, local);
        self.flush_invalidations();
        Ok(true)
    }

    pub fn get_voxel(&self, coord: ChunkCoord, local: IVec3) -> Result<MaterialId> {
        let chunk = self
            .chunks
            .get(&coord)
            .ok_or(Error::OutOfRange { coord, local })?;
        Ok(chunk.get(chunk.check_local(local)?))
    }

    /// Write a voxel addressed in world voxel coordinates
    pub fn set_voxel_world(&mut self, position: IVec3, material: MaterialId) -> Result<bool> {
        let (coord, local) = ChunkCoord::from_voxel(position, self.config.chunk_size);
        self.set_voxel(coord, local.as_ivec3(), material)
    }

    pub fn get_voxel_world(&self, position: IVec3) -> Result<MaterialId> {
        let (coord, local) = ChunkCoord::from_voxel(position, self.config.chunk_size);
        self.get_voxel(coord, local.as_ivec3())
    }

    /// Apply an edit. Every chunk it touches must be loaded; nothing is
    /// written otherwise. Returns the number of voxels that changed.
    pub fn apply_edit(&mut self, op: &EditOp) -> Result<usize> {
        let size = self.config.chunk_size;
        self.check_material(op.material())?;
        for coord in op.affected_chunks(size) {
            if !self.chunks.contains_key(&coord) {
                let local = op.bounds().0 - coord.as_ivec3() * size as i32;
                return Err(Error::OutOfRange { coord, local });
            }
        }

        let material = op.material();
        let mut changed = 0;
        for position in op.positions() {
            let (coord, local) = ChunkCoord::from_voxel(position, size);
            let Some(chunk) = self.chunks.get_mut(&coord) else {
                continue;
            };
            if chunk.set_voxel(local, material) {
                self.invalidator.mark_voxel(coord, local);
                changed += 1;
            }
        }
        self.flush_invalidations();
        log::trace!("Applied {:?}: {} voxels changed", op, changed);
        Ok(changed)
    }

    /// Apply recorded dirty marks to chunks that are loaded
    fn flush_invalidations(&mut self) {
        for (coord, kind) in self.invalidator.take_dirty() {
            let Some(chunk) = self.chunks.get_mut(&coord) else {
                continue;
            };
            if kind.mesh {
                chunk.mark_mesh_dirty();
            }
            if kind.collider {
                chunk.mark_collider_dirty();
            }
        }
    }

    /// Apply finished job results, then submit jobs for dirty chunks that
    /// have none in flight
    pub fn tick(&mut self) -> TickStats {
        let profiler = Arc::clone(&self.profiler);
        let _scope = profiler.scope("world_tick");

        let mut stats = TickStats::default();
        for result in self.scheduler.drain() {
            stats.merge(self.apply_result(result));
        }
        stats.submitted = self.submit_jobs();
        stats
    }

    fn apply_result(&mut self, result: JobResult) -> TickStats {
        let mut stats = TickStats::default();
        let JobResult { id, kind, coord, generation, revision, cancelled, output, elapsed } = result;

        let chunk = match self.chunks.get_mut(&coord) {
            Some(chunk) if chunk.generation() == generation && !cancelled => chunk,
            _ => {
                log::trace!("Dropping {:?} job {} for {:?}: chunk gone or reloaded", kind, id, coord);
                stats.discarded = 1;
                return stats;
            }
        };

        let slot = match kind {
            JobKind::Mesh => &mut chunk.mesh_job,
            JobKind::Collider => &mut chunk.collider_job,
        };
        if slot.as_ref().map(|t| t.id) != Some(id) {
            stats.discarded = 1;
            return stats;
        }
        *slot = None;

        match output {
            Some(Ok(JobOutput::Mesh(mesh))) => {
                let mesh = Arc::new(mesh);
                let bounds = if mesh.is_empty() {
                    mesh.bounds
                } else {
                    mesh.bounds.translated(coord.world_origin(chunk.size()))
                };
                chunk.mesh = Some(Arc::clone(&mesh));
                chunk.settle_mesh(revision);
                self.uploads.push(RenderCommand::Upload(MeshUpload { coord, mesh, bounds }));
                stats.applied = 1;
            }
            Some(Ok(JobOutput::Collider(boxes))) => {
                // Identical boxes leave the body untouched
                if chunk.colliders.as_deref().map(Vec::as_slice) != Some(boxes.as_slice()) {
                    let colliders = Arc::new(boxes);
                    chunk.colliders = Some(Arc::clone(&colliders));
                    self.collider_swaps.insert(coord, ColliderSwap { generation, colliders });
                }
                chunk.settle_collider(revision);
                stats.applied = 1;
            }
            Some(Err(e)) => {
                log::warn!(
                    "{:?} job for chunk {:?} failed, keeping previous result: {}",
                    kind,
                    coord,
                    e
                );
                match kind {
                    JobKind::Mesh => chunk.settle_mesh(revision),
                    JobKind::Collider => chunk.settle_collider(revision),
                };
                stats.failed = 1;
            }
            None => stats.discarded = 1,
        }
        log::trace!("{:?} job {} for {:?} done in {:?}", kind, id, coord, elapsed);
        stats
    }

    /// Boundary layers of the loaded face neighbours of `coord`
    fn neighbor_faces(&self, coord: ChunkCoord) -> NeighborFaces {
        let mut faces = NeighborFaces::default();
        for face in Face::ALL {
            if let Some(n) = self.chunks.get(&coord.neighbor(face)) {
                faces.slabs[face.index()] = Some(Arc::from(n.voxels().face_slab(face.opposite())));
            }
        }
        faces
    }

    fn submit_jobs(&mut self) -> usize {
        let mut pending: Vec<(ChunkCoord, bool, bool)> = self
            .chunks
            .iter()
            .filter_map(|(&coord, c)| {
                let mesh = c.is_dirty_mesh() && c.mesh_job.is_none();
                let collider = c.is_dirty_collider() && c.collider_job.is_none();
                (mesh || collider).then_some((coord, mesh, collider))
            })
            .collect();
        pending.sort_by_key(|&(coord, ..)| coord);

        let mut submitted = 0;
        for (coord, mesh, collider) in pending {
            let neighbors = if mesh { Some(self.neighbor_faces(coord)) } else { None };
            let Some(chunk) = self.chunks.get_mut(&coord) else {
                continue;
            };
            let snapshot = ChunkSnapshot {
                coord,
                generation: chunk.generation(),
                voxels: chunk.snapshot(),
                mask: chunk.mask().clone(),
            };

            if let Some(neighbors) = neighbors {
                let ticket = self.scheduler.submit(
                    chunk.mesh_revision,
                    JobPayload::Mesh {
                        snapshot: snapshot.clone(),
                        neighbors,
                        palette: Arc::clone(&self.palette),
                    },
                );
                chunk.mesh_job = Some(ticket);
                submitted += 1;
            }
            if collider {
                let ticket = self
                    .scheduler
                    .submit(chunk.collider_revision, JobPayload::Collider { snapshot });
                chunk.collider_job = Some(ticket);
                submitted += 1;
            }
        }
        submitted
    }

    /// Tick until no chunk is dirty and no job is in flight, or until
    /// `timeout` passes. Returns true if the world settled.
    pub fn wait_for_jobs(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.tick();
            let stats = self.stats();
            if stats.jobs_in_flight == 0 && stats.dirty_chunks == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "Timed out waiting for jobs: {} in flight, {} dirty chunks",
                    stats.jobs_in_flight,
                    stats.dirty_chunks
                );
                return false;
            }
            if stats.jobs_in_flight > 0 {
                if let Some(result) = self.scheduler.wait_one(deadline - now) {
                    self.apply_result(result);
                }
            }
        }
    }

    /// Hand queued collider swaps and body releases to the physics system.
    ///
    /// Must run on the physics thread. When the body budget is exhausted the
    /// swap stays queued and is retried on the next call.
    pub fn sync_physics(&mut self, physics: &mut PhysicsSystem) -> Result<PhysicsSyncStats> {
        let profiler = Arc::clone(&self.profiler);
        let _scope = profiler.scope("world_sync_physics");
        let mut stats = PhysicsSyncStats::default();

        while let Some(handle) = self.body_releases.pop() {
            match physics.remove_body(handle) {
                Ok(()) => stats.removed += 1,
                Err(Error::InvalidHandle) => {
                    log::warn!("Chunk body {:?} was already removed", handle.0);
                }
                Err(e) => {
                    self.body_releases.push(handle);
                    return Err(e);
                }
            }
        }

        let swaps = std::mem::take(&mut self.collider_swaps);
        let mut swaps = swaps.into_iter();
        while let Some((coord, swap)) = swaps.next() {
            match self.apply_swap(physics, coord, &swap) {
                Ok(SwapOutcome::Added) => stats.added += 1,
                Ok(SwapOutcome::Replaced) => stats.replaced += 1,
                Ok(SwapOutcome::Removed) => stats.removed += 1,
                Ok(SwapOutcome::Skipped) => {}
                Err(Error::CapacityExceeded { capacity }) => {
                    log::warn!(
                        "Body budget ({}) exhausted, deferring collider for {:?}",
                        capacity,
                        coord
                    );
                    self.collider_swaps.insert(coord, swap);
                    stats.deferred += 1;
                }
                Err(e) => {
                    self.collider_swaps.insert(coord, swap);
                    self.collider_swaps.extend(swaps);
                    return Err(e);
                }
            }
        }
        Ok(stats)
    }

    fn apply_swap(
        &mut self,
        physics: &mut PhysicsSystem,
        coord: ChunkCoord,
        swap: &ColliderSwap,
    ) -> Result<SwapOutcome> {
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            return Ok(SwapOutcome::Skipped);
        };
        if chunk.generation() != swap.generation {
            return Ok(SwapOutcome::Skipped);
        }

        let existing = chunk.body.filter(|&h| physics.is_valid(h));
        if swap.colliders.is_empty() {
            chunk.body = None;
            return match existing {
                Some(handle) => physics.remove_body(handle).map(|_| SwapOutcome::Removed),
                None => Ok(SwapOutcome::Skipped),
            };
        }

        let shape = Arc::new(CollisionShape::from_boxes(swap.colliders.to_vec(), &self.palette));
        match existing {
            Some(handle) => {
                physics.replace_shape(handle, shape)?;
                Ok(SwapOutcome::Replaced)
            }
            None => {
                let transform = Transform::from_translation(coord.world_origin(chunk.size()));
                chunk.body = Some(physics.add_body(shape, transform, true)?);
                Ok(SwapOutcome::Added)
            }
        }
    }

    /// Entity proxy for a loaded chunk, carrying its body handle
    pub fn chunk_entity(&self, coord: ChunkCoord) -> Option<VoxelEntity> {
        let chunk = self.chunks.get(&coord)?;
        let mut entity = VoxelEntity::world_chunk(coord, chunk.size(), Arc::clone(&self.palette));
        entity.body = chunk.body();
        Some(entity)
    }
}

enum SwapOutcome {
    Added,
    Replaced,
    Removed,
    Skipped,
}

impl Drop for VoxelWorld {
    fn drop(&mut self) {
        for chunk in self.chunks.values_mut() {
            chunk.cancel_jobs();
        }
        let bodies = self.chunks.values().filter(|c| c.body().is_some()).count() + self.body_releases.len();
        if bodies > 0 {
            log::warn!("Voxel world dropped with {} chunk bodies still registered", bodies);
        }
    }
}
