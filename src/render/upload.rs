//! Mesh hand-off from the voxel world to the graphics thread.
//!
//! The world never calls into the renderer. Completed meshes are pushed as
//! [`RenderCommand`]s onto a [`MeshUploadQueue`]; whichever thread owns the
//! graphics context drains it through a [`MeshUploader`].

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::core::handle::{Handle, HandleArena};
use crate::math::Aabb;
use crate::mesh::MeshImportResult;
use crate::voxel::chunk::ChunkCoord;

/// Generation-checked reference to a GPU buffer pair owned by the renderer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GpuBufferHandle(pub Handle);

/// Upload request for one chunk mesh
#[derive(Clone, Debug)]
pub struct MeshUpload {
    pub coord: ChunkCoord,
    pub mesh: Arc<MeshImportResult>,
    /// World-space bounds
    pub bounds: Aabb,
}

#[derive(Clone, Debug)]
pub enum RenderCommand {
    Upload(MeshUpload),
    /// Chunk unloaded; free its buffers
    Release(ChunkCoord),
}

/// Cloneable multi-producer queue of render commands
#[derive(Clone)]
pub struct MeshUploadQueue {
    sender: Sender<RenderCommand>,
    receiver: Receiver<RenderCommand>,
}

impl MeshUploadQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn push(&self, command: RenderCommand) {
        // Both ends live in `self`, so the channel cannot be disconnected
        let _ = self.sender.send(command);
    }

    /// Take everything queued so far
    pub fn drain(&self) -> Vec<RenderCommand> {
        self.receiver.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for MeshUploadQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Graphics-side resource owner
pub trait RenderResources {
    /// Create GPU buffers for a mesh
    fn upload_mesh(&mut self, upload: &MeshUpload) -> GpuBufferHandle;
    /// Free buffers created by `upload_mesh`
    fn free_mesh(&mut self, handle: GpuBufferHandle);
}

/// Applies queued commands to a [`RenderResources`] implementation and
/// tracks the live buffer of each chunk
pub struct MeshUploader {
    queue: MeshUploadQueue,
    buffers: HashMap<ChunkCoord, GpuBufferHandle>,
}

impl MeshUploader {
    pub fn new(queue: MeshUploadQueue) -> Self {
        Self {
            queue,
            buffers: HashMap::new(),
        }
    }

    /// Drain the queue on the graphics thread. Returns the number of
    /// commands applied.
    pub fn process(&mut self, resources: &mut dyn RenderResources) -> usize {
        let commands = self.queue.drain();
        for command in &commands {
            match command {
                RenderCommand::Upload(upload) => {
                    let old = if upload.mesh.is_empty() {
                        self.buffers.remove(&upload.coord)
                    } else {
                        let handle = resources.upload_mesh(upload);
                        self.buffers.insert(upload.coord, handle)
                    };
                    if let Some(old) = old {
                        resources.free_mesh(old);
                    }
                }
                RenderCommand::Release(coord) => {
                    if let Some(handle) = self.buffers.remove(coord) {
                        resources.free_mesh(handle);
                    }
                }
            }
        }
        if !commands.is_empty() {
            log::trace!("Applied {} render commands", commands.len());
        }
        commands.len()
    }

    pub fn buffer(&self, coord: ChunkCoord) -> Option<GpuBufferHandle> {
        self.buffers.get(&coord).copied()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

/// CPU-side stand-in for a renderer: keeps the uploads in an arena
#[derive(Default)]
pub struct HeadlessResources {
    meshes: HandleArena<MeshUpload>,
    uploaded_bytes: usize,
}

impl HeadlessResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: GpuBufferHandle) -> Option<&MeshUpload> {
        self.meshes.get(handle.0)
    }

    pub fn live_count(&self) -> usize {
        self.meshes.len()
    }

    /// Total vertex and index bytes uploaded so far
    pub fn uploaded_bytes(&self) -> usize {
        self.uploaded_bytes
    }
}

impl RenderResources for HeadlessResources {
    fn upload_mesh(&mut self, upload: &MeshUpload) -> GpuBufferHandle {
        self.uploaded_bytes += upload.mesh.vertex_bytes().len() + upload.mesh.index_bytes().len();
        GpuBufferHandle(self.meshes.insert(upload.clone()))
    }

    fn free_mesh(&mut self, handle: GpuBufferHandle) {
        if self.meshes.remove(handle.0).is_none() {
            log::warn!("Freeing unknown GPU buffer {:?}", handle.0);
        }
    }
}
