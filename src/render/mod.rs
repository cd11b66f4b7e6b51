//! Hand-off of finished meshes to the graphics thread

pub mod upload;

pub use upload::{GpuBufferHandle, HeadlessResources, MeshUpload, MeshUploadQueue, MeshUploader, RenderCommand, RenderResources};
