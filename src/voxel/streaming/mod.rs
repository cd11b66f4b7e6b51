//! Chunk streaming support: storage recycling and background regeneration
//!
//! - Chunk Pool: released chunks are reset and handed out again on load
//! - Job Scheduler: mesh and collider jobs on a worker pool, results
//!   returned through a channel drained by the world tick

pub mod chunk_pool;
pub mod jobs;

pub use chunk_pool::{ChunkPool, ChunkPoolStats};
pub use jobs::{ChunkSnapshot, JobKind, JobOutput, JobPayload, JobResult, JobScheduler, JobTicket};
