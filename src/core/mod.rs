//! Core engine types and utilities

pub mod types;
pub mod error;
pub mod logging;
pub mod time;
pub mod handle;
pub mod config;
pub mod profiler;
pub mod context;

pub use types::*;
pub use error::Error;
pub use handle::{Handle, HandleArena};
pub use config::{EngineConfig, WorldConfig, PhysicsConfig, JobConfig};
pub use context::EngineContext;
pub use profiler::Profiler;
