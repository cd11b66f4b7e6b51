//! Explicitly constructed engine context.
//!
//! Create the context before any world or physics system and drop it after
//! the last of them; components hold a clone of the profiler `Arc` and the
//! config values they need, never a global.

use std::sync::Arc;

use crate::core::config::EngineConfig;
use crate::core::profiler::Profiler;
use crate::core::types::Result;

pub struct EngineContext {
    config: EngineConfig,
    profiler: Arc<Profiler>,
}

impl EngineContext {
    /// Validate the config and build the context
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        log::info!(
            "Engine context: chunk_size={}, workers={}, max_bodies={}",
            config.world.chunk_size,
            config.jobs.worker_threads,
            config.physics.max_bodies
        );
        Ok(Self {
            config,
            profiler: Arc::new(Profiler::new(true)),
        })
    }

    /// Context with default configuration
    pub fn with_defaults() -> Self {
        Self {
            config: EngineConfig::default(),
            profiler: Arc::new(Profiler::new(true)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.profiler
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        if Arc::strong_count(&self.profiler) > 1 {
            log::warn!("Engine context dropped while components still hold its profiler");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;

    #[test]
    fn test_new_validates() {
        let mut config = EngineConfig::default();
        config.world.chunk_size = 3;
        assert!(matches!(EngineContext::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_profiler_shared() {
        let ctx = EngineContext::with_defaults();
        let profiler = Arc::clone(ctx.profiler());
        {
            let _s = profiler.scope("x");
        }
        assert_eq!(ctx.profiler().snapshot().len(), 1);
    }
}
