use std::sync::Arc;

use crate::{BlockCache, CacheStats, Callbacks, Dispatcher, JitConfig, JitError};

/// A configured translator: configuration, host callbacks and the
/// block cache its dispatchers share.
pub struct Engine {
    config: JitConfig,
    callbacks: Arc<dyn Callbacks>,
    cache: Arc<BlockCache>,
}

impl Engine {
    pub fn new(config: JitConfig, callbacks: Arc<dyn Callbacks>) -> Result<Self, JitError> {
        let cache = Arc::new(BlockCache::new(&config)?);
        Ok(Self {
            config,
            callbacks,
            cache,
        })
    }

    /// Engine over an existing cache, e.g. one per guest core sharing
    /// translations.
    pub fn with_cache(config: JitConfig, callbacks: Arc<dyn Callbacks>, cache: Arc<BlockCache>) -> Result<Self, JitError> {
        config.validate()?;
        Ok(Self {
            config,
            callbacks,
            cache,
        })
    }

    /// New execution stream over the shared cache.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(&self.config, Arc::clone(&self.cache), Arc::clone(&self.callbacks))
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    /// Drop translations of guest memory written behind the engine's
    /// back (DMA and the like).
    pub fn invalidate_range(&self, start: u32, len: u32) -> Result<usize, JitError> {
        self.cache.invalidate_range(start, len)
    }

    pub fn flush_all(&self) -> Result<usize, JitError> {
        self.cache.flush_all()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
