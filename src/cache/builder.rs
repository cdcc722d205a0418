//! Fluent construction of a [`DistributedCache`].
//!
//! ```ignore
//! let (events_tx, events_rx) = mpsc::unbounded_channel();
//! let cache = DistributedCache::builder(backend, id_pool)
//!     .with_config(settings.cache)
//!     .with_local_keys(local_keys)
//!     .with_validator(Arc::new(|_, id, _| check_scope(id)))
//!     .with_events(events_tx)
//!     .build()?;
//! let list_done = cache.start();
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use super::distributed_cache::CacheInner;
use super::CacheValidator;
use super::DistributedCache;
use crate::AllocatorEvent;
use crate::AllocatorKey;
use crate::Backend;
use crate::CacheConfig;
use crate::IdPool;
use crate::LocalKeys;
use crate::Result;

pub struct DistributedCacheBuilder<K>
where
    K: AllocatorKey,
{
    backend: Arc<dyn Backend<K>>,
    id_pool: Arc<dyn IdPool>,
    config: CacheConfig,
    validators: Vec<CacheValidator<K>>,
    local_keys: Option<Arc<dyn LocalKeys<K>>>,
    events: Option<mpsc::UnboundedSender<AllocatorEvent<K>>>,
}

impl<K> DistributedCache<K>
where
    K: AllocatorKey,
{
    pub fn builder(
        backend: Arc<dyn Backend<K>>,
        id_pool: Arc<dyn IdPool>,
    ) -> DistributedCacheBuilder<K> {
        DistributedCacheBuilder {
            backend,
            id_pool,
            config: CacheConfig::default(),
            validators: Vec::new(),
            local_keys: None,
            events: None,
        }
    }
}

impl<K> DistributedCacheBuilder<K>
where
    K: AllocatorKey,
{
    pub fn with_config(
        mut self,
        config: CacheConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Appends a validator; validators run in registration order
    pub fn with_validator(
        mut self,
        validator: CacheValidator<K>,
    ) -> Self {
        self.validators.push(validator);
        self
    }

    /// Index consulted by master-key protection
    pub fn with_local_keys(
        mut self,
        local_keys: Arc<dyn LocalKeys<K>>,
    ) -> Self {
        self.local_keys = Some(local_keys);
        self
    }

    /// Internal channel receiving every upsert and delete applied to the cache
    pub fn with_events(
        mut self,
        events: mpsc::UnboundedSender<AllocatorEvent<K>>,
    ) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<DistributedCache<K>> {
        self.config.validate()?;
        if self.config.enable_master_key_protection && self.local_keys.is_none() {
            warn!("master key protection enabled without a local key index, remote deletes will always apply");
        }

        let Self {
            backend,
            id_pool,
            config,
            validators,
            local_keys,
            events,
        } = self;
        let inner = Arc::new_cyclic(|weak| {
            CacheInner::new(weak.clone(), config, backend, id_pool, validators, local_keys, events)
        });
        Ok(DistributedCache { inner })
    }
}
