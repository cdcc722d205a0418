use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::FakeBackend;
use super::FakeBackendHandle;
use crate::AllocatorEvent;
use crate::BackoffPolicy;
use crate::CacheConfig;
use crate::Change;
use crate::DistributedCache;
use crate::Labels;
use crate::LocalKeys;
use crate::MemoryIdPool;
use crate::NumericId;

pub(crate) const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) fn labels(model: &[&str]) -> Labels {
    Labels::from_model(model)
}

/// Backoff fast enough for unit tests
pub(crate) fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 500,
        base_delay_ms: 10,
        max_delay_ms: 50,
    }
}

pub(crate) fn cache_config(enable_master_key_protection: bool) -> CacheConfig {
    CacheConfig {
        enable_master_key_protection,
        reconcile: fast_backoff(),
    }
}

/// Mutable local key index
#[derive(Default)]
pub(crate) struct FakeLocalKeys {
    keys: Mutex<HashMap<NumericId, Labels>>,
}

impl FakeLocalKeys {
    pub(crate) fn set(
        &self,
        id: u32,
        key: Labels,
    ) {
        self.keys.lock().insert(NumericId::new(id), key);
    }

    pub(crate) fn remove(
        &self,
        id: u32,
    ) {
        self.keys.lock().remove(&NumericId::new(id));
    }
}

impl LocalKeys<Labels> for FakeLocalKeys {
    fn lookup_id(
        &self,
        id: NumericId,
    ) -> Option<Labels> {
        self.keys.lock().get(&id).cloned()
    }
}

/// Next item or panic after [`RECV_TIMEOUT`]
pub(crate) async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for item")
        .expect("channel closed")
}

/// Collects changes up to and including `Sync`
pub(crate) async fn recv_until_sync<K>(rx: &mut mpsc::UnboundedReceiver<Change<K>>) -> Vec<Change<K>> {
    let mut changes = Vec::new();
    loop {
        let change = recv(rx).await;
        let done = matches!(change, Change::Sync);
        changes.push(change);
        if done {
            return changes;
        }
    }
}

/// Items already queued, without waiting
pub(crate) fn drain_ready<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

/// Polls `condition` every few milliseconds; panics after [`RECV_TIMEOUT`]
pub(crate) async fn eventually<F>(
    what: &str,
    condition: F,
) where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Cache wired to a [`FakeBackend`], a [`MemoryIdPool`] over `1..=1000`,
/// a [`FakeLocalKeys`] index and an event channel.
pub(crate) struct CacheHarness {
    pub(crate) cache: DistributedCache<Labels>,
    pub(crate) backend: Arc<FakeBackend<Labels>>,
    pub(crate) handle: FakeBackendHandle<Labels>,
    pub(crate) pool: Arc<MemoryIdPool>,
    pub(crate) local_keys: Arc<FakeLocalKeys>,
    pub(crate) events: mpsc::UnboundedReceiver<AllocatorEvent<Labels>>,
}

impl CacheHarness {
    pub(crate) fn new(enable_master_key_protection: bool) -> Self {
        let (backend, handle) = FakeBackend::new();
        let pool = Arc::new(MemoryIdPool::new(1, 1000));
        let local_keys = Arc::new(FakeLocalKeys::default());
        let (events_tx, events) = mpsc::unbounded_channel();

        let cache = DistributedCache::builder(backend.clone(), pool.clone())
            .with_config(cache_config(enable_master_key_protection))
            .with_local_keys(local_keys.clone())
            .with_events(events_tx)
            .build()
            .expect("valid cache config");

        Self {
            cache,
            backend,
            handle,
            pool,
            local_keys,
            events,
        }
    }

    /// Starts the cache and completes the first listing with `entries`
    pub(crate) async fn start_with(
        &mut self,
        entries: &[(u32, Labels)],
    ) {
        let list_done = self.cache.start();
        for (id, key) in entries {
            self.handle.upsert(*id, key.clone());
        }
        self.handle.list_done();
        assert!(
            tokio::time::timeout(RECV_TIMEOUT, list_done.wait()).await.expect("list done"),
            "cache dropped before listing completed"
        );
        // Discard the listing's upserts
        for _ in entries {
            recv(&mut self.events).await;
        }
    }
}
