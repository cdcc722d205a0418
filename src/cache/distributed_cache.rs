//! Backend-synchronized identity cache
//!
//! The backend watch task is the only writer of the `next` generation.
//! Readers are served from `current`, which is replaced by `next` in one
//! step when the backend reports that its listing is complete:
//!
//! ```text
//! start() ──▶ pending = {} ──▶ on_upsert/on_delete fill pending
//!                                   │
//!                          on_list_done(): live = pending
//!                                   │
//!                    later events write straight into live
//! ```
//!
//! Every mutation emits its change while the write lock is held, so
//! observers see changes in writer order.

use std::iter;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::generation::Generation;
use super::reconciler::arm_master_key_recreation;
use super::reconciler::ReconcileStatus;
use super::reconciler::ReconcilerManager;
use crate::utils::async_task::spawn_task;
use crate::AllocatorEvent;
use crate::AllocatorKey;
use crate::Backend;
use crate::CacheConfig;
use crate::CacheMutations;
use crate::Change;
use crate::ChangeKind;
use crate::IdPool;
use crate::LocalKeys;
use crate::Multicast;
use crate::NumericId;
use crate::Observable;
use crate::Result;
use crate::StreamError;

/// Check applied to every backend event before it touches the cache.
///
/// The first validator returning an error drops the event.
pub type CacheValidator<K> = Arc<dyn Fn(ChangeKind, NumericId, Option<&K>) -> Result<()> + Send + Sync>;

/// Generation pair.
///
/// `pending` only exists while a listing is in progress; otherwise `next`
/// and `current` are the same map.
pub(crate) struct CacheState<K> {
    live: Generation<K>,
    pending: Option<Generation<K>>,
}

impl<K> CacheState<K>
where
    K: AllocatorKey,
{
    fn new() -> Self {
        Self {
            live: Generation::default(),
            pending: None,
        }
    }

    pub(crate) fn current(&self) -> &Generation<K> {
        &self.live
    }

    pub(crate) fn next(&self) -> &Generation<K> {
        self.pending.as_ref().unwrap_or(&self.live)
    }

    pub(crate) fn next_mut(&mut self) -> &mut Generation<K> {
        match self.pending {
            Some(ref mut pending) => pending,
            None => &mut self.live,
        }
    }

    fn begin_list(&mut self) {
        self.pending = Some(Generation::default());
    }

    /// Returns false when no listing was in progress
    fn promote(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                self.live = pending;
                true
            }
            None => false,
        }
    }
}

struct WatchTask {
    token: CancellationToken,
    /// Flips to true once `list_and_watch` has returned
    exited: watch::Receiver<bool>,
}

pub(crate) struct CacheInner<K>
where
    K: AllocatorKey,
{
    pub(super) config: CacheConfig,
    pub(super) backend: Arc<dyn Backend<K>>,
    pub(super) id_pool: Arc<dyn IdPool>,
    pub(super) validators: Vec<CacheValidator<K>>,
    pub(super) local_keys: Option<Arc<dyn LocalKeys<K>>>,
    pub(super) events: Option<mpsc::UnboundedSender<AllocatorEvent<K>>>,

    pub(super) state: RwLock<CacheState<K>>,
    pub(super) changes: Multicast<Change<K>>,
    pub(super) list_done: watch::Sender<bool>,
    pub(super) reconcilers: ReconcilerManager,
    watch_task: Mutex<Option<WatchTask>>,
    /// Cancelled by the first `stop`; never reset
    shutdown: CancellationToken,

    pub(super) weak_self: Weak<CacheInner<K>>,
}

impl<K> CacheInner<K>
where
    K: AllocatorKey,
{
    pub(super) fn new(
        weak_self: Weak<CacheInner<K>>,
        config: CacheConfig,
        backend: Arc<dyn Backend<K>>,
        id_pool: Arc<dyn IdPool>,
        validators: Vec<CacheValidator<K>>,
        local_keys: Option<Arc<dyn LocalKeys<K>>>,
        events: Option<mpsc::UnboundedSender<AllocatorEvent<K>>>,
    ) -> Self {
        let (list_done, _) = watch::channel(false);
        Self {
            config,
            backend,
            id_pool,
            validators,
            local_keys,
            events,
            state: RwLock::new(CacheState::new()),
            changes: Multicast::new(),
            list_done,
            reconcilers: ReconcilerManager::new(),
            watch_task: Mutex::new(None),
            shutdown: CancellationToken::new(),
            weak_self,
        }
    }

    fn validate(
        &self,
        kind: ChangeKind,
        id: NumericId,
        key: Option<&K>,
    ) -> Result<()> {
        for validator in &self.validators {
            validator(kind, id, key)?;
        }
        Ok(())
    }

    /// Key this node still references under `id`, if any
    pub(super) fn local_need(
        &self,
        id: NumericId,
    ) -> Option<K> {
        self.local_keys.as_ref()?.lookup_id(id)
    }

    fn send_event(
        &self,
        kind: ChangeKind,
        id: NumericId,
        key: Option<K>,
    ) {
        if let Some(events) = &self.events {
            if events.send(AllocatorEvent { kind, id, key }).is_err() {
                debug!(%id, ?kind, "event receiver dropped");
            }
        }
    }

    /// Caller holds the write lock.
    fn on_delete_locked(
        &self,
        state: &mut CacheState<K>,
        id: NumericId,
        key: Option<K>,
        recreate_missing_local_keys: bool,
    ) {
        if recreate_missing_local_keys && self.config.enable_master_key_protection && self.local_need(id).is_some() {
            info!(%id, "identity deleted remotely but still used locally, recreating");
            arm_master_key_recreation(self, id, key);
            return;
        }
        self.apply_delete(state, id, key);
    }

    /// Removes `id` from `next`, returns it to the pool and emits the delete.
    /// Caller holds the write lock.
    pub(super) fn apply_delete(
        &self,
        state: &mut CacheState<K>,
        id: NumericId,
        key: Option<K>,
    ) {
        let removed = state.next_mut().remove(id);
        self.id_pool.insert(id);

        let key = key.or(removed);
        self.changes.emit(Change::Delete { id, key: key.clone() });
        self.send_event(ChangeKind::Delete, id, key);
    }
}

impl<K> CacheMutations<K> for CacheInner<K>
where
    K: AllocatorKey,
{
    fn on_list_done(&self) {
        let entries = {
            let mut state = self.state.write();
            if !state.promote() {
                warn!("list completion reported without a listing in progress");
            }
            state.current().len()
        };
        debug!(entries, "Initial list of identities received");

        self.list_done.send_if_modified(|done| {
            if *done {
                return false;
            }
            *done = true;
            true
        });
    }

    fn on_upsert(
        &self,
        id: NumericId,
        key: K,
    ) {
        if let Err(e) = self.validate(ChangeKind::Upsert, id, Some(&key)) {
            warn!(%id, event = ?ChangeKind::Upsert, "Skipping event for invalid identity: {}", e);
            return;
        }

        let mut state = self.state.write();
        state.next_mut().upsert(id, key.clone());
        self.id_pool.remove(id);
        // Key exists remotely again
        self.reconcilers.cancel(id);
        self.changes.emit(Change::Upsert { id, key: key.clone() });
        self.send_event(ChangeKind::Upsert, id, Some(key));
    }

    fn on_delete(
        &self,
        id: NumericId,
        key: Option<K>,
    ) {
        if let Err(e) = self.validate(ChangeKind::Delete, id, key.as_ref()) {
            warn!(%id, event = ?ChangeKind::Delete, "Skipping event for invalid identity: {}", e);
            return;
        }

        let mut state = self.state.write();
        self.on_delete_locked(&mut state, id, key, true);
    }
}

/// Resolves once the first listing after [`DistributedCache::start`] completed.
#[derive(Debug, Clone)]
pub struct ListDone {
    rx: watch::Receiver<bool>,
}

impl ListDone {
    pub fn is_done(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns false if the cache went away before the listing completed.
    pub async fn wait(&self) -> bool {
        wait_until_set(self.rx.clone()).await
    }
}

async fn wait_until_set(mut rx: watch::Receiver<bool>) -> bool {
    rx.wait_for(|set| *set).await.is_ok()
}

/// Locally cached mirror of the backend's identity table.
///
/// Cheap to clone; all clones share the same cache.
pub struct DistributedCache<K>
where
    K: AllocatorKey,
{
    pub(super) inner: Arc<CacheInner<K>>,
}

impl<K> Clone for DistributedCache<K>
where
    K: AllocatorKey,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> std::fmt::Debug for DistributedCache<K>
where
    K: AllocatorKey,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DistributedCache")
            .field("config", &self.inner.config)
            .field("entries", &self.num_entries())
            .field("changes", &self.inner.changes)
            .finish()
    }
}

impl<K> DistributedCache<K>
where
    K: AllocatorKey,
{
    /// Starts listing and watching the backend in a background task.
    ///
    /// A fresh `next` generation is started; readers keep seeing the
    /// previous one until the listing completes. Calling `start` while the
    /// watch task is running only returns the current signal.
    ///
    /// Starting again after [`DistributedCache::stop`] resynchronizes the
    /// cache from the backend, but the change stream stays completed. New
    /// observers never see live changes, and only the events channel
    /// reports what the new listing brings in.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> ListDone {
        let mut watch_task = self.inner.watch_task.lock();
        if let Some(task) = watch_task.as_ref() {
            if !*task.exited.borrow() {
                warn!("distributed cache already started");
                return self.list_done();
            }
        }

        self.inner.list_done.send_replace(false);
        self.inner.state.write().begin_list();

        let token = CancellationToken::new();
        let (exited_tx, exited_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let task_token = token.clone();
        spawn_task("list_and_watch", async move {
            let sink: Arc<dyn CacheMutations<K>> = inner.clone();
            let result = inner.backend.list_and_watch(task_token, sink).await;
            let _ = exited_tx.send(true);
            result
        });

        *watch_task = Some(WatchTask {
            token,
            exited: exited_rx,
        });
        info!("distributed cache started");
        self.list_done()
    }

    pub fn list_done(&self) -> ListDone {
        ListDone {
            rx: self.inner.list_done.subscribe(),
        }
    }

    /// Stops the watch task and all reconcilers, then completes the change
    /// stream. Safe to call more than once.
    pub async fn stop(&self) {
        let task = self
            .inner
            .watch_task
            .lock()
            .as_ref()
            .map(|t| (t.token.clone(), t.exited.clone()));
        if let Some((token, exited)) = task {
            token.cancel();
            wait_until_set(exited).await;
        }

        self.inner.reconcilers.remove_all_and_wait().await;
        self.inner.shutdown.cancel();
        self.inner.changes.complete(Ok(()));
        info!("distributed cache stopped");
    }

    async fn wait_watch_exit(&self) {
        let exited = self.inner.watch_task.lock().as_ref().map(|t| t.exited.clone());
        if let Some(exited) = exited {
            wait_until_set(exited).await;
        }
    }

    /// Deletes every entry of `next`.
    ///
    /// Waits for the watch task to exit first, so it is meant to run after
    /// [`DistributedCache::stop`].
    pub async fn drain(&self) {
        self.wait_watch_exit().await;

        let mut state = self.inner.state.write();
        let entries = collect_entries(state.next(), |_| true);
        debug!(count = entries.len(), "draining distributed cache");
        for (id, key) in entries {
            self.inner.on_delete_locked(&mut state, id, Some(key), false);
        }
    }

    /// Like [`DistributedCache::drain`], restricted to the IDs `is_stale` accepts.
    pub async fn drain_if<P>(
        &self,
        is_stale: P,
    ) where
        P: Fn(NumericId) -> bool,
    {
        self.wait_watch_exit().await;

        let mut state = self.inner.state.write();
        for (id, key) in collect_entries(state.next(), &is_stale) {
            debug!(%id, ?key, "Stale identity deleted");
            self.inner.on_delete_locked(&mut state, id, Some(key), false);
        }
    }

    pub fn get(
        &self,
        key: &K,
    ) -> Option<NumericId> {
        self.inner.state.read().current().id_of(&key.get_key())
    }

    pub fn get_by_id(
        &self,
        id: NumericId,
    ) -> Option<K> {
        self.inner.state.read().current().key_of(id).cloned()
    }

    /// Visits every entry of `current` under the read lock.
    ///
    /// `f` must not call back into the cache's write operations.
    pub fn for_each<F>(
        &self,
        mut f: F,
    ) where
        F: FnMut(NumericId, &K),
    {
        let state = self.inner.state.read();
        for (id, key) in state.current().iter() {
            f(id, key);
        }
    }

    /// Seeds `next` with a locally originated entry ahead of backend
    /// confirmation. Emits nothing.
    pub fn insert(
        &self,
        key: K,
        id: NumericId,
    ) {
        self.inner.state.write().next_mut().upsert(id, key);
    }

    /// Entries readers currently see. During a resync this is the previous
    /// generation, not the partially listed one.
    pub fn num_entries(&self) -> usize {
        self.inner.state.read().current().len()
    }

    /// Whether master-key recreation is still running for `id`
    pub fn is_reconciling(
        &self,
        id: NumericId,
    ) -> bool {
        self.inner.reconcilers.is_active(id)
    }

    pub fn reconcile_status(
        &self,
        id: NumericId,
    ) -> Option<ReconcileStatus> {
        self.inner.reconcilers.status(id)
    }
}

fn collect_entries<K, P>(
    generation: &Generation<K>,
    keep: P,
) -> Vec<(NumericId, K)>
where
    K: AllocatorKey,
    P: Fn(NumericId) -> bool,
{
    generation
        .iter()
        .filter(|(id, _)| keep(*id))
        .map(|(id, key)| (id, key.clone()))
        .collect()
}

impl<K> Observable<Change<K>> for DistributedCache<K>
where
    K: AllocatorKey,
{
    /// Waits for the first listing to complete, then replays `current`
    /// followed by `Sync` and live changes. Completes without a replay if
    /// the cache stops before any listing finished.
    fn observe<N, C>(
        &self,
        token: CancellationToken,
        next: N,
        complete: C,
    ) where
        N: FnMut(Change<K>) + Send + 'static,
        C: FnOnce(std::result::Result<(), StreamError>) + Send + 'static,
    {
        let inner = self.inner.clone();
        let list_done = inner.list_done.subscribe();
        let shutdown = inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    complete(Err(StreamError::Cancelled));
                    return;
                }
                _ = wait_until_set(list_done) => {}
                _ = shutdown.cancelled() => {
                    complete(Ok(()));
                    return;
                }
            }

            // Snapshot and registration happen under one read lock
            let state = inner.state.read();
            let replay: Vec<Change<K>> = state
                .current()
                .iter()
                .map(|(id, key)| Change::Upsert { id, key: key.clone() })
                .chain(iter::once(Change::Sync))
                .collect();
            inner.changes.observe_with_replay(replay, token, next, complete);
        });
    }
}
