//! Master-key protection
//!
//! When the backend reports the deletion of an ID this node still
//! references, the delete is held back and a per-ID reconciler recreates the
//! key remotely:
//!
//! ```text
//!  Armed ──first attempt──▶ Retrying ──UpdateKey ok / need gone──▶ Resolved
//!                             │  ▲
//!                             └──┘ backoff
//! ```
//!
//! Every attempt first re-checks, under the cache write lock, whether the
//! local need still exists. If it is gone the held-back delete is applied
//! and the reconciler resolves. The `UpdateKey` call itself runs without
//! the cache lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Weak;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::distributed_cache::CacheInner;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::AllocatorKey;
use crate::BackoffPolicy;
use crate::NumericId;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStatus {
    /// Created, no attempt made yet
    Armed,
    /// Remote recreation in flight or backing off
    Retrying,
    /// Terminal: key recreated or local need gone
    Resolved,
}

/// Handles given to a reconciler task.
#[derive(Clone)]
pub(crate) struct ReconcileContext {
    pub(crate) token: CancellationToken,
    pub(crate) rearm: Arc<Notify>,
    status: Arc<Mutex<ReconcileStatus>>,
}

impl ReconcileContext {
    fn set_status(
        &self,
        status: ReconcileStatus,
    ) {
        *self.status.lock() = status;
    }
}

struct Reconciler {
    ctx: ReconcileContext,
    handle: JoinHandle<()>,
}

impl Reconciler {
    fn is_running(&self) -> bool {
        !self.handle.is_finished() && !self.ctx.token.is_cancelled()
    }
}

#[derive(Default)]
struct ManagerState {
    active: HashMap<NumericId, Reconciler>,
    /// Replaced or cancelled tasks that may still be finishing an attempt
    retired: Vec<JoinHandle<()>>,
}

/// Supervises one reconciler task per ID.
#[derive(Default)]
pub(crate) struct ReconcilerManager {
    state: Mutex<ManagerState>,
}

impl ReconcilerManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arms a reconciler for `id`, or re-triggers the running one.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn update<F, Fut>(
        &self,
        id: NumericId,
        run: F,
    ) where
        F: FnOnce(ReconcileContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock();
        state.retired.retain(|h| !h.is_finished());

        if let Some(existing) = state.active.get(&id) {
            if existing.is_running() {
                debug!(%id, "reconciler already running, re-triggering");
                existing.ctx.rearm.notify_one();
                return;
            }
        }

        let ctx = ReconcileContext {
            token: CancellationToken::new(),
            rearm: Arc::new(Notify::new()),
            status: Arc::new(Mutex::new(ReconcileStatus::Armed)),
        };
        let handle = tokio::spawn(run(ctx.clone()));
        if let Some(old) = state.active.insert(id, Reconciler { ctx, handle }) {
            old.ctx.token.cancel();
            state.retired.push(old.handle);
        }
    }

    /// Stops the reconciler for `id` without waiting for it
    pub(crate) fn cancel(
        &self,
        id: NumericId,
    ) {
        let mut state = self.state.lock();
        if let Some(reconciler) = state.active.remove(&id) {
            debug!(%id, "reconciler cancelled");
            reconciler.ctx.token.cancel();
            state.retired.push(reconciler.handle);
        }
    }

    pub(crate) fn is_active(
        &self,
        id: NumericId,
    ) -> bool {
        self.state.lock().active.get(&id).map(Reconciler::is_running).unwrap_or(false)
    }

    pub(crate) fn status(
        &self,
        id: NumericId,
    ) -> Option<ReconcileStatus> {
        self.state.lock().active.get(&id).map(|r| *r.ctx.status.lock())
    }

    /// Cancels every reconciler and waits for all of them to exit.
    ///
    /// Reconcilers interrupted here stay unresolved.
    pub(crate) async fn remove_all_and_wait(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut state = self.state.lock();
            let mut handles: Vec<JoinHandle<()>> = state.retired.drain(..).collect();
            for (_, reconciler) in state.active.drain() {
                reconciler.ctx.token.cancel();
                handles.push(reconciler.handle);
            }
            handles
        };
        if handles.is_empty() {
            return;
        }

        debug!(count = handles.len(), "waiting for reconcilers to stop");
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("reconciler task failed: {:?}", e);
            }
        }
    }
}

/// Arms master-key recreation for `id`. Caller holds the cache write lock.
pub(super) fn arm_master_key_recreation<K>(
    cache: &CacheInner<K>,
    id: NumericId,
    deleted_key: Option<K>,
) where
    K: AllocatorKey,
{
    let weak = cache.weak_self.clone();
    let policy = cache.config.reconcile;
    cache
        .reconcilers
        .update(id, move |ctx| recreate_master_key(weak, id, deleted_key, policy, ctx));
}

async fn recreate_master_key<K>(
    cache: Weak<CacheInner<K>>,
    id: NumericId,
    deleted_key: Option<K>,
    policy: BackoffPolicy,
    ctx: ReconcileContext,
) where
    K: AllocatorKey,
{
    ctx.set_status(ReconcileStatus::Retrying);

    let token = ctx.token.clone();
    let attempt = || attempt_recreate(cache.clone(), id, deleted_key.clone(), token.clone());

    match task_with_timeout_and_exponential_backoff(&ctx.token, Some(ctx.rearm.as_ref()), attempt, policy).await {
        Ok(Some(())) => {
            ctx.set_status(ReconcileStatus::Resolved);
        }
        Ok(None) => {
            debug!(%id, "master key reconciliation stopped before resolving");
        }
        Err(e) => {
            error!(%id, "master key reconciliation gave up: {:?}", e);
        }
    }
}

async fn attempt_recreate<K>(
    cache: Weak<CacheInner<K>>,
    id: NumericId,
    deleted_key: Option<K>,
    token: CancellationToken,
) -> Result<()>
where
    K: AllocatorKey,
{
    let Some(cache) = cache.upgrade() else {
        return Ok(());
    };

    let key = {
        let mut state = cache.state.write();
        // Cancelled under the same lock by a fresh upsert for this id
        if token.is_cancelled() {
            return Ok(());
        }
        match cache.local_need(id) {
            Some(key) => key,
            None => {
                if state.next().contains_id(id) {
                    debug!(%id, "local reference released, applying held-back delete");
                    cache.apply_delete(&mut *state, id, deleted_key);
                }
                return Ok(());
            }
        }
    };

    if let Err(e) = cache.backend.update_key(id, key, true).await {
        error!(%id, "OnDelete MasterKeyProtection update for key failed: {:?}", e);
        return Err(e);
    }
    info!(%id, "OnDelete MasterKeyProtection update succeeded");
    Ok(())
}
