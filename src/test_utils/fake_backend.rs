use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::AllocatorKey;
use crate::Backend;
use crate::BackendError;
use crate::CacheMutations;
use crate::NumericId;
use crate::Result;

/// Step replayed into the cache's mutation sink.
#[derive(Debug, Clone)]
pub(crate) enum BackendOp<K> {
    Upsert(NumericId, K),
    Delete(NumericId, Option<K>),
    ListDone,
    /// Makes `list_and_watch` return an error
    Fail(String),
}

/// Backend driven by a channel of [`BackendOp`]s.
///
/// Every `list_and_watch` call consumes the same channel, so a restarted
/// cache keeps receiving the ops pushed after the restart.
pub(crate) struct FakeBackend<K> {
    ops: tokio::sync::Mutex<mpsc::UnboundedReceiver<BackendOp<K>>>,
    /// Results returned by successive `update_key` calls; `Ok` once empty
    update_results: Mutex<VecDeque<Result<()>>>,
    update_calls: Mutex<Vec<(NumericId, K, bool)>>,
    update_called: Notify,
}

pub(crate) struct FakeBackendHandle<K> {
    tx: mpsc::UnboundedSender<BackendOp<K>>,
}

impl<K> FakeBackendHandle<K>
where
    K: AllocatorKey,
{
    pub(crate) fn push(
        &self,
        op: BackendOp<K>,
    ) {
        self.tx.send(op).expect("fake backend dropped");
    }

    pub(crate) fn upsert(
        &self,
        id: u32,
        key: K,
    ) {
        self.push(BackendOp::Upsert(NumericId::new(id), key));
    }

    pub(crate) fn delete(
        &self,
        id: u32,
        key: Option<K>,
    ) {
        self.push(BackendOp::Delete(NumericId::new(id), key));
    }

    pub(crate) fn list_done(&self) {
        self.push(BackendOp::ListDone);
    }
}

impl<K> FakeBackend<K>
where
    K: AllocatorKey,
{
    pub(crate) fn new() -> (Arc<Self>, FakeBackendHandle<K>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backend = Arc::new(Self {
            ops: tokio::sync::Mutex::new(rx),
            update_results: Mutex::new(VecDeque::new()),
            update_calls: Mutex::new(Vec::new()),
            update_called: Notify::new(),
        });
        (backend, FakeBackendHandle { tx })
    }

    /// Queues `count` failing `update_key` results
    pub(crate) fn fail_updates(
        &self,
        count: usize,
    ) {
        let mut results = self.update_results.lock();
        for _ in 0..count {
            results.push_back(Err(BackendError::Unavailable("injected".to_string()).into()));
        }
    }

    pub(crate) fn update_calls(&self) -> Vec<(NumericId, K, bool)> {
        self.update_calls.lock().clone()
    }

    /// Waits until at least `count` `update_key` calls were made
    pub(crate) async fn wait_update_calls(
        &self,
        count: usize,
    ) {
        loop {
            let notified = self.update_called.notified();
            if self.update_calls.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl<K> Backend<K> for FakeBackend<K>
where
    K: AllocatorKey,
{
    async fn list_and_watch(
        &self,
        token: CancellationToken,
        sink: Arc<dyn CacheMutations<K>>,
    ) -> Result<()> {
        let mut ops = self.ops.lock().await;
        loop {
            let op = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                op = ops.recv() => op,
            };
            match op {
                Some(BackendOp::Upsert(id, key)) => sink.on_upsert(id, key),
                Some(BackendOp::Delete(id, key)) => sink.on_delete(id, key),
                Some(BackendOp::ListDone) => sink.on_list_done(),
                Some(BackendOp::Fail(reason)) => return Err(BackendError::ListFailed(reason).into()),
                None => {
                    token.cancelled().await;
                    return Ok(());
                }
            }
        }
    }

    async fn update_key(
        &self,
        id: NumericId,
        key: K,
        recreate_if_missing: bool,
    ) -> Result<()> {
        self.update_calls.lock().push((id, key, recreate_if_missing));
        let result = self.update_results.lock().pop_front().unwrap_or(Ok(()));
        self.update_called.notify_waiters();
        result
    }
}
