//! Multicast broadcaster with per-subscriber replay
//!
//! ```text
//! emit() [under the producer's write lock]
//!    │ send() to every registered queue (unbounded, never blocks)
//!    ▼
//! ┌─────────────────┐
//! │ Per-Subscriber  │ (tokio mpsc, seeded with the replay)
//! │ Queues          │
//! └──────┬──────────┘
//!        │ pump task per subscriber
//!        ▼
//!   next(item) ... complete(result)
//! ```
//!
//! The replay is pushed into the subscriber's queue before the queue is
//! registered, so a producer that builds the replay and calls
//! [`Multicast::observe_with_replay`] under its own read lock hands the
//! subscriber a feed with no gap and no duplicate at the snapshot boundary.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::StreamError;

struct MulticastState<T> {
    /// Live subscriber queues
    subscribers: HashMap<u64, mpsc::UnboundedSender<T>>,

    /// Next subscriber id (monotonically increasing)
    next_id: u64,

    /// Set once, by `complete()`
    completion: Option<std::result::Result<(), StreamError>>,
}

pub struct Multicast<T> {
    shared: Arc<Mutex<MulticastState<T>>>,
}

impl<T> std::fmt::Debug for Multicast<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Multicast")
            .field("subscribers", &state.subscribers.len())
            .field("completion", &state.completion)
            .finish()
    }
}

impl<T> Default for Multicast<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Multicast<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(MulticastState {
                subscribers: HashMap::new(),
                next_id: 1,
                completion: None,
            })),
        }
    }

    /// Delivers `item` to every live subscriber, in call order.
    ///
    /// Items emitted after completion are dropped.
    pub fn emit(
        &self,
        item: T,
    ) {
        let mut state = self.shared.lock();
        if state.completion.is_some() {
            trace!("emit after completion dropped");
            return;
        }
        // A failed send means the pump task is gone
        state.subscribers.retain(|_, tx| tx.send(item.clone()).is_ok());
    }

    /// Terminates the stream. Only the first call has an effect.
    pub fn complete(
        &self,
        result: std::result::Result<(), StreamError>,
    ) {
        let mut state = self.shared.lock();
        if state.completion.is_some() {
            return;
        }
        debug!(subscribers = state.subscribers.len(), ?result, "completing change stream");
        state.completion = Some(result);
        // Dropping the senders lets every pump drain its queue and finish
        state.subscribers.clear();
    }

    pub fn is_completed(&self) -> bool {
        self.shared.lock().completion.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }

    /// Registers a subscriber whose feed starts with `replay`.
    ///
    /// `next` is invoked from a dedicated task, never under the producer's
    /// lock. `complete` is invoked exactly once: with `Err(Cancelled)` when
    /// `token` fires, otherwise with the producer's completion result.
    ///
    /// Must be called from within a tokio runtime.
    pub fn observe_with_replay<I, N, C>(
        &self,
        replay: I,
        token: CancellationToken,
        mut next: N,
        complete: C,
    ) where
        I: IntoIterator<Item = T>,
        N: FnMut(T) + Send + 'static,
        C: FnOnce(std::result::Result<(), StreamError>) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for item in replay {
            let _ = tx.send(item);
        }

        let id = {
            let mut state = self.shared.lock();
            let id = state.next_id;
            state.next_id += 1;
            if state.completion.is_none() {
                state.subscribers.insert(id, tx);
            }
            id
        };
        trace!(subscriber_id = id, "subscriber registered");

        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        shared.lock().subscribers.remove(&id);
                        trace!(subscriber_id = id, "subscriber cancelled");
                        complete(Err(StreamError::Cancelled));
                        return;
                    }
                    item = rx.recv() => match item {
                        Some(item) => next(item),
                        None => {
                            let result = shared.lock().completion.clone().unwrap_or(Ok(()));
                            complete(result);
                            return;
                        }
                    }
                }
            }
        });
    }
}

impl<T> Drop for Multicast<T> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if state.completion.is_none() {
            state.completion = Some(Ok(()));
            state.subscribers.clear();
        }
    }
}
