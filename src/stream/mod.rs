//! Replay-then-live change streams
//!
//! Both allocators publish their mutations through a [`Multicast`]. An
//! observer first receives the allocator's state at subscription time as a
//! sequence of `Upsert`s, then one `Sync` marker, then every later mutation,
//! in the order the allocator's writers were serialized.

mod change;
mod multicast;

pub use change::*;
pub use multicast::*;


use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::StreamError;

pub trait Observable<T>
where
    T: Send + 'static,
{
    /// Subscribes to the stream.
    ///
    /// `next` receives the replayed state, the `Sync` marker and live
    /// events. `complete` runs exactly once when the producer shuts down or
    /// `token` is cancelled.
    fn observe<N, C>(
        &self,
        token: CancellationToken,
        next: N,
        complete: C,
    ) where
        N: FnMut(T) + Send + 'static,
        C: FnOnce(std::result::Result<(), StreamError>) + Send + 'static;

    /// Channel flavour of [`Observable::observe`]; the receiver closes on completion.
    fn subscribe(
        &self,
        token: CancellationToken,
    ) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observe(
            token,
            move |item| {
                let _ = tx.send(item);
            },
            |_| {},
        );
        rx
    }
}
