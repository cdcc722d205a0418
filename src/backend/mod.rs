//! Remote store seams consumed by the distributed cache
//!
//! The transport behind [`Backend`] is out of scope; implementations stream
//! the remote identity table into a [`CacheMutations`] sink and recreate
//! keys on request.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;

use crate::AllocatorKey;
use crate::NumericId;
use crate::Result;

/// Operations a backend drives while listing and watching.
///
/// The backend must not call `on_upsert`/`on_delete` before the cache is
/// started and must call `on_list_done` exactly once per list cycle.
pub trait CacheMutations<K>: Send + Sync
where
    K: AllocatorKey,
{
    /// Initial full listing is complete
    fn on_list_done(&self);

    /// A key->ID mapping appeared or was refreshed (e.g. lease renewal)
    fn on_upsert(
        &self,
        id: NumericId,
        key: K,
    );

    /// A key->ID mapping was removed remotely
    fn on_delete(
        &self,
        id: NumericId,
        key: Option<K>,
    );
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Backend<K>: Send + Sync + 'static
where
    K: AllocatorKey,
{
    /// Streams the full remote state, calls `on_list_done`, then streams
    /// live changes until `token` is cancelled.
    ///
    /// An error before `on_list_done` leaves the previous generation in place.
    async fn list_and_watch(
        &self,
        token: CancellationToken,
        sink: Arc<dyn CacheMutations<K>>,
    ) -> Result<()>;

    /// Refreshes the key for `id`, creating it when missing and
    /// `recreate_if_missing` is set.
    async fn update_key(
        &self,
        id: NumericId,
        key: K,
        recreate_if_missing: bool,
    ) -> Result<()>;
}

/// Index of the keys this node holds references to.
///
/// Used by master-key protection to decide whether a remote delete must be
/// reverted.
#[cfg_attr(test, automock)]
pub trait LocalKeys<K>: Send + Sync + 'static
where
    K: AllocatorKey,
{
    fn lookup_id(
        &self,
        id: NumericId,
    ) -> Option<K>;
}
