use serde::Deserialize;
use serde::Serialize;

use crate::NumericId;

/// Kind of a change, also handed to cache validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Sync,
    Upsert,
    Delete,
}

/// Event delivered to change stream observers.
///
/// Every observer first receives the current state as `Upsert`s, then a
/// single `Sync`, then live changes.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<K> {
    /// Initial state fully replayed; the feed is live from here
    Sync,
    Upsert { id: NumericId, key: K },
    Delete { id: NumericId, key: Option<K> },
}

impl<K> Change<K> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::Sync => ChangeKind::Sync,
            Change::Upsert { .. } => ChangeKind::Upsert,
            Change::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// `None` for `Sync`
    pub fn id(&self) -> Option<NumericId> {
        match self {
            Change::Sync => None,
            Change::Upsert { id, .. } | Change::Delete { id, .. } => Some(*id),
        }
    }
}

/// Typed event forwarded on the cache's optional internal event channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatorEvent<K> {
    pub kind: ChangeKind,
    pub id: NumericId,
    pub key: Option<K>,
}
