use std::collections::HashMap;

use tracing::debug;

use crate::AllocatorKey;
use crate::NumericId;

/// Bidirectional `{ID -> key}` / `{key -> ID}` map.
///
/// For every entry `by_id[id] == key` iff `by_key[key.get_key()] == id`.
#[derive(Debug, Clone)]
pub struct Generation<K> {
    by_id: HashMap<NumericId, K>,
    by_key: HashMap<String, NumericId>,
}

impl<K> Default for Generation<K> {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            by_key: HashMap::new(),
        }
    }
}

impl<K> Generation<K>
where
    K: AllocatorKey,
{
    /// Points `id` at `key`, dropping whatever either side mapped to before
    pub fn upsert(
        &mut self,
        id: NumericId,
        key: K,
    ) {
        if let Some(old) = self.by_id.get(&id) {
            self.by_key.remove(&old.get_key());
        }

        let canonical = key.get_key();
        if let Some(stale) = self.by_key.get(&canonical).copied() {
            if stale != id {
                debug!(%id, %stale, key = %canonical, "key moved to a new id, evicting stale id");
                self.by_id.remove(&stale);
            }
        }

        self.by_key.insert(canonical, id);
        self.by_id.insert(id, key);
    }

    pub fn remove(
        &mut self,
        id: NumericId,
    ) -> Option<K> {
        let key = self.by_id.remove(&id)?;
        let canonical = key.get_key();
        if self.by_key.get(&canonical) == Some(&id) {
            self.by_key.remove(&canonical);
        }
        Some(key)
    }

    pub fn id_of(
        &self,
        canonical: &str,
    ) -> Option<NumericId> {
        self.by_key.get(canonical).copied()
    }

    pub fn key_of(
        &self,
        id: NumericId,
    ) -> Option<&K> {
        self.by_id.get(&id)
    }

    pub fn contains_id(
        &self,
        id: NumericId,
    ) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NumericId, &K)> {
        self.by_id.iter().map(|(id, key)| (*id, key))
    }
}
