use std::collections::HashMap;
use std::collections::HashSet;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::constants::SCOPE_MASK;
use crate::AllocationError;
use crate::AllocatorKey;
use crate::Change;
use crate::LocalAllocatorConfig;
use crate::Multicast;
use crate::NumericId;
use crate::Observable;
use crate::Result;
use crate::StreamError;

/// Point-in-time view of a local identity.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalIdentity<K> {
    pub id: NumericId,
    pub key: K,
    pub reference_count: u32,
}

#[derive(Debug)]
struct LocalEntry<K> {
    key: K,
    reference_count: u32,
}

impl<K: Clone> LocalEntry<K> {
    fn snapshot(
        &self,
        id: NumericId,
    ) -> LocalIdentity<K> {
        LocalIdentity {
            id,
            key: self.key.clone(),
            reference_count: self.reference_count,
        }
    }
}

#[derive(Debug)]
struct LocalState<K> {
    by_id: HashMap<NumericId, LocalEntry<K>>,
    by_key: HashMap<String, NumericId>,
    /// Low bits of the next ID the cyclic scan tries
    next: u32,
    /// Reserved but unassigned IDs
    withheld: HashSet<NumericId>,
}

/// Reference-counted allocator for node-local identities.
///
/// IDs are `scope | n` with `n` in `min_id..=max_id`. All mutations emit
/// their change under the allocator's write lock.
#[derive(Debug)]
pub struct LocalAllocator<K> {
    config: LocalAllocatorConfig,
    state: RwLock<LocalState<K>>,
    changes: Multicast<Change<K>>,
}

impl<K> LocalAllocator<K>
where
    K: AllocatorKey,
{
    pub fn new(config: LocalAllocatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: RwLock::new(LocalState {
                by_id: HashMap::new(),
                by_key: HashMap::new(),
                next: config.min_id,
                withheld: HashSet::new(),
            }),
            changes: Multicast::new(),
        })
    }

    fn in_scope(
        &self,
        id: NumericId,
    ) -> bool {
        id.scope() == self.config.scope
    }

    fn in_window(
        &self,
        id: NumericId,
    ) -> bool {
        let low = id.as_u32() & !SCOPE_MASK;
        self.in_scope(id) && (self.config.min_id..=self.config.max_id).contains(&low)
    }

    fn bump_next(
        &self,
        state: &mut LocalState<K>,
    ) {
        if state.next >= self.config.max_id {
            state.next = self.config.min_id;
        } else {
            state.next += 1;
        }
    }

    /// Picks a free ID. Caller holds the write lock.
    ///
    /// `candidate` wins when it lies in this allocator's window and is not
    /// taken, even if withheld. Otherwise the window is scanned cyclically
    /// from the cursor. With the window full, the first withheld ID that is
    /// not taken is reclaimed.
    fn get_next_free_numeric_id(
        &self,
        state: &mut LocalState<K>,
        candidate: NumericId,
    ) -> Result<NumericId> {
        if self.in_window(candidate) {
            if !state.by_id.contains_key(&candidate) {
                state.withheld.remove(&candidate);
                debug!(id = %candidate, "Reallocated restored local identity");
                return Ok(candidate);
            }
            debug!(id = %candidate, "Requested local identity not available to allocate");
        }

        let first = state.next;
        loop {
            let id = NumericId::new(state.next | self.config.scope);
            let free = !state.by_id.contains_key(&id) && !state.withheld.contains(&id);
            self.bump_next(state);
            if free {
                return Ok(id);
            }

            if state.next == first {
                let reclaimed = state
                    .withheld
                    .iter()
                    .copied()
                    .find(|withheld| !state.by_id.contains_key(withheld));
                if let Some(id) = reclaimed {
                    state.withheld.remove(&id);
                    warn!(
                        %id,
                        "Local identity allocator full; claiming first withheld identity. This may cause momentary policy drops"
                    );
                    return Ok(id);
                }

                return Err(AllocationError::Exhausted {
                    scope: self.config.scope,
                    min_id: self.config.min_id,
                    max_id: self.config.max_id,
                }
                .into());
            }
        }
    }

    /// Returns the identity for `key`, taking a reference.
    ///
    /// The flag is true when a new identity was created. `old_id` is reused
    /// when possible; pass [`NumericId::INVALID`] when there is none. Every
    /// returned identity must eventually be passed to [`LocalAllocator::release`].
    pub fn lookup_or_create(
        &self,
        key: K,
        old_id: NumericId,
    ) -> Result<(LocalIdentity<K>, bool)> {
        let canonical = key.get_key();
        let mut state = self.state.write();

        if let Some(id) = state.by_key.get(&canonical).copied() {
            if let Some(entry) = state.by_id.get_mut(&id) {
                entry.reference_count += 1;
                return Ok((entry.snapshot(id), false));
            }
        }

        let id = self.get_next_free_numeric_id(&mut state, old_id)?;
        let entry = LocalEntry {
            key: key.clone(),
            reference_count: 1,
        };
        let identity = entry.snapshot(id);
        state.by_key.insert(canonical, id);
        state.by_id.insert(id, entry);

        self.changes.emit(Change::Upsert { id, key });
        Ok((identity, true))
    }

    /// Drops one reference. Returns true when the identity was forgotten.
    pub fn release(
        &self,
        identity: &LocalIdentity<K>,
    ) -> bool {
        let mut state = self.state.write();

        let Some(entry) = state.by_id.get_mut(&identity.id) else {
            return false;
        };
        if entry.reference_count > 1 {
            entry.reference_count -= 1;
            return false;
        }
        let Some(entry) = state.by_id.remove(&identity.id) else {
            return false;
        };

        state.by_key.remove(&entry.key.get_key());
        self.changes.emit(Change::Delete {
            id: identity.id,
            key: Some(entry.key),
        });
        true
    }

    /// Reserves `ids` against allocation. IDs outside this allocator's scope
    /// are returned untouched.
    pub fn withhold(
        &self,
        ids: &[NumericId],
    ) -> Vec<NumericId> {
        if ids.is_empty() {
            return Vec::new();
        }

        let mut unused = Vec::new();
        let mut state = self.state.write();
        for id in ids {
            if !self.in_scope(*id) {
                unused.push(*id);
                continue;
            }
            state.withheld.insert(*id);
        }
        unused
    }

    pub fn unwithhold(
        &self,
        ids: &[NumericId],
    ) {
        if ids.is_empty() {
            return;
        }

        let mut state = self.state.write();
        for id in ids.iter().filter(|id| self.in_scope(**id)) {
            state.withheld.remove(id);
        }
    }

    /// Reads without taking a reference; do not release the result.
    pub fn lookup(
        &self,
        key: &K,
    ) -> Option<LocalIdentity<K>> {
        let state = self.state.read();
        let id = state.by_key.get(&key.get_key())?;
        state.by_id.get(id).map(|entry| entry.snapshot(*id))
    }

    /// Reads without taking a reference; do not release the result.
    pub fn lookup_by_id(
        &self,
        id: NumericId,
    ) -> Option<LocalIdentity<K>> {
        self.state.read().by_id.get(&id).map(|entry| entry.snapshot(id))
    }

    pub fn identities(&self) -> HashMap<NumericId, LocalIdentity<K>> {
        self.state
            .read()
            .by_id
            .iter()
            .map(|(id, entry)| (*id, entry.snapshot(*id)))
            .collect()
    }

    /// Snapshot of every live identity, for persistence
    pub fn checkpoint(&self) -> Vec<LocalIdentity<K>> {
        let state = self.state.read();
        let mut identities: Vec<LocalIdentity<K>> =
            state.by_id.iter().map(|(id, entry)| entry.snapshot(*id)).collect();
        identities.sort_by_key(|identity| identity.id);
        identities
    }

    pub fn size(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_withheld(
        &self,
        id: NumericId,
    ) -> bool {
        self.state.read().withheld.contains(&id)
    }

    /// Completes the change stream. Later observers get the replay and
    /// complete right after it.
    pub fn close(&self) {
        self.changes.complete(Ok(()));
    }
}

impl<K> Observable<Change<K>> for LocalAllocator<K>
where
    K: AllocatorKey,
{
    /// Replays the live identities, then `Sync`, then every later change.
    ///
    /// Must be called from within a tokio runtime.
    fn observe<N, C>(
        &self,
        token: CancellationToken,
        next: N,
        complete: C,
    ) where
        N: FnMut(Change<K>) + Send + 'static,
        C: FnOnce(std::result::Result<(), StreamError>) + Send + 'static,
    {
        if token.is_cancelled() {
            complete(Err(StreamError::Cancelled));
            return;
        }

        let state = self.state.read();
        let replay: Vec<Change<K>> = state
            .by_id
            .iter()
            .map(|(id, entry)| Change::Upsert {
                id: *id,
                key: entry.key.clone(),
            })
            .chain(std::iter::once(Change::Sync))
            .collect();
        self.changes.observe_with_replay(replay, token, next, complete);
    }
}
