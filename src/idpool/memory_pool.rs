use dashmap::DashSet;
use tracing::trace;

use super::IdPool;
use crate::NumericId;

/// In-memory pool over an inclusive ID range.
///
/// IDs outside the range are ignored, so one pool can be shared with
/// allocators observing a wider space.
#[derive(Debug)]
pub struct MemoryIdPool {
    min_id: u32,
    max_id: u32,
    available: DashSet<NumericId>,
}

impl MemoryIdPool {
    /// Creates a pool with every ID in `min_id..=max_id` available
    pub fn new(
        min_id: u32,
        max_id: u32,
    ) -> Self {
        let available = DashSet::new();
        for raw in min_id..=max_id {
            available.insert(NumericId::new(raw));
        }
        Self {
            min_id,
            max_id,
            available,
        }
    }

    pub fn contains(
        &self,
        id: NumericId,
    ) -> bool {
        self.available.contains(&id)
    }

    /// Number of IDs currently available
    pub fn available(&self) -> usize {
        self.available.len()
    }

    fn in_range(
        &self,
        id: NumericId,
    ) -> bool {
        (self.min_id..=self.max_id).contains(&id.as_u32())
    }
}

impl IdPool for MemoryIdPool {
    fn remove(
        &self,
        id: NumericId,
    ) {
        if self.available.remove(&id).is_some() {
            trace!(%id, "id leased");
        }
    }

    fn insert(
        &self,
        id: NumericId,
    ) {
        if !self.in_range(id) {
            trace!(%id, "id outside pool range ignored");
            return;
        }
        self.available.insert(id);
    }
}
