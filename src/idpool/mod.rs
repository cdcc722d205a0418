//! Numeric ID pool seam
//!
//! The pool is shared by every allocator drawing from the same numeric
//! space. The distributed cache only keeps it in step with observed
//! ownership: IDs seen in the backend are removed, deleted IDs are returned.

mod memory_pool;
pub use memory_pool::*;


#[cfg(test)]
use mockall::automock;

use crate::NumericId;

#[cfg_attr(test, automock)]
pub trait IdPool: Send + Sync + 'static {
    /// Marks `id` as taken. Idempotent.
    fn remove(
        &self,
        id: NumericId,
    );

    /// Returns `id` to the pool. Idempotent.
    fn insert(
        &self,
        id: NumericId,
    );
}
