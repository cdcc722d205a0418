//! Backend-synchronized identity cache with master-key protection.

mod builder;
mod distributed_cache;
mod generation;
mod reconciler;

pub use builder::*;
pub use distributed_cache::CacheValidator;
pub use distributed_cache::DistributedCache;
pub use distributed_cache::ListDone;
pub use generation::*;
pub use reconciler::ReconcileStatus;
