//! Numeric identity allocation for label-derived keys.
//!
//! Two allocators share one change-notification model:
//! - [`DistributedCache`] mirrors an identity table kept in a remote store,
//!   swapping in a fully listed generation at once and protecting IDs this
//!   node still uses from remote deletion.
//! - [`LocalAllocator`] hands out node-scoped IDs with reference counting and
//!   restart-stable reuse of withheld IDs.
//!
//! Both implement [`Observable`]: observers receive the current state, a
//! [`Change::Sync`] marker, then live changes, with no gap or duplicate at
//! the boundary.

mod backend;
mod cache;
mod config;
mod errors;
mod idpool;
mod local;
mod stream;
mod types;
pub(crate) mod utils;

pub mod constants;

pub use backend::*;
pub use cache::*;
pub use config::*;
pub use errors::*;
pub use idpool::*;
pub use local::*;
pub use stream::*;
pub use types::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
