//! Node-local identities
//!
//! Identities that never leave this node are allocated from a bounded,
//! scoped window with reference counting. Withheld IDs keep identities
//! restored after a restart from being handed to other keys.

mod local_allocator;
pub use local_allocator::*;
