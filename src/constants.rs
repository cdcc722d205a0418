// -
// Numeric identity space

/// High bits of a numeric identity that select its scope
pub const SCOPE_MASK: u32 = 0xFF00_0000;

/// Scope of identities allocated through the backend
pub const SCOPE_GLOBAL: u32 = 0x0000_0000;
/// Scope of identities that never leave the node
pub const SCOPE_LOCAL: u32 = 0x0100_0000;
/// Scope of identities mirrored for remote nodes
pub const SCOPE_REMOTE_NODE: u32 = 0x0200_0000;

/// Bounds of the node-local allocation window (low bits only)
pub(crate) const MIN_LOCAL_ID: u32 = 1;
pub(crate) const MAX_LOCAL_ID: u32 = 0x00FF_FFFF;

// -
// Backend operations

/// Time allowed for a single backend operation issued in response to an event
pub(crate) const BACKEND_OP_TIMEOUT_MS: u64 = 10_000;

/// Label source used when a parsed label carries none
pub(crate) const LABEL_SOURCE_UNSPEC: &str = "unspec";
