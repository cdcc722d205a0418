use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::SCOPE_GLOBAL;
use crate::constants::SCOPE_LOCAL;
use crate::constants::SCOPE_MASK;
use crate::constants::SCOPE_REMOTE_NODE;

/// Numeric identifier standing in for a key.
///
/// The high byte selects the scope (see [`IdentityScope`]); the low bits are
/// the position inside that scope's allocation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NumericId(u32);

impl NumericId {
    /// Never handed out by any allocator
    pub const INVALID: NumericId = NumericId(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Scope bits of this identity
    pub const fn scope(self) -> u32 {
        self.0 & SCOPE_MASK
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl From<u32> for NumericId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<NumericId> for u32 {
    fn from(id: NumericId) -> Self {
        id.0
    }
}

impl fmt::Display for NumericId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Well-known partitions of the numeric identity space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityScope {
    Global,
    Local,
    RemoteNode,
}

impl IdentityScope {
    pub const fn mask(self) -> u32 {
        match self {
            IdentityScope::Global => SCOPE_GLOBAL,
            IdentityScope::Local => SCOPE_LOCAL,
            IdentityScope::RemoteNode => SCOPE_REMOTE_NODE,
        }
    }

    /// Classifies an identity; unknown scope bits yield `None`
    pub const fn of(id: NumericId) -> Option<Self> {
        match id.scope() {
            SCOPE_GLOBAL => Some(IdentityScope::Global),
            SCOPE_LOCAL => Some(IdentityScope::Local),
            SCOPE_REMOTE_NODE => Some(IdentityScope::RemoteNode),
            _ => None,
        }
    }
}
