use serde::Deserialize;
use serde::Serialize;

use crate::constants::MAX_LOCAL_ID;
use crate::constants::MIN_LOCAL_ID;
use crate::constants::SCOPE_LOCAL;
use crate::constants::SCOPE_MASK;
use crate::AllocationError;
use crate::Result;

/// Allocation window of a node-local allocator.
///
/// IDs are `scope | n` for `n` in `min_id..=max_id`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct LocalAllocatorConfig {
    #[serde(default = "default_scope")]
    pub scope: u32,

    #[serde(default = "default_min_id")]
    pub min_id: u32,

    #[serde(default = "default_max_id")]
    pub max_id: u32,
}

impl Default for LocalAllocatorConfig {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            min_id: default_min_id(),
            max_id: default_max_id(),
        }
    }
}

impl LocalAllocatorConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        let invalid = self.scope & !SCOPE_MASK != 0
            || self.min_id == 0
            || self.min_id > self.max_id
            || self.max_id & SCOPE_MASK != 0;
        if invalid {
            return Err(AllocationError::InvalidRange {
                scope: self.scope,
                min_id: self.min_id,
                max_id: self.max_id,
            }
            .into());
        }
        Ok(())
    }
}

fn default_scope() -> u32 {
    SCOPE_LOCAL
}
fn default_min_id() -> u32 {
    MIN_LOCAL_ID
}
fn default_max_id() -> u32 {
    MAX_LOCAL_ID
}
