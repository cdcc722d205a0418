use serde::Deserialize;
use serde::Serialize;

use super::BackoffPolicy;
use crate::Result;

/// Configuration of the backend-synchronized cache
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    /// Recreate remotely deleted keys this node still references
    #[serde(default)]
    pub enable_master_key_protection: bool,

    /// Retry behaviour of master-key recreation.
    /// Unlimited attempts and no delay cap by default.
    #[serde(default)]
    pub reconcile: BackoffPolicy,
}

impl CacheConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        self.reconcile.validate()
    }
}
