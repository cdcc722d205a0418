//! Identity Allocation Error Hierarchy
//!
//! Defines the error types surfaced by the distributed cache, the local
//! allocator and the change streams, categorized by the layer that raises them.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Numeric identity space failures
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// Remote store failures reported through the backend trait
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Change stream termination
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Backend-delivered event rejected by a validator
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// No free ID in scope and no reclaimable withheld ID
    #[error("Out of identity space (scope: {scope:#010x}, range: {min_id}..={max_id})")]
    Exhausted { scope: u32, min_id: u32, max_id: u32 },

    /// Allocator window does not fit the configured scope
    #[error("Invalid identity range {min_id}..={max_id} for scope {scope:#010x}")]
    InvalidRange { scope: u32, min_id: u32, max_id: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Remote store could not be reached
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Key operation rejected by the remote store
    #[error("Key update failed for identity {id}: {reason}")]
    UpdateFailed { id: u32, reason: String },

    /// Single backend operation exceeded its deadline
    #[error("Backend operation timed out after {0:?}")]
    Timeout(Duration),

    /// Initial listing aborted before completion
    #[error("List and watch aborted: {0}")]
    ListFailed(String),

    /// Retry policy exhaustion
    #[error("Retry budget exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: usize },
}

/// Terminal outcome delivered to change stream observers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Observer's cancellation token fired
    #[error("Observation cancelled")]
    Cancelled,

    /// Producer completed the stream with an error
    #[error("Stream closed by producer: {0}")]
    Closed(String),
}
