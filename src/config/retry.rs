use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::BACKEND_OP_TIMEOUT_MS;
use crate::Error;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (0 means unlimited retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single operation timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds, 0 means no cap and linear growth)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before attempt `attempt + 1`.
    ///
    /// With a cap the delay doubles from the base up to `max_delay_ms`.
    /// Without one it grows linearly, so an uncapped retry loop keeps
    /// attempting at a pace proportional to how long it has been failing.
    pub fn delay_for(
        &self,
        attempt: usize,
    ) -> Duration {
        if self.max_delay_ms == 0 {
            let steps = (attempt as u64).saturating_add(1);
            return Duration::from_millis(self.base_delay_ms.saturating_mul(steps));
        }

        let factor = 1u64.checked_shl(attempt.min(63) as u32).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message("timeout_ms must be greater than 0".into())));
        }

        if self.base_delay_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "base_delay_ms must be greater than 0".into(),
            )));
        }

        if self.max_delay_ms != 0 && self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "max_delay_ms {} should not be less than base_delay_ms {}",
                self.max_delay_ms, self.base_delay_ms
            ))));
        }

        Ok(())
    }
}

fn default_max_retries() -> usize {
    0
}
fn default_op_timeout_ms() -> u64 {
    BACKEND_OP_TIMEOUT_MS
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    0
}
