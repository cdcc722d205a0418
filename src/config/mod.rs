//! Configuration management for the identity allocators.
//!
//! Provides hierarchical configuration loading from multiple sources with priority:
//! 1. Default values (hardcoded)
//! 2. Config file named by `IDENTITY_CONFIG_PATH`
//! 3. Runtime override files
//! 4. Environment variables with `IDENTITY__` prefix (highest priority)

mod cache;
mod local;
mod retry;
pub use cache::*;
pub use local::*;
pub use retry::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "IDENTITY";
const CONFIG_PATH_ENV: &str = "IDENTITY_CONFIG_PATH";

#[derive(Serialize, Deserialize, Clone, Default)]
pub struct AllocatorSettings {
    /// Backend-synchronized cache behaviour
    #[serde(default)]
    pub cache: CacheConfig,
    /// Node-local allocation window
    #[serde(default)]
    pub local: LocalAllocatorConfig,
}

impl Debug for AllocatorSettings {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("AllocatorSettings")
            .field("cache", &self.cache)
            .field("local", &self.local)
            .finish()
    }
}

impl AllocatorSettings {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers MUST call `validate()` once all overrides are applied.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("IDENTITY__CACHE__ENABLE_MASTER_KEY_PROTECTION", "true");
    /// let settings = AllocatorSettings::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(environment());

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Applies a configuration file on top of the current values.
    ///
    /// Environment variables are re-applied afterwards and keep the highest
    /// priority. No validation is performed.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Validates every subsystem and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.cache.validate()?;
        self.local.validate()?;
        Ok(self)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
