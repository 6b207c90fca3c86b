//! Locksmith configuration.
//!
//! Values are layered with `figment`: built-in defaults, then an optional
//! `locksmith.toml`, then `LOCKSMITH_*` environment variables.
//!
//! ```toml
//! on_violation = "proceed"
//! before_min = 32
//! max_locks = 4096
//! ```

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "locksmith.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "LOCKSMITH_";

/// Minimum initial capacity of a record's before-set, in bits.
pub const DEFAULT_BEFORE_MIN: usize = 16;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A provider failed or a value had the wrong type.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value parsed but is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What to do when an acquisition would invert an observed lock order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationPolicy {
    /// Deny the acquisition and return `Error::LockOrderViolation`.
    #[default]
    Refuse,
    /// Report the inversion and acquire anyway.
    Proceed,
}

/// Lock tracking configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocksmithConfig {
    /// Policy applied when an inversion is detected.
    pub on_violation: ViolationPolicy,
    /// Initial before-set capacity for new records.
    pub before_min: usize,
    /// Maximum number of simultaneously live locks.
    pub max_locks: usize,
}

impl Default for LocksmithConfig {
    fn default() -> Self {
        Self {
            on_violation: ViolationPolicy::Refuse,
            before_min: DEFAULT_BEFORE_MIN,
            max_locks: usize::MAX,
        }
    }
}

impl LocksmithConfig {
    /// Loads defaults, `locksmith.toml` (if present) and `LOCKSMITH_*`
    /// environment variables, in increasing priority.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment().merge(Toml::file(CONFIG_FILE)))
    }

    /// Like [`load`](Self::load) but reads the TOML layer from `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment().merge(Toml::file(path.as_ref())))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the registry cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.before_min == 0 {
            return Err(ConfigError::Invalid("before_min must be at least 1".into()));
        }
        if self.max_locks == 0 {
            return Err(ConfigError::Invalid("max_locks must be at least 1".into()));
        }
        Ok(())
    }
}
