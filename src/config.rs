//! Configuration management for Keygate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{LimiterError, Result};
use crate::ratelimit::BucketPolicy;

/// Prefix for environment variable overrides, e.g. `KEYGATE__DEFAULT__CAPACITY=50`.
const ENV_PREFIX: &str = "KEYGATE";

/// Limiter configuration.
///
/// ```yaml
/// default:
///   capacity: 100
///   refill_rate: 1.667
/// overrides:
///   premium:
///     capacity: 1000
///     refill_rate: 16.67
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Policy for every key without an override
    #[serde(default)]
    pub default: BucketPolicy,

    /// Per-key policies
    #[serde(default)]
    pub overrides: HashMap<String, BucketPolicy>,
}

impl LimiterConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Self::parse_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional file, then apply `KEYGATE__*`
    /// environment variable overrides to the default policy.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Like [`load`](Self::load), reading `<prefix>__DEFAULT__CAPACITY` and
    /// `<prefix>__DEFAULT__REFILL_RATE`.
    ///
    /// Override keys come from the file only. The `config` crate folds map
    /// keys to lowercase, and keys are case-sensitive, so they never pass
    /// through it.
    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let file = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading limiter configuration");
                Self::parse_yaml(&std::fs::read_to_string(path)?)?
            }
            None => Self::default(),
        };

        let settings = config::Config::builder()
            .set_default("default.capacity", file.default.capacity)
            .and_then(|b| b.set_default("default.refill_rate", file.default.refill_rate))
            .map_err(|e| LimiterError::Config(e.to_string()))?
            .add_source(
                config::Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| LimiterError::Config(e.to_string()))?;

        let default: BucketPolicy = settings
            .get("default")
            .map_err(|e| LimiterError::Config(e.to_string()))?;

        let config = LimiterConfig {
            default,
            overrides: file.overrides,
        };
        config.validate()?;
        Ok(config)
    }

    fn parse_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse limiter config: {}", e)))
    }

    /// Check every policy in the configuration.
    pub fn validate(&self) -> Result<()> {
        self.default
            .validate()
            .map_err(|e| LimiterError::Config(format!("default policy: {}", e)))?;

        for (key, policy) in &self.overrides {
            policy
                .validate()
                .map_err(|e| LimiterError::Config(format!("override for key {:?}: {}", key, e)))?;
        }
        Ok(())
    }
}
