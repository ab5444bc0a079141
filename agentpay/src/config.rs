//! SDK configuration.
//!
//! Everything is optional and environment-driven:
//!
//! - `AGENTPAY_STORAGE` — `memory` (default) or `redis`
//! - `AGENTPAY_REDIS_URL` — connection string for the redis backend
//! - `AGENTPAY_LOG_LEVEL` — tracing filter (default `info`)
//! - `AGENTPAY_ENV` — `development` (default) or `production`

use serde::{Deserialize, Serialize};

/// Which storage backend to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Process-local, non-persistent.
    #[default]
    Memory,
    /// Network-backed (see the `agentpay-redis` crate).
    Redis,
}

/// Runtime environment tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development defaults.
    #[default]
    Development,
    /// Production.
    Production,
}

/// SDK configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Selected storage backend.
    #[serde(default)]
    pub storage: StorageKind,

    /// Redis connection string, used when `storage` is [`StorageKind::Redis`].
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Tracing filter directive (e.g. `info`, `agentpay=debug`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Runtime environment tag.
    #[serde(default)]
    pub environment: Environment,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageKind::default(),
            redis_url: default_redis_url(),
            log_level: default_log_level(),
            environment: Environment::default(),
        }
    }
}

impl Config {
    /// Builds a configuration from the process environment, falling back to
    /// defaults for anything unset or unrecognized.
    #[must_use]
    pub fn from_env() -> Self {
        let storage = match std::env::var("AGENTPAY_STORAGE").as_deref() {
            Ok("redis") => StorageKind::Redis,
            _ => StorageKind::Memory,
        };
        let environment = match std::env::var("AGENTPAY_ENV").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        };
        Self {
            storage,
            redis_url: std::env::var("AGENTPAY_REDIS_URL").unwrap_or_else(|_| default_redis_url()),
            log_level: std::env::var("AGENTPAY_LOG_LEVEL").unwrap_or_else(|_| default_log_level()),
            environment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379/0");
    }
}
