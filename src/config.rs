//! Runtime configuration (ambient stack), TOML-based the way the
//! teacher's `forwarder/config.rs` loads its settings.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Top-level config for the demo binary: where to find Redis (if any)
/// and how aggressively to expire tombstones/items.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default = "default_ttl_seconds")]
    pub item_ttl_seconds: i64,
    #[serde(default = "default_deleted_ttl_seconds")]
    pub deleted_ttl_seconds: i64,
    #[serde(default = "default_notify_stale_seconds")]
    pub notify_stale_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

const fn default_ttl_seconds() -> i64 {
    60 * 60 * 24 * 30 // 30 days
}

const fn default_deleted_ttl_seconds() -> i64 {
    60 * 60 * 24 // 1 day
}

const fn default_notify_stale_seconds() -> i64 {
    crate::notify::STALE_SLOT_SECONDS
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            redis: None,
            item_ttl_seconds: default_ttl_seconds(),
            deleted_ttl_seconds: default_deleted_ttl_seconds(),
            notify_stale_seconds: default_notify_stale_seconds(),
        }
    }
}

impl FeedConfig {
    /// Loads config from a TOML file; a missing file is not an error, the
    /// default (in-memory store, no expiry override) is used instead.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw).map_err(|e| ConfigError(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError(format!("{}: {e}", path.display()))),
        }
    }
}
