//! Mirror configuration.
//!
//! One `MirrorConfig` value is built by the host and handed to every
//! component constructor; nothing reads configuration from global state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{MirrorError, MirrorResult};

/// Default Unix socket the store listens on.
pub const DEFAULT_URL: &str = "redis+unix:///media/redis/local.sock";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Master switch. A disabled config refuses to construct a mirror.
    pub enabled: bool,
    /// Store connection URL (`redis://host:port` or `redis+unix:///path`).
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    /// Reconnect attempts made by the connection manager before a call fails.
    pub max_retries: usize,
    /// Base reconnect backoff in milliseconds.
    pub retry_delay_ms: u64,
    /// Compress block payloads with zstd.
    pub compress_enabled: bool,
    /// Worker tasks draining the transaction queue.
    pub workers: usize,
    /// Bounded transaction queue capacity.
    pub queue_capacity: usize,
    pub tx_ttl_secs: u64,
    pub block_ttl_secs: u64,
    pub lease_ttl_ms: u64,
    /// COUNT hint for prefix scans.
    pub scan_count: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: DEFAULT_URL.to_string(),
            username: None,
            password: None,
            db: 0,
            max_retries: 3,
            retry_delay_ms: 2_000,
            compress_enabled: false,
            workers: 10,
            queue_capacity: 1_000,
            tx_ttl_secs: 10 * 24 * 60 * 60,
            block_ttl_secs: 60,
            lease_ttl_ms: 5_000,
            scan_count: 1_000,
        }
    }
}

impl MirrorConfig {
    /// Parse a JSON document, filling omitted keys from [`Default`].
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the document is malformed or fails validation.
    pub fn from_json(json: &str) -> MirrorResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MirrorError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Reject values that would stall or disable a component silently.
    ///
    /// # Errors
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> MirrorResult<()> {
        let checks: [(&str, bool); 6] = [
            ("workers", self.workers > 0),
            ("queue_capacity", self.queue_capacity > 0),
            ("tx_ttl_secs", self.tx_ttl_secs > 0),
            ("block_ttl_secs", self.block_ttl_secs > 0),
            ("lease_ttl_ms", self.lease_ttl_ms > 0),
            ("scan_count", self.scan_count > 0),
        ];
        for (field, ok) in checks {
            if !ok {
                return Err(MirrorError::InvalidConfig(format!(
                    "{field} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    pub fn tx_ttl(&self) -> Duration {
        Duration::from_secs(self.tx_ttl_secs)
    }

    pub fn block_ttl(&self) -> Duration {
        Duration::from_secs(self.block_ttl_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }
}
