//! Session storage configuration

use serde::{Deserialize, Serialize};
#[cfg(feature = "redis")]
use std::time::Duration;

/// Type of session storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendType {
    /// Process-local concurrent map (default)
    #[default]
    Memory,

    /// Redis/Valkey, shared across proxy instances
    #[cfg(feature = "redis")]
    Redis,
}

/// Configuration for the session store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendType,

    /// Required if backend = redis
    #[cfg(feature = "redis")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    #[cfg(feature = "redis")]
    pub fn redis(config: RedisConfig) -> Self {
        Self {
            backend: StorageBackendType::Redis,
            redis: Some(config),
        }
    }
}

/// Redis/Valkey connection configuration
#[cfg(feature = "redis")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL: `redis://host:port[/db]`, `rediss://` for TLS,
    /// `unix:///path/to/socket`
    pub url: String,

    /// Prefix prepended to every session id (default: "radius:session:")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Expiry applied to stored sessions; unset means sessions live until reset
    #[serde(default)]
    pub ttl_seconds: Option<u64>,

    /// Connection timeout in milliseconds (default: 5000)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-command timeout in milliseconds (default: 2000)
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Retries for failed commands (default: 2)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retries in milliseconds (default: 50)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[cfg(feature = "redis")]
fn default_key_prefix() -> String {
    "radius:session:".to_string()
}

#[cfg(feature = "redis")]
fn default_connect_timeout_ms() -> u64 {
    5000
}

#[cfg(feature = "redis")]
fn default_command_timeout_ms() -> u64 {
    2000
}

#[cfg(feature = "redis")]
fn default_max_retries() -> u32 {
    2
}

#[cfg(feature = "redis")]
fn default_retry_delay_ms() -> u64 {
    50
}

#[cfg(feature = "redis")]
impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: default_key_prefix(),
            ttl_seconds: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[cfg(feature = "redis")]
impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_seconds = Some(ttl.as_secs().max(1));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_seconds.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
