use crate::coa::DEFAULT_COA_PORT;
use crate::dedup::{DEFAULT_REQUEST_CACHE_MAX_ENTRIES, DEFAULT_REQUEST_CACHE_TTL};
use crate::lb::{Allocator, LoadBalanceConfig, LIVE_TIER};
use crate::module::{ModuleConfig, ModuleDescriptor};
use crate::session::StorageConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One UDP listener and its module chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Listener name; load balancing routes by it
    pub name: String,

    #[serde(default = "default_listen_address")]
    pub address: String,

    pub port: u16,

    /// Shared secret for this listener; falls back to the server secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Module chain, in execution order
    #[serde(default)]
    pub modules: Vec<ModuleDescriptor>,
}

impl ListenerConfig {
    /// Get socket address for binding
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr: IpAddr = self.address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "Invalid IP address for listener {}: {}",
                self.name, self.address
            ))
        })?;
        Ok(SocketAddr::new(addr, self.port))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default shared secret
    #[serde(default = "default_secret")]
    pub secret: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub session_storage: StorageConfig,

    #[serde(default)]
    pub load_balance: LoadBalanceConfig,

    /// Filters run on every request of every listener, before its modules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<ModuleDescriptor>,

    /// Seconds a request stays in the retransmission cache (default: 60)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_cache_ttl: Option<u64>,

    /// Cached requests per listener (default: 10000)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_cache_max_entries: Option<usize>,

    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_secret() -> String {
    "testing123".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            secret: default_secret(),
            log_level: None,
            session_storage: StorageConfig::default(),
            load_balance: LoadBalanceConfig::default(),
            filters: Vec::new(),
            request_cache_ttl: None,
            request_cache_max_entries: None,
            listeners: vec![],
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Secret of `listener`, or the server secret
    pub fn listener_secret<'a>(&'a self, listener: &'a ListenerConfig) -> &'a [u8] {
        listener
            .secret
            .as_deref()
            .unwrap_or(&self.secret)
            .as_bytes()
    }

    /// Retransmission cache lifetime
    pub fn request_cache_ttl(&self) -> Duration {
        self.request_cache_ttl
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_CACHE_TTL)
    }

    pub fn request_cache_max_entries(&self) -> usize {
        self.request_cache_max_entries
            .unwrap_or(DEFAULT_REQUEST_CACHE_MAX_ENTRIES)
    }

    /// Validate configuration
    ///
    /// Module and filter configs are checked when the registry builds them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::Invalid("Secret cannot be empty".to_string()));
        }

        if self.request_cache_ttl == Some(0) {
            return Err(ConfigError::Invalid(
                "request_cache_ttl must be positive".to_string(),
            ));
        }
        if self.request_cache_max_entries == Some(0) {
            return Err(ConfigError::Invalid(
                "request_cache_max_entries must be positive".to_string(),
            ));
        }
        if let Some(filter) = self.filters.iter().find(|f| f.name.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "Filter has empty name (config: {:?})",
                filter.config
            )));
        }

        #[cfg(feature = "redis")]
        {
            if self.session_storage.backend == crate::session::StorageBackendType::Redis
                && self.session_storage.redis.is_none()
            {
                return Err(ConfigError::Invalid(
                    "Redis session storage requires a redis section".to_string(),
                ));
            }
        }

        Allocator::with_seed(&self.load_balance, 0)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        for listener in &self.listeners {
            if listener.name.is_empty() {
                return Err(ConfigError::Invalid("Listener has empty name".to_string()));
            }
            if !names.insert(listener.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate listener name: {}",
                    listener.name
                )));
            }
            if listener.port == 0 {
                return Err(ConfigError::Invalid(format!(
                    "Listener {} port cannot be 0",
                    listener.name
                )));
            }
            if !addresses.insert(listener.socket_addr()?) {
                return Err(ConfigError::Invalid(format!(
                    "Listener {} reuses address {}:{}",
                    listener.name, listener.address, listener.port
                )));
            }
            if listener.secret.as_deref() == Some("") {
                return Err(ConfigError::Invalid(format!(
                    "Listener {} has empty secret",
                    listener.name
                )));
            }
            if listener.modules.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Listener {} has no modules",
                    listener.name
                )));
            }
        }

        Ok(())
    }

    /// Create an example configuration file
    pub fn example() -> Self {
        let mut coa_config = ModuleConfig::new();
        coa_config.insert("port".to_string(), DEFAULT_COA_PORT.into());
        coa_config.insert("timeout_seconds".to_string(), 5.into());

        let mut serve_config = ModuleConfig::new();
        serve_config.insert("timeout_seconds".to_string(), 30.into());

        let mut rate_limit_config = ModuleConfig::new();
        rate_limit_config.insert("requests_per_second".to_string(), 100.into());
        rate_limit_config.insert("burst".to_string(), 200.into());

        Config {
            secret: "testing123".to_string(),
            log_level: Some("info".to_string()),
            session_storage: StorageConfig::memory(),
            load_balance: LoadBalanceConfig::new()
                .with_service_tier(
                    "gateways",
                    vec!["10.0.1.1:1812".to_string(), "10.0.1.2:1812".to_string()],
                )
                .with_service_tier("gateways-next", vec!["10.0.2.1:1812".to_string()])
                .with_live_route("wifi", "gateways")
                .with_canary(
                    "next",
                    5,
                    vec![crate::lb::TierRoute::new("wifi", "gateways-next")],
                )
                .with_default_tier(LIVE_TIER),
            filters: vec![ModuleDescriptor::new("rate_limit").with_config(rate_limit_config)],
            request_cache_ttl: Some(60),
            request_cache_max_entries: Some(10_000),
            listeners: vec![
                ListenerConfig {
                    name: "wifi".to_string(),
                    address: "0.0.0.0".to_string(),
                    port: 1812,
                    secret: None,
                    modules: vec![
                        ModuleDescriptor::new("coa_dynamic").with_config(coa_config),
                        ModuleDescriptor::new("load_balance"),
                        ModuleDescriptor::new("lb_serve").with_config(serve_config),
                    ],
                },
                ListenerConfig {
                    name: "coa".to_string(),
                    address: "0.0.0.0".to_string(),
                    port: DEFAULT_COA_PORT,
                    secret: Some("coa_secret".to_string()),
                    modules: vec![ModuleDescriptor::new("coa_nas_attribute")],
                },
            ],
        }
    }
}
