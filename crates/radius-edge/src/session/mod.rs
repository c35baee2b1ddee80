//! Session state store
//!
//! Per-session routing state shared by the modules of a pipeline. A session
//! is identified by the concatenation of the Called-Station-Id and
//! Calling-Station-Id attribute bytes (see [`session_key`]), so every packet a
//! subscriber sends through the same access point maps to the same entry.
//!
//! Two backends implement [`GlobalStorage`]:
//!
//! - **MemoryStorage**: sharded concurrent map, process local
//! - **RedisStorage**: JSON documents in Redis/Valkey, shared by a cluster
//!   (`redis` feature)
//!
//! Entries never expire on their own; they live until [`GlobalStorage::reset`].
//!
//! # Usage
//!
//! ```rust
//! use radius_edge::session::{GlobalStorage, MemoryStorage, SessionState, SessionStorage};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), radius_edge::session::StorageError> {
//! let backend: Arc<dyn GlobalStorage> = Arc::new(MemoryStorage::new());
//! let storage = SessionStorage::new(backend, "ap-1:wifiaa-bb-cc-dd-ee-ff");
//!
//! storage.set(&SessionState::default()).await?;
//! let state = storage.get().await?;
//! storage.reset().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

pub use config::{StorageBackendType, StorageConfig};
#[cfg(feature = "redis")]
pub use config::RedisConfig;
pub use error::StorageError;
pub use memory::MemoryStorage;

#[cfg(feature = "redis")]
pub use self::redis::RedisStorage;

use async_trait::async_trait;
use radius_proto::Packet;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;

/// Routing state of one subscriber session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub msisdn: String,
    /// `host:port` of the upstream server this session is pinned to
    #[serde(default)]
    pub upstream_host: String,
    /// Live or canary tier the session belongs to
    #[serde(default)]
    pub tier: String,
    #[serde(default)]
    pub session_record_id: u64,
}

/// Derive the session key for a packet
///
/// Called-Station-Id bytes followed by Calling-Station-Id bytes. Missing
/// attributes contribute nothing, so a packet without either yields an
/// empty key.
///
/// Valid UTF-8 is kept as is. Bytes that are not UTF-8 are written as `\xNN`
/// and a literal backslash as `\\`, so distinct byte strings always give
/// distinct keys.
pub fn session_key(packet: &Packet) -> String {
    let called = packet.called_station_id().unwrap_or_default();
    let calling = packet.calling_station_id().unwrap_or_default();

    let mut bytes = Vec::with_capacity(called.len() + calling.len());
    bytes.extend_from_slice(called);
    bytes.extend_from_slice(calling);
    escape_key(&bytes)
}

fn escape_key(bytes: &[u8]) -> String {
    let mut key = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        for c in chunk.valid().chars() {
            if c == '\\' {
                key.push_str("\\\\");
            } else {
                key.push(c);
            }
        }
        for byte in chunk.invalid() {
            let _ = write!(key, "\\x{:02x}", byte);
        }
    }
    key
}

/// Process-wide session store
///
/// Every operation is individually safe for concurrent callers. There is no
/// multi-key or read-modify-write transaction: concurrent `set` calls on the
/// same id are last-write-wins.
#[async_trait]
pub trait GlobalStorage: Send + Sync {
    /// Fetch the state stored under `id`
    ///
    /// Fails with [`StorageError::NotFound`] when nothing is stored.
    async fn get(&self, id: &str) -> Result<SessionState, StorageError>;

    /// Store `state` under `id`, replacing any previous value
    async fn set(&self, id: &str, state: &SessionState) -> Result<(), StorageError>;

    /// Remove the state stored under `id`
    ///
    /// Succeeds whether or not the id existed.
    async fn reset(&self, id: &str) -> Result<(), StorageError>;
}

/// Session-bound view over a [`GlobalStorage`]
#[derive(Clone)]
pub struct SessionStorage {
    backend: Arc<dyn GlobalStorage>,
    id: String,
}

impl SessionStorage {
    pub fn new(backend: Arc<dyn GlobalStorage>, id: impl Into<String>) -> Self {
        Self {
            backend,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn get(&self) -> Result<SessionState, StorageError> {
        self.backend.get(&self.id).await
    }

    /// Like [`get`](Self::get), but a missing session yields the default state
    pub async fn get_or_default(&self) -> Result<SessionState, StorageError> {
        match self.backend.get(&self.id).await {
            Err(StorageError::NotFound(_)) => Ok(SessionState::default()),
            other => other,
        }
    }

    pub async fn set(&self, state: &SessionState) -> Result<(), StorageError> {
        self.backend.set(&self.id, state).await
    }

    pub async fn reset(&self) -> Result<(), StorageError> {
        self.backend.reset(&self.id).await
    }
}

impl std::fmt::Debug for SessionStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStorage").field("id", &self.id).finish()
    }
}

/// Build the storage backend selected by `config`
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn GlobalStorage>, StorageError> {
    match config.backend {
        StorageBackendType::Memory => Ok(Arc::new(MemoryStorage::new())),
        #[cfg(feature = "redis")]
        StorageBackendType::Redis => {
            let redis_config = config.redis.clone().ok_or_else(|| {
                StorageError::Config("redis backend selected without a redis section".to_string())
            })?;
            Ok(Arc::new(RedisStorage::new(redis_config).await?))
        }
    }
}
