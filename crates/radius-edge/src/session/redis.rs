//! Redis/Valkey session storage

use super::config::RedisConfig;
use super::{GlobalStorage, SessionState, StorageError};
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client, RedisResult};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

/// Redis-backed session storage
///
/// Each session is one JSON document under `{key_prefix}{session id}`.
/// Documents carry no expiry unless `ttl_seconds` is configured. A document
/// that no longer decodes is reported as [`StorageError::DataCorruption`],
/// never as a missing session.
///
/// # Example
///
/// ```no_run
/// use radius_edge::session::{RedisConfig, RedisStorage};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = RedisConfig::new("redis://localhost:6379").with_key_prefix("edge:");
/// let storage = RedisStorage::new(config).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisStorage {
    conn: ConnectionManager,
    config: RedisConfig,
}

type CommandFuture<T> = Pin<Box<dyn Future<Output = RedisResult<T>> + Send>>;

impl RedisStorage {
    /// Connect to the configured server
    ///
    /// The connection manager reconnects on its own after a connection loss.
    pub async fn new(config: RedisConfig) -> Result<Self, StorageError> {
        let client = Client::open(config.url.clone())
            .map_err(|e| StorageError::Config(format!("Invalid Redis URL: {}", e)))?;

        let conn = tokio::time::timeout(config.connect_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                StorageError::Timeout(format!(
                    "Connecting to {} took longer than {:?}",
                    config.url,
                    config.connect_timeout()
                ))
            })?
            .map_err(|e| StorageError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        debug!(url = %config.url, key_prefix = %config.key_prefix, "Connected session storage to Redis");
        Ok(Self { conn, config })
    }

    fn prefixed_key(&self, id: &str) -> String {
        format!("{}{}", self.config.key_prefix, id)
    }

    /// Run a command, bounded by the command timeout, retrying failed attempts
    async fn with_retry<F, T>(&self, mut command: F) -> Result<T, StorageError>
    where
        F: FnMut() -> CommandFuture<T>,
    {
        let mut attempt = 0;
        loop {
            let error = match tokio::time::timeout(self.config.command_timeout(), command()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => StorageError::from(e),
                Err(_) => StorageError::Timeout(format!(
                    "Redis command exceeded {:?}",
                    self.config.command_timeout()
                )),
            };

            if attempt >= self.config.max_retries {
                return Err(error);
            }
            attempt += 1;
            debug!(attempt, error = %error, "Retrying Redis command");
            tokio::time::sleep(self.config.retry_delay()).await;
        }
    }
}

#[async_trait]
impl GlobalStorage for RedisStorage {
    async fn get(&self, id: &str) -> Result<SessionState, StorageError> {
        let key = self.prefixed_key(id);
        let conn = self.conn.clone();

        let bytes: Option<Vec<u8>> = self
            .with_retry(|| {
                let key = key.clone();
                let mut conn = conn.clone();
                Box::pin(async move { conn.get(&key).await })
            })
            .await?;

        let bytes = bytes.ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(session_id = %id, error = %e, "Stored session state does not decode");
            StorageError::DataCorruption {
                id: id.to_string(),
                reason: e.to_string(),
            }
        })
    }

    async fn set(&self, id: &str, state: &SessionState) -> Result<(), StorageError> {
        let key = self.prefixed_key(id);
        let conn = self.conn.clone();
        let payload =
            serde_json::to_vec(state).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let ttl = self.config.ttl();

        self.with_retry(|| {
            let key = key.clone();
            let payload = payload.clone();
            let mut conn = conn.clone();
            Box::pin(async move {
                match ttl {
                    Some(ttl) => {
                        ::redis::cmd("SET")
                            .arg(&key)
                            .arg(&payload)
                            .arg("EX")
                            .arg(ttl.as_secs().max(1))
                            .query_async(&mut conn)
                            .await
                    }
                    None => conn.set(&key, &payload).await,
                }
            })
        })
        .await
    }

    async fn reset(&self, id: &str) -> Result<(), StorageError> {
        let key = self.prefixed_key(id);
        let conn = self.conn.clone();

        self.with_retry(|| {
            let key = key.clone();
            let mut conn = conn.clone();
            Box::pin(async move { conn.del(&key).await })
        })
        .await
    }
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("url", &self.config.url)
            .field("key_prefix", &self.config.key_prefix)
            .finish()
    }
}
