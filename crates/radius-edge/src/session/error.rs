//! Error types for session store operations

use thiserror::Error;

/// Errors returned by [`GlobalStorage`](super::GlobalStorage) implementations
#[derive(Error, Debug)]
pub enum StorageError {
    /// No state stored under this session id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Stored bytes could not be decoded back into a session state
    #[error("Corrupted session data for {id}: {reason}")]
    DataCorruption { id: String, reason: String },

    /// Session state could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend unreachable
    #[error("Connection error: {0}")]
    Connection(String),

    /// Command did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Backend-specific failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Invalid backend configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() {
            StorageError::Connection(format!("Redis connection error: {}", err))
        } else if err.is_timeout() {
            StorageError::Timeout(format!("Redis timeout: {}", err))
        } else {
            StorageError::Backend(format!("Redis error: {}", err))
        }
    }
}
