//! In-memory session storage

use super::{GlobalStorage, SessionState, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Process-local session storage
///
/// Backed by a sharded [`DashMap`], so operations on different ids rarely
/// contend and each get/set/reset is linearizable per key. Suitable for a
/// single proxy instance or for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    sessions: Arc<DashMap<String, SessionState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&self) {
        self.sessions.clear();
    }
}

#[async_trait]
impl GlobalStorage for MemoryStorage {
    async fn get(&self, id: &str) -> Result<SessionState, StorageError> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn set(&self, id: &str, state: &SessionState) -> Result<(), StorageError> {
        self.sessions.insert(id.to_string(), state.clone());
        Ok(())
    }

    async fn reset(&self, id: &str) -> Result<(), StorageError> {
        self.sessions.remove(id);
        Ok(())
    }
}
