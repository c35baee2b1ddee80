//! NAS address tracker
//!
//! CoA-Request and Disconnect-Request messages are originated by a policy
//! system behind the proxy and carry no destination of their own. The tracker
//! remembers, per session, the remote address of the access device that last
//! sent ordinary traffic for that session, so a later CoA can be sent back
//! to it.
//!
//! The tracker shares the session key derivation with the session store but
//! is an independent store: nothing keeps the two in step.

use crate::module::Request;
use crate::session::session_key;
use dashmap::DashMap;
use radius_proto::Packet;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// No ordinary traffic has been seen for this session key
    #[error("No NAS address recorded for session {0}")]
    NotFound(String),

    /// Packet has neither Called-Station-Id nor Calling-Station-Id
    #[error("Packet carries no station ids to derive a session key from")]
    MissingSessionKey,
}

/// Per-session record of the last observed NAS address
///
/// Implementations must accept concurrent `set` and `get` from any number of
/// request-handling tasks without external locking.
pub trait NasTracker: Send + Sync {
    /// Record (or overwrite) the remote address `request` arrived from
    fn set(&self, request: &Request) -> Result<(), TrackerError>;

    /// Last recorded address for the session `packet` belongs to
    fn get(&self, packet: &Packet) -> Result<SocketAddr, TrackerError>;
}

/// In-memory tracker backed by a sharded concurrent map
#[derive(Debug, Clone, Default)]
pub struct MemoryNasTracker {
    addresses: Arc<DashMap<String, SocketAddr>>,
}

impl MemoryNasTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

fn tracker_key(packet: &Packet) -> Result<String, TrackerError> {
    let key = session_key(packet);
    if key.is_empty() {
        Err(TrackerError::MissingSessionKey)
    } else {
        Ok(key)
    }
}

impl NasTracker for MemoryNasTracker {
    fn set(&self, request: &Request) -> Result<(), TrackerError> {
        let key = tracker_key(&request.packet)?;
        self.addresses.insert(key, request.remote_addr);
        Ok(())
    }

    fn get(&self, packet: &Packet) -> Result<SocketAddr, TrackerError> {
        let key = tracker_key(packet)?;
        self.addresses
            .get(&key)
            .map(|entry| *entry.value())
            .ok_or(TrackerError::NotFound(key))
    }
}
