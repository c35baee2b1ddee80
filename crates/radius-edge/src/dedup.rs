//! Retransmission cache
//!
//! An access device that hears nothing back retransmits the same request with
//! the same identifier and authenticator. While the first copy is still in the
//! pipeline, later copies are dropped; once a reply exists it is sent again
//! without touching the pipeline (RFC 5080 Section 2.2.2).

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tracing::debug;

/// Default lifetime of a cache entry
pub const DEFAULT_REQUEST_CACHE_TTL: Duration = Duration::from_secs(60);

/// Default bound on cached requests per listener
pub const DEFAULT_REQUEST_CACHE_MAX_ENTRIES: usize = 10_000;

/// Identity of one request as seen by the access device
///
/// Source IP, identifier and the first half of the request authenticator
/// (RFC 2865 Section 2).
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct RequestFingerprint {
    pub source_ip: IpAddr,
    pub identifier: u8,
    pub auth_prefix: [u8; 8],
}

impl RequestFingerprint {
    pub fn new(source_ip: IpAddr, identifier: u8, authenticator: &[u8; 16]) -> Self {
        let mut auth_prefix = [0u8; 8];
        auth_prefix.copy_from_slice(&authenticator[..8]);

        Self {
            source_ip,
            identifier,
            auth_prefix,
        }
    }
}

#[derive(Debug, Clone)]
enum Slot {
    InFlight,
    Replied(Arc<[u8]>),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    inserted_at: Instant,
    slot: Slot,
}

/// What the listener should do with an incoming request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// First copy: run it through the pipeline
    New,
    /// A copy is still being handled: drop this one
    InFlight,
    /// Already answered: send this encoded reply again
    Replay(Arc<[u8]>),
}

/// Per-listener request cache with background expiry
pub struct RequestCache {
    entries: Arc<DashMap<RequestFingerprint, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    dropped: AtomicU64,
    replayed: AtomicU64,
    cleanup_running: Arc<AtomicBool>,
}

impl RequestCache {
    /// Create a cache and start its cleanup task
    ///
    /// Must be called from within a tokio runtime. Expired entries are purged
    /// every `ttl / 4`.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let entries: Arc<DashMap<RequestFingerprint, CacheEntry>> = Arc::new(DashMap::new());
        let cleanup_running = Arc::new(AtomicBool::new(true));

        let task_entries = Arc::clone(&entries);
        let running = Arc::clone(&cleanup_running);
        let period = (ttl / 4).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            while running.load(Ordering::Relaxed) {
                interval.tick().await;
                let removed = purge(&task_entries, ttl);
                if removed > 0 {
                    debug!(removed, remaining = task_entries.len(), "Request cache cleanup");
                }
            }
        });

        Self {
            entries,
            ttl,
            max_entries,
            dropped: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
            cleanup_running,
        }
    }

    /// Record `fingerprint` and decide how to treat the request
    ///
    /// Check and insert happen under one shard lock, so of two concurrent
    /// copies exactly one is admitted as [`Admission::New`].
    pub fn admit(&self, fingerprint: RequestFingerprint) -> Admission {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&fingerprint) {
            self.evict_one();
        }

        let now = Instant::now();
        let fresh = CacheEntry {
            inserted_at: now,
            slot: Slot::InFlight,
        };

        match self.entries.entry(fingerprint) {
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Admission::New
            }
            Entry::Occupied(mut occupied) => {
                if now.duration_since(occupied.get().inserted_at) > self.ttl {
                    occupied.insert(fresh);
                    return Admission::New;
                }
                match &occupied.get().slot {
                    Slot::InFlight => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        Admission::InFlight
                    }
                    Slot::Replied(reply) => {
                        self.replayed.fetch_add(1, Ordering::Relaxed);
                        Admission::Replay(Arc::clone(reply))
                    }
                }
            }
        }
    }

    /// Store the encoded reply sent for `fingerprint`
    pub fn complete(&self, fingerprint: RequestFingerprint, reply: &[u8]) {
        self.entries.insert(
            fingerprint,
            CacheEntry {
                inserted_at: Instant::now(),
                slot: Slot::Replied(Arc::from(reply)),
            },
        );
    }

    /// Forget a request that produced no reply, so a retransmission is retried
    pub fn abandon(&self, fingerprint: &RequestFingerprint) {
        self.entries
            .remove_if(fingerprint, |_, entry| matches!(entry.slot, Slot::InFlight));
    }

    /// Remove every entry older than the TTL, returning how many went
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries, self.ttl)
    }

    fn evict_one(&self) {
        // Guard must be released before removing
        let victim = self.entries.iter().next().map(|entry| *entry.key());
        if let Some(victim) = victim {
            self.entries.remove(&victim);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Retransmissions dropped while the original was in flight
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Retransmissions answered from the cache
    pub fn replayed_count(&self) -> u64 {
        self.replayed.load(Ordering::Relaxed)
    }
}

fn purge(entries: &DashMap<RequestFingerprint, CacheEntry>, ttl: Duration) -> usize {
    let before = entries.len();
    let now = Instant::now();
    entries.retain(|_, entry| now.duration_since(entry.inserted_at) <= ttl);
    before.saturating_sub(entries.len())
}

impl Drop for RequestCache {
    fn drop(&mut self) {
        self.cleanup_running.store(false, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}
