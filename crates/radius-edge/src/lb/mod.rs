//! Sticky load balancing across live and canary upstream pools
//!
//! A session is pinned to one upstream host the first time the
//! `load_balance` module sees it; the terminal `lb_serve` module forwards
//! every packet of the session to that host.
//!
//! Routing is two-level. A tier ("live" or a canary name) maps each listener
//! to a service tier, and a service tier is a pool of upstream hosts. Which
//! tier a session belongs to is decided elsewhere and arrives in the session
//! state; sessions without one use the configured default tier.
//!
//! ```json
//! {
//!   "service_tiers": [
//!     { "name": "gw-v1", "upstream_hosts": ["10.0.1.1:1812", "10.0.1.2:1812"] },
//!     { "name": "gw-v2", "upstream_hosts": ["10.0.2.1:1812"] }
//!   ],
//!   "live_tier": [ { "listener": "wifi", "service_tier": "gw-v1" } ],
//!   "canaries": [
//!     {
//!       "name": "v2",
//!       "traffic_slice_percent": 5,
//!       "routing": [ { "listener": "wifi", "service_tier": "gw-v2" } ]
//!     }
//!   ],
//!   "default_tier": "live"
//! }
//! ```

pub mod allocator;
pub mod error;
pub mod serve;

pub use allocator::{Allocator, LoadBalanceModule, Selection};
pub use error::LoadBalanceError;
pub use serve::{LbServeConfig, LbServeModule};

use serde::{Deserialize, Serialize};

/// Tier name of the live routing
pub const LIVE_TIER: &str = "live";

/// Named pool of upstream hosts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTier {
    pub name: String,
    /// `host:port` entries; DNS names are resolved per exchange
    #[serde(default)]
    pub upstream_hosts: Vec<String>,
}

impl ServiceTier {
    pub fn new(name: impl Into<String>, upstream_hosts: Vec<String>) -> Self {
        Self {
            name: name.into(),
            upstream_hosts,
        }
    }
}

/// Route of one listener to a service tier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRoute {
    pub listener: String,
    pub service_tier: String,
}

impl TierRoute {
    pub fn new(listener: impl Into<String>, service_tier: impl Into<String>) -> Self {
        Self {
            listener: listener.into(),
            service_tier: service_tier.into(),
        }
    }
}

/// Listener routes of one tier
pub type TierRouting = Vec<TierRoute>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canary {
    pub name: String,
    /// Share of sessions assigned to this canary upstream of the proxy
    #[serde(default)]
    pub traffic_slice_percent: u32,
    #[serde(default)]
    pub routing: TierRouting,
}

/// Load balancing configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalanceConfig {
    #[serde(default)]
    pub service_tiers: Vec<ServiceTier>,
    #[serde(default)]
    pub live_tier: TierRouting,
    #[serde(default)]
    pub canaries: Vec<Canary>,
    /// Tier for sessions that carry none
    #[serde(default)]
    pub default_tier: String,
}

impl LoadBalanceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_tier(mut self, name: impl Into<String>, upstream_hosts: Vec<String>) -> Self {
        self.service_tiers.push(ServiceTier::new(name, upstream_hosts));
        self
    }

    pub fn with_live_route(mut self, listener: impl Into<String>, service_tier: impl Into<String>) -> Self {
        self.live_tier.push(TierRoute::new(listener, service_tier));
        self
    }

    pub fn with_canary(mut self, name: impl Into<String>, traffic_slice_percent: u32, routing: TierRouting) -> Self {
        self.canaries.push(Canary {
            name: name.into(),
            traffic_slice_percent,
            routing,
        });
        self
    }

    pub fn with_default_tier(mut self, tier: impl Into<String>) -> Self {
        self.default_tier = tier.into();
        self
    }
}
