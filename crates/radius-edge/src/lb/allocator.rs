//! Upstream host allocation

use super::{LoadBalanceConfig, LoadBalanceError, TierRouting, LIVE_TIER};
use crate::module::{Module, ModuleResult, Next, Request, RequestContext, Response};
use crate::session::{SessionState, SessionStorage};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Outcome of one upstream selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Tier the session was routed under
    pub tier: String,
    pub service_tier: String,
    pub host: String,
}

/// Resolved routing tables plus the random source used to pick hosts
///
/// Constructed once from a [`LoadBalanceConfig`] and shared by reference.
/// Construction rejects malformed configuration (duplicate names, a canary
/// named "live", slices above 100%). References between tiers, routes and
/// service tiers are resolved per allocation, so a dangling reference fails
/// only the sessions that hit it.
#[derive(Debug)]
pub struct Allocator {
    default_tier: String,
    /// tier -> listener -> service tier
    routes: HashMap<String, HashMap<String, String>>,
    service_tiers: HashMap<String, Vec<String>>,
    traffic_slices: HashMap<String, u32>,
    rng: Mutex<StdRng>,
}

fn listener_routes(tier: &str, routing: &TierRouting) -> Result<HashMap<String, String>, LoadBalanceError> {
    let mut routes = HashMap::with_capacity(routing.len());
    for route in routing {
        if routes
            .insert(route.listener.clone(), route.service_tier.clone())
            .is_some()
        {
            return Err(LoadBalanceError::InvalidConfig(format!(
                "listener '{}' routed twice in tier '{}'",
                route.listener, tier
            )));
        }
    }
    Ok(routes)
}

impl Allocator {
    /// Allocator drawing from an OS-seeded random source
    pub fn new(config: &LoadBalanceConfig) -> Result<Self, LoadBalanceError> {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Allocator with a reproducible host sequence
    pub fn with_seed(config: &LoadBalanceConfig, seed: u64) -> Result<Self, LoadBalanceError> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(config: &LoadBalanceConfig, rng: StdRng) -> Result<Self, LoadBalanceError> {
        let mut service_tiers = HashMap::with_capacity(config.service_tiers.len());
        for tier in &config.service_tiers {
            if service_tiers
                .insert(tier.name.clone(), tier.upstream_hosts.clone())
                .is_some()
            {
                return Err(LoadBalanceError::InvalidConfig(format!(
                    "service tier '{}' defined twice",
                    tier.name
                )));
            }
        }

        let mut routes = HashMap::with_capacity(config.canaries.len() + 1);
        routes.insert(LIVE_TIER.to_string(), listener_routes(LIVE_TIER, &config.live_tier)?);

        let mut traffic_slices = HashMap::with_capacity(config.canaries.len());
        for canary in &config.canaries {
            if canary.name.is_empty() || canary.name == LIVE_TIER {
                return Err(LoadBalanceError::InvalidConfig(format!(
                    "invalid canary name '{}'",
                    canary.name
                )));
            }
            if canary.traffic_slice_percent > 100 {
                return Err(LoadBalanceError::InvalidConfig(format!(
                    "canary '{}' traffic slice {}% exceeds 100%",
                    canary.name, canary.traffic_slice_percent
                )));
            }
            if routes
                .insert(canary.name.clone(), listener_routes(&canary.name, &canary.routing)?)
                .is_some()
            {
                return Err(LoadBalanceError::InvalidConfig(format!(
                    "canary '{}' defined twice",
                    canary.name
                )));
            }
            traffic_slices.insert(canary.name.clone(), canary.traffic_slice_percent);
        }

        let referenced: HashSet<&String> = routes.values().flat_map(|r| r.values()).collect();
        for service_tier in referenced {
            match service_tiers.get(service_tier) {
                None => warn!(service_tier = %service_tier, "Routed service tier is not defined"),
                Some(hosts) if hosts.is_empty() => {
                    warn!(service_tier = %service_tier, "Routed service tier has no upstream hosts")
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            default_tier: config.default_tier.clone(),
            routes,
            service_tiers,
            traffic_slices,
            rng: Mutex::new(rng),
        })
    }

    pub fn default_tier(&self) -> &str {
        &self.default_tier
    }

    /// Configured traffic slice of a canary
    pub fn traffic_slice_percent(&self, canary: &str) -> Option<u32> {
        self.traffic_slices.get(canary).copied()
    }

    /// Tier for a session: its own, else the default
    pub fn resolve_tier<'a>(&'a self, session_tier: &'a str) -> Result<&'a str, LoadBalanceError> {
        if !session_tier.is_empty() {
            Ok(session_tier)
        } else if !self.default_tier.is_empty() {
            Ok(&self.default_tier)
        } else {
            Err(LoadBalanceError::RequiredTierNotSpecified)
        }
    }

    /// Service tier `listener` is routed to under `tier`
    pub fn service_tier_for(&self, tier: &str, listener: &str) -> Result<&str, LoadBalanceError> {
        let routing = self
            .routes
            .get(tier)
            .ok_or_else(|| LoadBalanceError::CanaryNotFound(tier.to_string()))?;

        routing
            .get(listener)
            .map(String::as_str)
            .ok_or_else(|| LoadBalanceError::ListenerRoutingNotFound {
                tier: tier.to_string(),
                listener: listener.to_string(),
            })
    }

    /// Non-empty host list of a service tier
    pub fn upstream_hosts(&self, service_tier: &str) -> Result<&[String], LoadBalanceError> {
        let hosts = self
            .service_tiers
            .get(service_tier)
            .ok_or_else(|| LoadBalanceError::ServiceTierNotFound(service_tier.to_string()))?;

        if hosts.is_empty() {
            return Err(LoadBalanceError::NoUpstreamHosts(service_tier.to_string()));
        }
        Ok(hosts)
    }

    /// Pick a host uniformly at random for a session arriving on `listener`
    pub fn select_upstream(&self, session_tier: &str, listener: &str) -> Result<Selection, LoadBalanceError> {
        let tier = self.resolve_tier(session_tier)?;
        let service_tier = self.service_tier_for(tier, listener)?;
        let hosts = self.upstream_hosts(service_tier)?;

        let index = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(0..hosts.len());

        Ok(Selection {
            tier: tier.to_string(),
            service_tier: service_tier.to_string(),
            host: hosts[index].clone(),
        })
    }

    /// Pin the session to an upstream host unless it already has one
    ///
    /// The read-modify-write is not atomic: two concurrent first requests of
    /// one session may both allocate, and the later write wins.
    pub async fn allocate(&self, listener: &str, session: &SessionStorage) -> Result<SessionState, LoadBalanceError> {
        let mut state = session.get_or_default().await?;
        if !state.upstream_host.is_empty() {
            debug!(
                session_id = %session.id(),
                upstream_host = %state.upstream_host,
                "Session already allocated"
            );
            return Ok(state);
        }

        let selection = self.select_upstream(&state.tier, listener).inspect_err(|e| {
            error!(
                listener,
                tier = %state.tier,
                default_tier = %self.default_tier,
                session_id = %session.id(),
                error = %e,
                "Upstream allocation failed"
            );
        })?;

        state.tier = selection.tier;
        state.upstream_host = selection.host;
        session.set(&state).await.inspect_err(|e| {
            error!(
                listener,
                tier = %state.tier,
                session_id = %session.id(),
                error = %e,
                "Failed to persist upstream allocation"
            );
        })?;

        info!(
            listener,
            tier = %state.tier,
            service_tier = %selection.service_tier,
            upstream_host = %state.upstream_host,
            session_id = %session.id(),
            "Allocated upstream host"
        );
        Ok(state)
    }
}

/// Pipeline stage pinning each session to an upstream host
///
/// Always passes the request on; place `lb_serve` after it.
pub struct LoadBalanceModule {
    allocator: Arc<Allocator>,
}

impl LoadBalanceModule {
    pub const NAME: &'static str = "load_balance";

    pub fn new(allocator: Arc<Allocator>) -> Self {
        Self { allocator }
    }
}

#[async_trait]
impl Module for LoadBalanceModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(
        &self,
        ctx: &RequestContext,
        request: &Request,
        next: Next<'_>,
    ) -> ModuleResult<Response> {
        self.allocator.allocate(&ctx.listener, &ctx.session).await?;
        next.run(ctx, request).await
    }
}
