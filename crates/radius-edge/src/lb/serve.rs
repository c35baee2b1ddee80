//! Forwarding to the allocated upstream host

use super::LoadBalanceError;
use crate::module::{Module, ModuleError, ModuleResult, Next, Request, RequestContext, Response};
use crate::transport::{exchange_host_with_timeout, Exchanger};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// `lb_serve` module configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbServeConfig {
    /// Upper bound on one upstream exchange (default: 30)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for LbServeConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl LbServeConfig {
    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Terminal module sending the request to the session's upstream host
///
/// The reply's code and attributes become this node's response. Host lookup
/// and exchange share one timeout. Transport errors are returned as they are,
/// without retry. Never runs `next`.
pub struct LbServeModule {
    exchanger: Arc<dyn Exchanger>,
    timeout: Duration,
}

impl LbServeModule {
    pub const NAME: &'static str = "lb_serve";

    pub fn new(config: LbServeConfig, exchanger: Arc<dyn Exchanger>) -> ModuleResult<Self> {
        if config.timeout_seconds == 0 {
            return Err(ModuleError::config(Self::NAME, "timeout_seconds must be positive"));
        }

        Ok(Self {
            exchanger,
            timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl Module for LbServeModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(
        &self,
        ctx: &RequestContext,
        request: &Request,
        _next: Next<'_>,
    ) -> ModuleResult<Response> {
        let state = ctx.session.get_or_default().await?;
        if state.upstream_host.is_empty() {
            error!(
                listener = %ctx.listener,
                tier = %state.tier,
                session_id = %ctx.session.id(),
                "No upstream host allocated; load_balance must run before lb_serve"
            );
            return Err(LoadBalanceError::MissingRequiredUpstreamHost(ctx.session.id().to_string()).into());
        }

        let reply = exchange_host_with_timeout(
            self.exchanger.as_ref(),
            &request.packet,
            &request.secret,
            &state.upstream_host,
            self.timeout,
        )
        .await
        .inspect_err(|e| {
            warn!(
                upstream_host = %state.upstream_host,
                tier = %state.tier,
                error = %e,
                "Upstream exchange failed"
            );
        })?;

        debug!(
            upstream_host = %state.upstream_host,
            code = ?reply.code,
            "Upstream replied"
        );
        Ok(Response::from(reply))
    }
}
