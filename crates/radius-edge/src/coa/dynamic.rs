//! CoA routing through learned NAS addresses

use super::{default_coa_port, default_coa_timeout_seconds};
use crate::module::{Module, ModuleError, ModuleResult, Next, Request, RequestContext, Response};
use crate::tracker::NasTracker;
use crate::transport::{exchange_with_timeout, Exchanger};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// `coa_dynamic` module configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoaDynamicConfig {
    /// NAS port CoA/Disconnect requests are sent to (default: 3799)
    #[serde(default = "default_coa_port")]
    pub port: u16,

    /// Deadline for the NAS reply (default: 5)
    #[serde(default = "default_coa_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for CoaDynamicConfig {
    fn default() -> Self {
        Self {
            port: default_coa_port(),
            timeout_seconds: default_coa_timeout_seconds(),
        }
    }
}

impl CoaDynamicConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// Reverse-routes CoA/Disconnect to the NAS last seen for the session
///
/// Ordinary packets refresh the tracker and continue down the chain.
/// CoA-Request and Disconnect-Request are sent to the tracked NAS address on
/// the configured port and answered with the NAS reply; `next` is not run
/// for them.
pub struct CoaDynamicModule {
    tracker: Arc<dyn NasTracker>,
    exchanger: Arc<dyn Exchanger>,
    port: u16,
    timeout: Duration,
}

impl CoaDynamicModule {
    pub const NAME: &'static str = "coa_dynamic";

    pub fn new(
        config: CoaDynamicConfig,
        tracker: Arc<dyn NasTracker>,
        exchanger: Arc<dyn Exchanger>,
    ) -> ModuleResult<Self> {
        if config.port == 0 {
            return Err(ModuleError::config(Self::NAME, "port must be non-zero"));
        }
        if config.timeout_seconds == 0 {
            return Err(ModuleError::config(Self::NAME, "timeout_seconds must be positive"));
        }

        Ok(Self {
            tracker,
            exchanger,
            port: config.port,
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }
}

#[async_trait]
impl Module for CoaDynamicModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(
        &self,
        ctx: &RequestContext,
        request: &Request,
        next: Next<'_>,
    ) -> ModuleResult<Response> {
        if !request.packet.code.is_dynamic_authorization_request() {
            if let Err(e) = self.tracker.set(request) {
                warn!(
                    remote = %request.remote_addr,
                    error = %e,
                    "Failed to record NAS address"
                );
            }
            return next.run(ctx, request).await;
        }

        let nas = self.tracker.get(&request.packet).inspect_err(|e| {
            warn!(
                session_id = %ctx.session.id(),
                error = %e,
                "No NAS address for CoA"
            );
        })?;

        let target = SocketAddr::new(nas.ip(), self.port);
        let reply = exchange_with_timeout(
            self.exchanger.as_ref(),
            &request.packet,
            &request.secret,
            target,
            self.timeout,
        )
        .await?;

        info!(
            nas = %target,
            request_code = ?request.packet.code,
            reply_code = ?reply.code,
            "Delivered dynamic authorization request"
        );
        Ok(Response::from(reply))
    }
}
