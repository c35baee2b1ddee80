//! CoA routing through the NAS-IP-Address attribute

use super::{default_coa_port, default_coa_timeout_seconds};
use crate::module::{Module, ModuleError, ModuleResult, Next, Request, RequestContext, Response};
use crate::transport::{exchange_with_timeout, Exchanger};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// `coa_nas_attribute` module configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoaNasAttributeConfig {
    /// NAS port CoA/Disconnect requests are sent to (default: 3799)
    #[serde(default = "default_coa_port")]
    pub port: u16,

    /// Deadline for the NAS reply (default: 5)
    #[serde(default = "default_coa_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for CoaNasAttributeConfig {
    fn default() -> Self {
        Self {
            port: default_coa_port(),
            timeout_seconds: default_coa_timeout_seconds(),
        }
    }
}

impl CoaNasAttributeConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// Sends CoA/Disconnect to the NAS named in the packet
///
/// A CoA without NAS-IP-Address continues down the chain like any other
/// packet. Exchange failures are returned without fallback.
pub struct CoaNasAttributeModule {
    exchanger: Arc<dyn Exchanger>,
    port: u16,
    timeout: Duration,
}

impl CoaNasAttributeModule {
    pub const NAME: &'static str = "coa_nas_attribute";

    pub fn new(config: CoaNasAttributeConfig, exchanger: Arc<dyn Exchanger>) -> ModuleResult<Self> {
        if config.port == 0 {
            return Err(ModuleError::config(Self::NAME, "port must be non-zero"));
        }
        if config.timeout_seconds == 0 {
            return Err(ModuleError::config(Self::NAME, "timeout_seconds must be positive"));
        }

        Ok(Self {
            exchanger,
            port: config.port,
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }
}

#[async_trait]
impl Module for CoaNasAttributeModule {
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
            return next.run(ctx, request).await;
        }

        let Some(nas_ip) = request.packet.nas_ip_address() else {
            debug!(
                code = ?request.packet.code,
                "No NAS-IP-Address; passing request on"
            );
            return next.run(ctx, request).await;
        };

        let target = SocketAddr::new(IpAddr::V4(nas_ip), self.port);
        let reply = exchange_with_timeout(
            self.exchanger.as_ref(),
            &request.packet,
            &request.secret,
            target,
            self.timeout,
        )
        .await
        .inspect_err(|e| {
            warn!(nas = %target, error = %e, "Dynamic authorization exchange failed");
        })?;

        info!(
            nas = %target,
            request_code = ?request.packet.code,
            reply_code = ?reply.code,
            "Delivered dynamic authorization request"
        );
        Ok(Response::from(reply))
    }
}
