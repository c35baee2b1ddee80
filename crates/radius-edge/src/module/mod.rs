//! Module pipeline
//!
//! A listener handles every packet with a static, ordered chain of
//! [`Module`]s. Each module receives the request, a per-request
//! [`RequestContext`] and a [`Next`] handle. Calling [`Next::run`] passes the
//! request down the chain and returns the downstream response; not calling it
//! makes the module terminal for this request.
//!
//! Any error aborts the chain and is returned to the listener, which decides
//! what to do with the packet (see [`crate::server`]).
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use radius_edge::module::{Module, ModuleResult, Next, Request, RequestContext, Response};
//! use radius_proto::Code;
//!
//! /// Accepts everything without consulting anyone
//! struct AcceptAll;
//!
//! #[async_trait]
//! impl Module for AcceptAll {
//!     fn name(&self) -> &str {
//!         "accept_all"
//!     }
//!
//!     async fn handle(
//!         &self,
//!         _ctx: &RequestContext,
//!         _request: &Request,
//!         _next: Next<'_>,
//!     ) -> ModuleResult<Response> {
//!         Ok(Response::new(Code::AccessAccept))
//!     }
//! }
//! ```

pub mod error;
pub mod pipeline;
pub mod registry;

pub use error::{ErrorKind, ModuleError, ModuleResult};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use registry::{decode_config, ModuleConfig, ModuleDeps, ModuleDescriptor, ModuleRegistry};

use crate::session::SessionStorage;
use async_trait::async_trait;
use radius_proto::auth::calculate_response_authenticator;
use radius_proto::{Attribute, Code, Packet};
use std::net::SocketAddr;
use std::sync::Arc;

/// Inbound packet together with where it came from
#[derive(Debug, Clone)]
pub struct Request {
    pub packet: Packet,
    /// Address the datagram arrived from
    pub remote_addr: SocketAddr,
    /// Shared secret of the listener that received the packet
    pub secret: Vec<u8>,
}

impl Request {
    pub fn new(packet: Packet, remote_addr: SocketAddr, secret: Vec<u8>) -> Self {
        Self {
            packet,
            remote_addr,
            secret,
        }
    }
}

/// What a module chain answers with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: Code,
    pub attributes: Vec<Attribute>,
}

impl Response {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Build the reply packet for `request`, signed with `secret`
    pub fn into_reply(self, request: &Packet, secret: &[u8]) -> Packet {
        let mut reply = Packet::new(self.code, request.identifier, [0u8; 16]);
        reply.attributes = self.attributes;
        reply.authenticator =
            calculate_response_authenticator(&reply, &request.authenticator, secret);
        reply
    }
}

impl From<Packet> for Response {
    /// Keep the code and attributes of an upstream reply
    fn from(packet: Packet) -> Self {
        Self {
            code: packet.code,
            attributes: packet.attributes,
        }
    }
}

/// Per-request state shared by every module of the chain
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Process-unique request id
    pub request_id: u64,
    /// Name of the listener the request arrived on
    pub listener: String,
    /// Session store bound to this request's session key
    pub session: SessionStorage,
    /// Span carrying request_id, listener and session_id
    pub span: tracing::Span,
}

/// A pipeline stage
#[async_trait]
pub trait Module: Send + Sync {
    /// Registry name, used in logs
    fn name(&self) -> &str;

    /// Handle one request
    ///
    /// `next` may be run at most once; it is consumed by [`Next::run`].
    async fn handle(
        &self,
        ctx: &RequestContext,
        request: &Request,
        next: Next<'_>,
    ) -> ModuleResult<Response>;
}

/// Continuation into the rest of the chain
///
/// A position in the module list, passed by value. Running it hands the
/// request to the module at that position with a continuation pointing past
/// it.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Module>],
    index: usize,
}

impl<'a> Next<'a> {
    /// Continuation starting at the head of `chain`
    pub fn new(chain: &'a [Arc<dyn Module>]) -> Self {
        Self { chain, index: 0 }
    }

    /// Continuation that has nothing left to run
    pub fn end() -> Next<'static> {
        Next {
            chain: &[],
            index: 0,
        }
    }

    /// True if no module remains after this point
    pub fn is_end(&self) -> bool {
        self.index >= self.chain.len()
    }

    /// Run the remaining chain
    ///
    /// Fails with [`ModuleError::NoResponse`] if the chain is exhausted.
    pub async fn run(self, ctx: &RequestContext, request: &Request) -> ModuleResult<Response> {
        let Some(module) = self.chain.get(self.index) else {
            return Err(ModuleError::NoResponse);
        };

        let next = Next {
            chain: self.chain,
            index: self.index + 1,
        };
        module.handle(ctx, request, next).await
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let remaining: Vec<&str> = self.chain[self.index.min(self.chain.len())..]
            .iter()
            .map(|m| m.name())
            .collect();
        f.debug_struct("Next").field("remaining", &remaining).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radius_proto::auth::verify_response_authenticator;
    use radius_proto::AttributeType;

    #[test]
    fn test_response_from_packet_keeps_code_and_attributes() {
        let mut upstream = Packet::new(Code::AccessAccept, 99, [7u8; 16]);
        upstream.add_attribute(Attribute::string(AttributeType::ReplyMessage as u8, "hi").unwrap());

        let response = Response::from(upstream);
        assert_eq!(response.code, Code::AccessAccept);
        assert_eq!(response.attributes.len(), 1);
    }

    #[test]
    fn test_into_reply_signs_for_request() {
        let request = Packet::new(Code::AccessRequest, 42, [3u8; 16]);
        let reply = Response::new(Code::AccessReject)
            .with_attribute(Attribute::string(AttributeType::ReplyMessage as u8, "no").unwrap())
            .into_reply(&request, b"secret");

        assert_eq!(reply.identifier, 42);
        assert_eq!(reply.code, Code::AccessReject);
        assert!(verify_response_authenticator(&reply, &request.authenticator, b"secret"));
        assert!(!verify_response_authenticator(&reply, &request.authenticator, b"other"));
    }

    #[test]
    fn test_end_continuation() {
        let next = Next::end();
        assert!(next.is_end());
        assert_eq!(format!("{:?}", next), "Next { remaining: [] }");
    }
}
