//! Per-listener module chain

use super::{Module, ModuleResult, Next, Request, RequestContext, Response};
use crate::session::{session_key, GlobalStorage, SessionStorage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info_span, warn, Instrument};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Ordered module chain of one listener
///
/// Built once at startup. Each call to [`handle`](Self::handle) runs the chain
/// from its head inside a span tagged with the request id, listener and
/// session id.
pub struct Pipeline {
    listener: String,
    modules: Vec<Arc<dyn Module>>,
    storage: Arc<dyn GlobalStorage>,
}

impl Pipeline {
    pub fn builder(listener: impl Into<String>, storage: Arc<dyn GlobalStorage>) -> PipelineBuilder {
        PipelineBuilder {
            listener: listener.into(),
            modules: Vec::new(),
            storage,
        }
    }

    pub fn listener(&self) -> &str {
        &self.listener
    }

    /// Module names in chain order
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Run the chain for one request
    pub async fn handle(&self, request: &Request) -> ModuleResult<Response> {
        let request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let session_id = session_key(&request.packet);
        let span = info_span!(
            "request",
            request_id,
            listener = %self.listener,
            session_id = %session_id,
            code = ?request.packet.code,
        );

        let ctx = RequestContext {
            request_id,
            listener: self.listener.clone(),
            session: SessionStorage::new(Arc::clone(&self.storage), session_id),
            span: span.clone(),
        };

        let result = Next::new(&self.modules)
            .run(&ctx, request)
            .instrument(span)
            .await;

        if let Err(e) = &result {
            ctx.span.in_scope(|| {
                warn!(
                    remote = %request.remote_addr,
                    kind = %e.kind(),
                    error = %e,
                    "Request aborted"
                );
            });
        }
        result
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("listener", &self.listener)
            .field("modules", &self.module_names())
            .finish()
    }
}

/// Builder for [`Pipeline`]
pub struct PipelineBuilder {
    listener: String,
    modules: Vec<Arc<dyn Module>>,
    storage: Arc<dyn GlobalStorage>,
}

impl PipelineBuilder {
    /// Append a module to the end of the chain
    pub fn module(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            listener: self.listener,
            modules: self.modules,
            storage: self.storage,
        }
    }
}
