//! Server-wide request filters
//!
//! Filters run on every decoded request of every listener, before the
//! listener's module chain. A filter that fails to initialize stops startup;
//! a filter that rejects a request drops the packet and the chain never sees
//! it.

pub mod rate_limit;

pub use rate_limit::{RateLimitConfig, RateLimitFilter};

use crate::module::Request;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid configuration for filter {filter}: {reason}")]
    Config { filter: String, reason: String },

    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    #[error("Filter {filter} rejected request: {reason}")]
    Rejected { filter: String, reason: String },
}

impl FilterError {
    pub fn config(filter: &str, reason: impl Into<String>) -> Self {
        FilterError::Config {
            filter: filter.to_string(),
            reason: reason.into(),
        }
    }

    pub fn rejected(filter: &str, reason: impl Into<String>) -> Self {
        FilterError::Rejected {
            filter: filter.to_string(),
            reason: reason.into(),
        }
    }
}

/// Pre-pipeline check on an inbound request
#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    /// Accept `request` arriving on `listener`, or reject it
    async fn process(&self, listener: &str, request: &Request) -> Result<(), FilterError>;
}

/// Run `filters` in order, stopping at the first rejection
pub async fn run_filters(
    filters: &[Arc<dyn Filter>],
    listener: &str,
    request: &Request,
) -> Result<(), FilterError> {
    for filter in filters {
        filter.process(listener, request).await.inspect_err(|e| {
            warn!(
                listener,
                filter = filter.name(),
                remote = %request.remote_addr,
                error = %e,
                "Request rejected by filter"
            );
        })?;
    }
    Ok(())
}
