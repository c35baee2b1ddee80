//! Load balancing errors

use crate::session::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadBalanceError {
    /// Neither the session nor the server names a tier
    #[error("Session has no tier and no default tier is configured")]
    RequiredTierNotSpecified,

    /// Tier is neither "live" nor a configured canary
    #[error("Canary not found: {0}")]
    CanaryNotFound(String),

    #[error("No routing for listener '{listener}' in tier '{tier}'")]
    ListenerRoutingNotFound { tier: String, listener: String },

    #[error("Service tier not found: {0}")]
    ServiceTierNotFound(String),

    #[error("Service tier '{0}' has no upstream hosts")]
    NoUpstreamHosts(String),

    /// Serve ran before any allocation; the pipeline is mis-ordered
    #[error("No upstream host allocated for session '{0}'")]
    MissingRequiredUpstreamHost(String),

    #[error("Invalid load balance configuration: {0}")]
    InvalidConfig(String),

    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),
}
