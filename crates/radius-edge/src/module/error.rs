//! Module pipeline errors

use crate::lb::LoadBalanceError;
use crate::session::StorageError;
use crate::tracker::TrackerError;
use crate::transport::ExchangeError;
use std::fmt;
use thiserror::Error;

/// Errors that abort a pipeline
///
/// The pipeline never maps an error to a wire response; the listener decides
/// (it drops the packet).
#[derive(Error, Debug)]
pub enum ModuleError {
    /// Module configuration rejected at init
    #[error("Invalid configuration for module '{module}': {reason}")]
    Config { module: String, reason: String },

    /// No factory registered under this name
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error(transparent)]
    LoadBalance(#[from] LoadBalanceError),

    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("NAS tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Exchange failed: {0}")]
    Exchange(#[from] ExchangeError),

    /// The chain ended without any module producing a response
    #[error("Pipeline produced no response")]
    NoResponse,
}

/// Coarse classification used as the `kind` tag in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Routing or pipeline misconfiguration; fatal to the request
    Configuration,
    /// Session absent from the store or the tracker
    NotFound,
    /// Timeout or failure reaching a NAS or upstream host
    Transport,
    /// Stored session state no longer decodes
    DataCorruption,
    /// Storage backend unavailable or failing
    Backend,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transport => "transport",
            ErrorKind::DataCorruption => "data_corruption",
            ErrorKind::Backend => "backend",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn storage_kind(err: &StorageError) -> ErrorKind {
    match err {
        StorageError::NotFound(_) => ErrorKind::NotFound,
        StorageError::DataCorruption { .. } | StorageError::Serialization(_) => {
            ErrorKind::DataCorruption
        }
        StorageError::Config(_) => ErrorKind::Configuration,
        StorageError::Connection(_) | StorageError::Timeout(_) | StorageError::Backend(_) => {
            ErrorKind::Backend
        }
    }
}

impl ModuleError {
    pub fn config(module: &str, reason: impl Into<String>) -> Self {
        ModuleError::Config {
            module: module.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ModuleError::Config { .. } | ModuleError::UnknownModule(_) | ModuleError::NoResponse => {
                ErrorKind::Configuration
            }
            ModuleError::LoadBalance(LoadBalanceError::Storage(e)) | ModuleError::Storage(e) => {
                storage_kind(e)
            }
            ModuleError::LoadBalance(_) => ErrorKind::Configuration,
            ModuleError::Tracker(_) => ErrorKind::NotFound,
            ModuleError::Exchange(_) => ErrorKind::Transport,
        }
    }
}

/// Result type for module operations
pub type ModuleResult<T> = Result<T, ModuleError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ModuleError::from(LoadBalanceError::RequiredTierNotSpecified).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            ModuleError::from(LoadBalanceError::Storage(StorageError::NotFound("s".into()))).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ModuleError::from(StorageError::DataCorruption {
                id: "s".into(),
                reason: "eof".into()
            })
            .kind(),
            ErrorKind::DataCorruption
        );
        assert_eq!(
            ModuleError::from(StorageError::Connection("refused".into())).kind(),
            ErrorKind::Backend
        );
        assert_eq!(
            ModuleError::from(TrackerError::NotFound("s".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ModuleError::from(ExchangeError::Timeout {
                address: "127.0.0.1:3799".parse().unwrap(),
                timeout: Duration::from_secs(5)
            })
            .kind(),
            ErrorKind::Transport
        );
        assert_eq!(ModuleError::NoResponse.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::DataCorruption.to_string(), "data_corruption");
        assert_eq!(ErrorKind::NotFound.as_str(), "not_found");
    }
}
