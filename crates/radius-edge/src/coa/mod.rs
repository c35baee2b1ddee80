//! CoA and Disconnect reverse routing (RFC 5176)
//!
//! CoA-Request and Disconnect-Request messages reach the proxy from a policy
//! system and must be delivered to the access device currently serving the
//! subscriber. Two strategies:
//!
//! - `coa_dynamic`: learns each session's NAS address from ordinary traffic
//!   through the [`NasTracker`](crate::tracker::NasTracker)
//! - `coa_nas_attribute`: trusts the NAS-IP-Address attribute carried by the
//!   CoA itself, keeping no state

pub mod dynamic;
pub mod nas_attribute;

pub use dynamic::{CoaDynamicConfig, CoaDynamicModule};
pub use nas_attribute::{CoaNasAttributeConfig, CoaNasAttributeModule};

/// RFC 5176 dynamic authorization port
pub const DEFAULT_COA_PORT: u16 = 3799;

pub(crate) fn default_coa_port() -> u16 {
    DEFAULT_COA_PORT
}

pub(crate) fn default_coa_timeout_seconds() -> u64 {
    5
}
