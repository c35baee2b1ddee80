//! RADIUS Edge Proxy
//!
//! Sits in front of a fleet of RADIUS servers and provides:
//!
//! - Session-sticky load balancing across live and canary upstream pools
//! - Reverse routing of CoA/Disconnect requests to the access device serving
//!   the subscriber
//! - A per-listener module pipeline assembling these behaviors
//! - Server-wide request filters and a retransmission cache in front of it
//!
//! Session state lives in memory or in Redis/Valkey (`redis` feature).
//!
//! # Example
//!
//! ```rust,no_run
//! use radius_edge::{Config, EdgeServer, ModuleRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config.json")?;
//!     let server = EdgeServer::from_config(&config, &ModuleRegistry::new()).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod coa;
pub mod config;
pub mod dedup;
pub mod filter;
pub mod lb;
pub mod module;
pub mod server;
pub mod session;
pub mod tracker;
pub mod transport;

pub use coa::{CoaDynamicModule, CoaNasAttributeModule};
pub use config::{Config, ConfigError, ListenerConfig};
pub use dedup::{Admission, RequestCache, RequestFingerprint};
pub use filter::{Filter, FilterError, RateLimitFilter};
pub use lb::{Allocator, LbServeModule, LoadBalanceConfig, LoadBalanceError, LoadBalanceModule};
pub use module::{Module, ModuleError, ModuleRegistry, Next, Pipeline, Request, RequestContext, Response};
pub use server::{EdgeServer, Listener, ServerError};
pub use session::{GlobalStorage, MemoryStorage, SessionState, SessionStorage, StorageError};
pub use tracker::{MemoryNasTracker, NasTracker, TrackerError};
pub use transport::{ExchangeError, Exchanger, UdpExchanger};
