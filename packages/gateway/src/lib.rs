//! Public surface for the `edgeward-gateway` crate.
//!
//! Exposes the [`Gateway`] lifecycle, the router builder, and the service
//! types so that external crates (e.g. the conformance test suite) can run
//! an in-process gateway without spawning a subprocess.

pub mod blocklist;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod maintenance;
pub mod middleware;
pub mod proxy;
pub mod router;
pub mod storage;
pub mod violations;

pub use config::{ConfigError, GatewayConfig, Mode, OriginPolicy};
pub use error::GatewayError;
pub use gateway::{Gateway, InitError};
pub use router::build_router;
pub use storage::{memory::MemoryStore, BlocklistStore};
