//! Daemon access for the Beldex wallet engine.
//!
//! The engine talks to the chain through the blocking [`DaemonClient`] trait.
//! [`HttpDaemon`] implements it over the async JSON-RPC [`RpcClient`];
//! [`MemoryDaemon`] implements it in process for tests and simulations.

pub mod client;
pub mod daemon;
pub mod error;
pub mod http;
pub mod memory;

pub use client::{RpcClient, RpcConfig};
pub use daemon::{ChainHeight, DaemonClient, OutputDistribution, OutputKey, SubmitResult};
pub use error::RpcError;
pub use http::HttpDaemon;
pub use memory::MemoryDaemon;

/// Default RPC ports.
pub mod ports {
    pub const DAEMON_MAINNET: u16 = 19091;
    pub const DAEMON_TESTNET: u16 = 29091;
    pub const DAEMON_DEVNET: u16 = 38161;
}
