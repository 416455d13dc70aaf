//! rotoproxy: SOCKS5 proxy with per-connection source-address rotation
//!
//! Every proxied connection leaves the machine from a randomly chosen
//! IPv4 address out of a configured pool, so the remote peer sees a
//! different source address per connection. Pool addresses are backed by
//! virtual interfaces (IP aliases) on the outbound device.
//!
//! # Features
//!
//! - **SOCKS5 inbound**: no-auth CONNECT for IPv4 and domain targets
//! - **Address rotation**: uniform random source per connection
//! - **Pool population**: registry service, file, static list, or ARP
//!   discovery of free addresses on the local subnet
//! - **Interface management**: IP aliases created per allocation or
//!   reserved for the process lifetime
//!
//! # Architecture
//!
//! ```text
//! Client → SOCKS5 handshake → allocate pool address
//!                                   ↓
//!                        bind source + connect
//!                                   ↓
//!                         byte relay → release
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rotoproxy::config::load_config;
//! use rotoproxy::net::NetContext;
//! use rotoproxy::pool::{populate, AddressPool};
//! use rotoproxy::probe::ArpProber;
//! use rotoproxy::server::Server;
//!
//! # async fn example() -> rotoproxy::error::Result<()> {
//! let config = load_config("/etc/rotoproxy/config.json")?;
//! let ctx = NetContext::resolve(config.pool.net_device.as_deref())?;
//!
//! let (addresses, _) = populate(&config.pool, &ctx, Arc::new(ArpProber::new())).await?;
//! let pool = Arc::new(AddressPool::new(
//!     ctx,
//!     addresses,
//!     config.pool.reserve_addresses,
//!     &config.pool.label_prefix,
//! )?);
//!
//! let server = Server::bind(config.listen.address, pool).await?;
//! server.run().await
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`error`]: Error types
//! - [`io`]: Bidirectional relay loop
//! - [`net`]: Network context and virtual-interface management
//! - [`pool`]: Outbound address pool and population strategies
//! - [`probe`]: ARP liveness probing
//! - [`registry`]: Address registry client
//! - [`server`]: Accept loop
//! - [`socks`]: SOCKS5 protocol and session state machine

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod io;
pub mod net;
pub mod pool;
pub mod probe;
pub mod registry;
pub mod server;
pub mod socks;

// Re-export commonly used types at the crate root
pub use config::{Config, ListenConfig, PoolConfig};
pub use error::{
    ConfigError, IfaceError, PoolError, ProbeError, RegistryError, RotoproxyError, SessionError,
};
pub use net::NetContext;
pub use pool::AddressPool;
pub use probe::{ArpProber, LivenessProbe};
pub use server::Server;
pub use socks::{Session, TargetAddr};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
