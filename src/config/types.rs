//! Configuration types for rotoproxy
//!
//! Configuration is loaded from a JSON file, overridden by environment
//! variables, validated once at startup, and then passed by reference
//! into the pool and server constructors. There is no ambient global
//! configuration state.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Listen configuration for the SOCKS server
    #[serde(default)]
    pub listen: ListenConfig,

    /// Outbound address pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            listen: ListenConfig::default(),
            pool: PoolConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Listen configuration for the SOCKS inbound
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Listen address (e.g., "0.0.0.0:1080")
    #[serde(default = "default_listen_addr")]
    pub address: SocketAddr,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 1080))
}

/// Address pool configuration
///
/// Exactly one population strategy runs at startup, selected by
/// precedence: `address_server`, then `address_file`, then
/// `address_list`, then ARP discovery of the local subnet.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Base URL of the address registry service
    #[serde(default)]
    pub address_server: Option<String>,

    /// File with one IPv4 literal per line
    #[serde(default)]
    pub address_file: Option<PathBuf>,

    /// Static list of IPv4 addresses
    #[serde(default)]
    pub address_list: Option<Vec<Ipv4Addr>>,

    /// Target number of addresses for discovery / registry registration
    #[serde(default)]
    pub address_count: Option<usize>,

    /// Named address block on the registry service
    #[serde(default = "default_block_name")]
    pub address_block: String,

    /// Registry credentials
    #[serde(default = "default_registry_user")]
    pub registry_username: String,
    #[serde(default = "default_registry_pass")]
    pub registry_password: String,

    /// Hold a standing virtual interface per pool address for the
    /// process lifetime instead of creating/destroying one per use
    #[serde(default)]
    pub reserve_addresses: bool,

    /// Network device to attach virtual interfaces to; resolved from
    /// the default route when unset
    #[serde(default)]
    pub net_device: Option<String>,

    /// Label prefix for generated virtual interfaces
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            address_server: None,
            address_file: None,
            address_list: None,
            address_count: None,
            address_block: default_block_name(),
            registry_username: default_registry_user(),
            registry_password: default_registry_pass(),
            reserve_addresses: false,
            net_device: None,
            label_prefix: default_label_prefix(),
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref list) = self.address_list {
            if list.is_empty() {
                return Err(ConfigError::ValidationError(
                    "address_list must be a non-empty list of IPv4 addresses".into(),
                ));
            }
        }
        if let Some(count) = self.address_count {
            if count == 0 {
                return Err(ConfigError::ValidationError(
                    "address_count must be greater than zero".into(),
                ));
            }
        }
        Ok(())
    }

    /// Target address count, defaulted as the source does
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.address_count.unwrap_or(30)
    }
}

fn default_block_name() -> String {
    "default".into()
}

fn default_registry_user() -> String {
    "admin".into()
}

fn default_registry_pass() -> String {
    "password".into()
}

fn default_label_prefix() -> String {
    "rp".into()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include the target module in log lines
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

const fn default_true() -> bool {
    true
}
