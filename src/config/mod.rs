//! Configuration module for rotoproxy
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use rotoproxy::config::{load_config, Config};
//!
//! let config = load_config("/etc/rotoproxy/config.json").unwrap();
//! println!("Listening on {}", config.listen.address);
//! ```

mod loader;
mod types;

pub use loader::{
    apply_env_overrides, create_default_config, load_config, load_config_str, load_config_with_env,
};
pub use types::{Config, ListenConfig, LogConfig, PoolConfig};
