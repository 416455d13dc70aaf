//! Configuration loading and management
//!
//! Loads configuration from a JSON file and applies environment-variable
//! overrides for the option names the deployment environment recognizes:
//! `address_server`, `address_file`, `address_list`, `address_count`,
//! `reserve_addresses`, `net_device`, and `listen_address`.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}")))?;

    config.validate()?;

    info!(
        "Configuration loaded: listen={}, reserve_addresses={}",
        config.listen.address, config.pool.reserve_addresses
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// A missing file is not an error here: the recognized environment
/// variables alone are a complete configuration surface.
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing, or an override fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    let mut config = if path.exists() {
        load_config(path)?
    } else {
        debug!("No configuration file at {:?}, using defaults", path);
        Config::default_config()
    };

    apply_env_overrides(&mut config)?;

    config.validate()?;

    Ok(config)
}

/// Apply environment variable overrides to a configuration
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(addr) = std::env::var("listen_address") {
        config.listen.address = addr.parse().map_err(|_| ConfigError::EnvError {
            name: "listen_address".into(),
            reason: format!("Invalid socket address: {addr}"),
        })?;
        debug!("Listen address overridden to {}", config.listen.address);
    }

    if let Ok(server) = std::env::var("address_server") {
        config.pool.address_server = Some(server);
    }

    if let Ok(file) = std::env::var("address_file") {
        config.pool.address_file = Some(file.into());
    }

    if let Ok(list) = std::env::var("address_list") {
        let parsed: Result<Vec<_>, _> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect();
        config.pool.address_list = Some(parsed.map_err(|_| ConfigError::EnvError {
            name: "address_list".into(),
            reason: format!("Invalid IPv4 list: {list}"),
        })?);
    }

    if let Ok(count) = std::env::var("address_count") {
        config.pool.address_count = Some(count.parse().map_err(|_| ConfigError::EnvError {
            name: "address_count".into(),
            reason: format!("Invalid number: {count}"),
        })?);
    }

    if let Ok(reserve) = std::env::var("reserve_addresses") {
        config.pool.reserve_addresses = parse_bool(&reserve);
        debug!(
            "Reserve mode overridden to {}",
            config.pool.reserve_addresses
        );
    }

    if let Ok(device) = std::env::var("net_device") {
        config.pool.net_device = Some(device);
    }

    Ok(())
}

/// Write a default configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)?;

    info!("Default configuration written to {:?}", path);
    Ok(())
}

/// Truthy parsing for boolean environment values
fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "yes" | "1" | "t"
    )
}
