//! Error types for rotoproxy
//!
//! Errors are categorized by subsystem: configuration, ARP probing,
//! virtual-interface management, the address pool, the registry client,
//! and per-connection SOCKS sessions.

use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

/// Top-level error type for rotoproxy
#[derive(Debug, Error)]
pub enum RotoproxyError {
    /// Configuration errors (file parsing, validation, env overrides)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// ARP liveness probe errors
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Virtual-interface management errors
    #[error("Interface error: {0}")]
    Iface(#[from] IfaceError),

    /// Address pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Address registry client errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// SOCKS session errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RotoproxyError {
    /// Check if this error is recoverable (the server can keep serving)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Probe(_) | Self::Registry(_) => false,
            Self::Pool(e) => e.is_recoverable(),
            Self::Iface(_) | Self::Session(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, conflicting options)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable override error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

/// ARP liveness probe errors
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Raw socket creation requires CAP_NET_RAW
    #[error("Permission denied creating raw socket: ARP probing requires CAP_NET_RAW")]
    PermissionDenied,

    /// Failed to create or bind the AF_PACKET socket
    #[error("Failed to set up raw socket on {device}: {reason}")]
    SocketSetup { device: String, reason: String },

    /// The device does not exist or carries no usable address
    #[error("Device not usable for probing: {device}: {reason}")]
    Device { device: String, reason: String },

    /// I/O error while sending or receiving frames
    #[error("Probe I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ProbeError {
    /// Create a socket setup error
    pub fn setup(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketSetup {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Create a device error
    pub fn device(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Device {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

/// Virtual-interface management errors
#[derive(Debug, Error)]
pub enum IfaceError {
    /// The external command could not be spawned at all
    #[error("Failed to execute {command}: {reason}")]
    Spawn { command: String, reason: String },

    /// add-interface returned a non-zero exit status
    #[error("Cannot add interface for {ip} on {device}: {stderr}")]
    AddFailed {
        ip: Ipv4Addr,
        device: String,
        stderr: String,
    },

    /// delete-interface returned a non-zero exit status
    #[error("Cannot delete interface for {ip}: {stderr}")]
    DeleteFailed { ip: Ipv4Addr, stderr: String },

    /// list-interface-labels returned a non-zero exit status
    #[error("Cannot list labels on {device}: {stderr}")]
    LabelQueryFailed { device: String, stderr: String },
}

/// Address pool errors
#[derive(Debug, Error)]
pub enum PoolError {
    /// Population produced no addresses (fatal at startup)
    #[error("Address pool is empty after population via {strategy}")]
    Empty { strategy: &'static str },

    /// The address file could not be read
    #[error("Cannot read address file {path}: {reason}")]
    AddressFile { path: String, reason: String },

    /// A literal in a static list or file failed to parse
    #[error("Invalid IPv4 literal in address list: {literal}")]
    InvalidAddress { literal: String },

    /// Allocation-time interface creation failed
    #[error("Failed to create interface for allocation: {0}")]
    AllocateIface(#[source] IfaceError),

    /// Discovery could not resolve the local network context
    #[error("Cannot resolve network context: {0}")]
    NetContext(String),
}

impl PoolError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        // Allocation failures only kill one session; everything else is
        // a startup-time misconfiguration.
        matches!(self, Self::AllocateIface(_))
    }
}

/// Address registry client errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Request could not be sent or timed out
    #[error("Registry request failed: {0}")]
    Network(String),

    /// Non-success HTTP status without a recognizable error body
    #[error("Registry returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The server reported an application-level error
    #[error("Registry error: {0}")]
    Api(String),

    /// Response body was not the expected JSON shape
    #[error("Invalid registry response: {0}")]
    InvalidResponse(String),

    /// Login succeeded but returned no token
    #[error("Registry login did not return an auth token")]
    NoToken,

    /// JSON serialization error
    #[error("Registry serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP protocol error
    #[error("Registry HTTP error: {0}")]
    Http(#[from] hyper::http::Error),
}

/// SOCKS session errors
///
/// These are always session-local: a protocol violation aborts one
/// connection, never the server.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Version byte was not 5
    #[error("Unsupported SOCKS version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// Client offered no acceptable authentication method
    #[error("No acceptable authentication method offered")]
    NoAcceptableMethod,

    /// Command other than CONNECT
    #[error("Unsupported command: {0:#04x}")]
    UnsupportedCommand(u8),

    /// Address type other than IPv4 / domain name
    #[error("Unsupported address type: {0:#04x}")]
    UnsupportedAddressType(u8),

    /// Domain name could not be resolved to an IPv4 address
    #[error("Cannot resolve target host: {host}")]
    Resolve { host: String },

    /// Outbound dial failed
    #[error("Failed to connect to {target}: {reason}")]
    DialFailed { target: String, reason: String },

    /// No outbound address could be allocated
    #[error("Failed to allocate outbound address: {0}")]
    Allocate(#[from] PoolError),

    /// I/O error during handshake or relay
    #[error("Session I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl SessionError {
    /// Create a dial failure error
    pub fn dial(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DialFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Type alias for Result with `RotoproxyError`
pub type Result<T> = std::result::Result<T, RotoproxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recovery_classification() {
        let config_err: RotoproxyError = ConfigError::ValidationError("test".into()).into();
        assert!(!config_err.is_recoverable());

        let probe_err: RotoproxyError = ProbeError::PermissionDenied.into();
        assert!(!probe_err.is_recoverable());

        let session_err: RotoproxyError = SessionError::UnsupportedCommand(0x02).into();
        assert!(session_err.is_recoverable());

        let empty: RotoproxyError = PoolError::Empty { strategy: "file" }.into();
        assert!(!empty.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = ProbeError::PermissionDenied;
        assert!(err.to_string().contains("CAP_NET_RAW"));

        let err = IfaceError::AddFailed {
            ip: "192.168.1.50".parse().unwrap(),
            device: "eth0".into(),
            stderr: "RTNETLINK answers: File exists".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("192.168.1.50"));
        assert!(msg.contains("File exists"));
    }

    #[test]
    fn test_session_error_conversion() {
        let pool_err = PoolError::AllocateIface(IfaceError::DeleteFailed {
            ip: "10.0.0.9".parse().unwrap(),
            stderr: "boom".into(),
        });
        let session: SessionError = pool_err.into();
        assert!(matches!(session, SessionError::Allocate(_)));
    }
}
