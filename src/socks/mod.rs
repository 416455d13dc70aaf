//! SOCKS5 inbound (RFC 1928)
//!
//! The server speaks the no-authentication subset of SOCKS5: method
//! negotiation, a CONNECT request for an IPv4 or domain-name target,
//! one reply, then a transparent byte relay. BIND and UDP ASSOCIATE are
//! rejected with "command not supported".

mod dial;
mod session;

pub use dial::connect_from;
pub use session::{Session, TargetAddr};

/// SOCKS protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

/// No authentication required (0x00)
pub const AUTH_METHOD_NONE: u8 = 0x00;

/// No acceptable methods (0xFF); sent when the client offers no method
/// we speak
pub const AUTH_METHOD_NO_ACCEPTABLE: u8 = 0xFF;

/// CONNECT command, the only one supported
pub const CMD_CONNECT: u8 = 0x01;

/// IPv4 address (4 bytes)
pub const ATYP_IPV4: u8 = 0x01;

/// Domain name (1 byte length + N bytes name)
pub const ATYP_DOMAIN: u8 = 0x03;

/// Succeeded (0x00)
pub const REPLY_SUCCEEDED: u8 = 0x00;

/// Connection refused (0x05); also covers allocation and resolution
/// failures so the client sees one retryable failure mode
pub const REPLY_CONNECTION_REFUSED: u8 = 0x05;

/// Command not supported (0x07)
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;

/// Address type not supported (0x08)
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Convert a reply code to a human-readable message for logging
#[must_use]
pub const fn reply_message(code: u8) -> &'static str {
    match code {
        REPLY_SUCCEEDED => "succeeded",
        REPLY_CONNECTION_REFUSED => "connection refused",
        REPLY_COMMAND_NOT_SUPPORTED => "command not supported",
        REPLY_ADDRESS_TYPE_NOT_SUPPORTED => "address type not supported",
        _ => "unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_constants() {
        assert_eq!(SOCKS5_VERSION, 0x05);
        assert_eq!(AUTH_METHOD_NONE, 0x00);
        assert_eq!(AUTH_METHOD_NO_ACCEPTABLE, 0xFF);
        assert_eq!(CMD_CONNECT, 0x01);
        assert_eq!(ATYP_IPV4, 0x01);
        assert_eq!(ATYP_DOMAIN, 0x03);
    }

    #[test]
    fn test_reply_message() {
        assert_eq!(reply_message(REPLY_SUCCEEDED), "succeeded");
        assert_eq!(reply_message(REPLY_CONNECTION_REFUSED), "connection refused");
        assert_eq!(
            reply_message(REPLY_COMMAND_NOT_SUPPORTED),
            "command not supported"
        );
        assert_eq!(
            reply_message(REPLY_ADDRESS_TYPE_NOT_SUPPORTED),
            "address type not supported"
        );
        assert_eq!(reply_message(0x99), "unknown error");
    }
}
