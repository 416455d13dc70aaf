//! Per-connection SOCKS5 session state machine
//!
//! A session walks the fixed sequence: method negotiation, request
//! parsing, target resolution, outbound-address allocation, source-bound
//! dial, reply, relay. Every failure path after allocation releases the
//! address exactly once; protocol violations abort only this session.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::lookup_host;
use tracing::{debug, info, warn};

use super::{
    connect_from, reply_message, ATYP_DOMAIN, ATYP_IPV4, AUTH_METHOD_NONE,
    AUTH_METHOD_NO_ACCEPTABLE, CMD_CONNECT, REPLY_ADDRESS_TYPE_NOT_SUPPORTED,
    REPLY_COMMAND_NOT_SUPPORTED, REPLY_CONNECTION_REFUSED, REPLY_SUCCEEDED, SOCKS5_VERSION,
};
use crate::error::SessionError;
use crate::io::{relay, CopyResult};
use crate::pool::AddressPool;

/// Outbound connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Target requested by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// Literal IPv4 address and port
    Ip(SocketAddrV4),
    /// Domain name and port, resolved just before dialing
    Domain(String, u16),
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

impl TargetAddr {
    /// Resolve to a concrete IPv4 socket address.
    ///
    /// Domain names resolve through the system resolver; the first IPv4
    /// result wins, IPv6-only names fail.
    pub async fn resolve(&self) -> Result<SocketAddr, SessionError> {
        match self {
            Self::Ip(addr) => Ok(SocketAddr::V4(*addr)),
            Self::Domain(host, port) => {
                let mut results = lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|_| SessionError::Resolve { host: host.clone() })?;
                results
                    .find(SocketAddr::is_ipv4)
                    .ok_or_else(|| SessionError::Resolve { host: host.clone() })
            }
        }
    }
}

/// One client connection's SOCKS5 session
pub struct Session<S> {
    stream: S,
    peer: SocketAddr,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }

    /// Drive the session to completion.
    ///
    /// Returns the relay byte counts on a served connection. The
    /// allocated outbound address is released on every path out of this
    /// function, including dial failures and relay errors.
    pub async fn run(mut self, pool: &AddressPool) -> Result<CopyResult, SessionError> {
        self.negotiate().await?;
        let target = self.read_request().await?;

        let dest = match target.resolve().await {
            Ok(dest) => dest,
            Err(e) => {
                warn!("{}: cannot resolve {}: {}", self.peer, target, e);
                self.send_reply(REPLY_CONNECTION_REFUSED, None).await?;
                return Err(e);
            }
        };

        let source = match pool.allocate().await {
            Ok(ip) => ip,
            Err(e) => {
                warn!("{}: no outbound address available: {}", self.peer, e);
                self.send_reply(REPLY_CONNECTION_REFUSED, None).await?;
                return Err(e.into());
            }
        };

        let outcome = self.serve(source, dest, &target).await;
        // Both sockets must be closed before the address returns to
        // rotation: the remote side dropped inside serve, the client
        // side here.
        drop(self);
        pool.release(source).await;
        outcome
    }

    /// Dial, reply, and relay; the caller owns the release of `source`.
    async fn serve(
        &mut self,
        source: Ipv4Addr,
        dest: SocketAddr,
        target: &TargetAddr,
    ) -> Result<CopyResult, SessionError> {
        let mut remote = match connect_from(source, dest, CONNECT_TIMEOUT).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(
                    "{}: dial {} from {} failed: {}",
                    self.peer, target, source, e
                );
                self.send_reply(REPLY_CONNECTION_REFUSED, None).await?;
                return Err(e);
            }
        };

        let bound = match remote.local_addr() {
            Ok(SocketAddr::V4(addr)) => Some(addr),
            _ => None,
        };
        self.send_reply(REPLY_SUCCEEDED, bound).await?;

        info!("{} -> {} via {}", self.peer, target, source);

        let result = relay(&mut self.stream, &mut remote).await?;
        debug!(
            "{}: session closed, {} bytes relayed",
            self.peer,
            result.total()
        );
        Ok(result)
    }

    /// Method negotiation: only "no authentication" is acceptable
    async fn negotiate(&mut self) -> Result<(), SessionError> {
        let mut header = [0u8; 2];
        self.stream.read_exact(&mut header).await?;
        if header[0] != SOCKS5_VERSION {
            return Err(SessionError::UnsupportedVersion(header[0]));
        }

        let mut methods = vec![0u8; header[1] as usize];
        self.stream.read_exact(&mut methods).await?;

        if !methods.contains(&AUTH_METHOD_NONE) {
            self.stream
                .write_all(&[SOCKS5_VERSION, AUTH_METHOD_NO_ACCEPTABLE])
                .await?;
            self.stream.flush().await?;
            return Err(SessionError::NoAcceptableMethod);
        }

        self.stream
            .write_all(&[SOCKS5_VERSION, AUTH_METHOD_NONE])
            .await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Parse the connect request into a target address
    async fn read_request(&mut self) -> Result<TargetAddr, SessionError> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).await?;
        let [version, command, _reserved, atyp] = header;

        if version != SOCKS5_VERSION {
            return Err(SessionError::UnsupportedVersion(version));
        }
        if command != CMD_CONNECT {
            self.send_reply(REPLY_COMMAND_NOT_SUPPORTED, None).await?;
            return Err(SessionError::UnsupportedCommand(command));
        }

        match atyp {
            ATYP_IPV4 => {
                let mut addr = [0u8; 4];
                self.stream.read_exact(&mut addr).await?;
                let port = self.read_port().await?;
                Ok(TargetAddr::Ip(SocketAddrV4::new(addr.into(), port)))
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                self.stream.read_exact(&mut len).await?;
                let mut name = vec![0u8; len[0] as usize];
                self.stream.read_exact(&mut name).await?;
                let port = self.read_port().await?;
                let host = String::from_utf8(name).map_err(|_| SessionError::Resolve {
                    host: "<non-utf8 domain>".into(),
                })?;
                Ok(TargetAddr::Domain(host, port))
            }
            other => {
                self.send_reply(REPLY_ADDRESS_TYPE_NOT_SUPPORTED, None)
                    .await?;
                Err(SessionError::UnsupportedAddressType(other))
            }
        }
    }

    async fn read_port(&mut self) -> Result<u16, SessionError> {
        let mut port = [0u8; 2];
        self.stream.read_exact(&mut port).await?;
        Ok(u16::from_be_bytes(port))
    }

    /// Send a reply; failure replies carry an all-zero bind address
    async fn send_reply(
        &mut self,
        code: u8,
        bound: Option<SocketAddrV4>,
    ) -> Result<(), SessionError> {
        let bound = bound.unwrap_or_else(|| SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));

        let mut reply = [0u8; 10];
        reply[0] = SOCKS5_VERSION;
        reply[1] = code;
        reply[3] = ATYP_IPV4;
        reply[4..8].copy_from_slice(&bound.ip().octets());
        reply[8..10].copy_from_slice(&bound.port().to_be_bytes());

        self.stream.write_all(&reply).await?;
        self.stream.flush().await?;

        if code != REPLY_SUCCEEDED {
            debug!("{}: replied {}", self.peer, reply_message(code));
        }
        Ok(())
    }
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("peer", &self.peer).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_negotiate_no_auth() {
        let (mut client, server) = duplex(64);
        let mut session = Session::new(server, peer());

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        session.negotiate().await.unwrap();

        let mut resp = [0u8; 2];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_negotiate_rejects_wrong_version() {
        let (mut client, server) = duplex(64);
        let mut session = Session::new(server, peer());

        client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();
        assert!(matches!(
            session.negotiate().await,
            Err(SessionError::UnsupportedVersion(0x04))
        ));
    }

    #[tokio::test]
    async fn test_negotiate_no_acceptable_method() {
        let (mut client, server) = duplex(64);
        let mut session = Session::new(server, peer());

        // Client offers only username/password auth.
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        assert!(matches!(
            session.negotiate().await,
            Err(SessionError::NoAcceptableMethod)
        ));

        let mut resp = [0u8; 2];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp, [0x05, 0xFF]);
    }

    #[tokio::test]
    async fn test_request_ipv4_target() {
        let (mut client, server) = duplex(64);
        let mut session = Session::new(server, peer());

        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 10, 0, 0, 7, 0x1F, 0x90])
            .await
            .unwrap();
        let target = session.read_request().await.unwrap();
        assert_eq!(
            target,
            TargetAddr::Ip(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 8080))
        );
    }

    #[tokio::test]
    async fn test_request_domain_target() {
        let (mut client, server) = duplex(128);
        let mut session = Session::new(server, peer());

        let mut req = vec![0x05, 0x01, 0x00, 0x03, 11];
        req.extend_from_slice(b"example.com");
        req.extend_from_slice(&443u16.to_be_bytes());
        client.write_all(&req).await.unwrap();

        let target = session.read_request().await.unwrap();
        assert_eq!(target, TargetAddr::Domain("example.com".into(), 443));
    }

    #[tokio::test]
    async fn test_request_bind_rejected() {
        let (mut client, server) = duplex(64);
        let mut session = Session::new(server, peer());

        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 10, 0, 0, 7, 0x00, 0x50])
            .await
            .unwrap();
        assert!(matches!(
            session.read_request().await,
            Err(SessionError::UnsupportedCommand(0x02))
        ));

        // Command-not-supported reply with a zeroed bind address.
        let mut resp = [0u8; 10];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp[0], 0x05);
        assert_eq!(resp[1], 0x07);
        assert_eq!(&resp[4..10], &[0u8; 6]);
    }

    #[tokio::test]
    async fn test_request_ipv6_atyp_rejected() {
        let (mut client, server) = duplex(64);
        let mut session = Session::new(server, peer());

        client.write_all(&[0x05, 0x01, 0x00, 0x04]).await.unwrap();
        assert!(matches!(
            session.read_request().await,
            Err(SessionError::UnsupportedAddressType(0x04))
        ));

        let mut resp = [0u8; 10];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp[1], 0x08);
    }

    #[tokio::test]
    async fn test_resolve_literal_target() {
        let target = TargetAddr::Ip(SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 80));
        let dest = target.resolve().await.unwrap();
        assert_eq!(dest, "10.1.2.3:80".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_localhost_domain() {
        let target = TargetAddr::Domain("localhost".into(), 8080);
        let dest = target.resolve().await.unwrap();
        assert!(dest.is_ipv4());
        assert_eq!(dest.port(), 8080);
    }

    #[tokio::test]
    async fn test_target_display() {
        assert_eq!(
            TargetAddr::Domain("example.com".into(), 443).to_string(),
            "example.com:443"
        );
        assert_eq!(
            TargetAddr::Ip(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 80)).to_string(),
            "10.0.0.7:80"
        );
    }
}
