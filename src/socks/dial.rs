//! Source-bound outbound dialing
//!
//! The whole point of the rotation: every outbound connection binds its
//! local end to the pool-allocated address before connecting, so the
//! remote peer sees that address rather than the machine's primary one.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::SessionError;

/// Connect to `target` with the local end bound to `source`.
///
/// The connect is initiated non-blocking on a raw socket (bind has to
/// happen before connect, which tokio's connector does not expose),
/// then handed to tokio to await completion. `SO_ERROR` is consulted
/// after writability to distinguish success from an async refusal.
///
/// # Errors
///
/// Returns `SessionError::DialFailed` for bind/connect failures and
/// timeouts.
pub async fn connect_from(
    source: Ipv4Addr,
    target: SocketAddr,
    connect_timeout: Duration,
) -> Result<TcpStream, SessionError> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| SessionError::dial(target.to_string(), e.to_string()))?;

    let local = SocketAddr::V4(SocketAddrV4::new(source, 0));
    socket.bind(&local.into()).map_err(|e| {
        SessionError::dial(
            target.to_string(),
            format!("cannot bind source address {source}: {e}"),
        )
    })?;

    socket
        .set_nonblocking(true)
        .map_err(|e| SessionError::dial(target.to_string(), e.to_string()))?;

    // EINPROGRESS is the normal non-blocking connect outcome.
    match socket.connect(&target.into()) {
        Ok(()) => {}
        Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) => return Err(SessionError::dial(target.to_string(), e.to_string())),
    }

    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpStream::from_std(std_stream)
        .map_err(|e| SessionError::dial(target.to_string(), e.to_string()))?;

    timeout(connect_timeout, async {
        stream
            .writable()
            .await
            .map_err(|e| SessionError::dial(target.to_string(), e.to_string()))?;
        match stream.take_error() {
            Ok(None) => Ok(()),
            Ok(Some(e)) => Err(SessionError::dial(target.to_string(), e.to_string())),
            Err(e) => Err(SessionError::dial(target.to_string(), e.to_string())),
        }
    })
    .await
    .map_err(|_| {
        SessionError::dial(
            target.to_string(),
            format!("connect timed out after {connect_timeout:?}"),
        )
    })??;

    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!("Failed to set TCP_NODELAY: {}", e);
    }

    debug!("Connected to {} from {}", target, source);
    Ok(stream)
}
