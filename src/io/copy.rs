//! Bidirectional relay loop for TCP streams
//!
//! After the SOCKS handshake the session becomes a plain byte pipe:
//! whichever side has data is read into a bounded buffer and written to
//! the other side, with no per-byte protocol interpretation. A
//! zero-length read is a half-close: it is forwarded by shutting down
//! the opposite writer while the other direction keeps draining. The
//! loop ends once both directions have seen EOF, or on the first error.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Relay buffer size per direction
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// Result of a relay operation
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyResult {
    /// Bytes transferred from client to remote
    pub client_to_remote: u64,
    /// Bytes transferred from remote to client
    pub remote_to_client: u64,
}

impl CopyResult {
    /// Total bytes transferred in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.client_to_remote + self.remote_to_client
    }
}

/// Relay bytes between two streams until both directions close.
///
/// Both directions are multiplexed in a single task. A peer that shuts
/// down its write side after sending a request still receives the full
/// response: its EOF only disables that one direction, and the reply
/// bytes keep flowing until the other side closes too. Errors after
/// data has flowed are demoted to a normal close, matching how an
/// abrupt peer disconnect must take the same teardown path as a
/// graceful one.
pub async fn relay<A, B>(client: &mut A, remote: &mut B) -> io::Result<CopyResult>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    relay_with_buffer(client, remote, RELAY_BUFFER_SIZE).await
}

/// Relay with a custom per-direction buffer size
pub async fn relay_with_buffer<A, B>(
    client: &mut A,
    remote: &mut B,
    buf_size: usize,
) -> io::Result<CopyResult>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let mut client_buf = vec![0u8; buf_size];
    let mut remote_buf = vec![0u8; buf_size];
    let mut result = CopyResult::default();
    let mut client_open = true;
    let mut remote_open = true;

    while client_open || remote_open {
        tokio::select! {
            read = client.read(&mut client_buf), if client_open => {
                match read {
                    Ok(0) => {
                        // Forward the half-close; the remote may still
                        // have reply bytes for the client.
                        client_open = false;
                        let _ = remote.shutdown().await;
                    }
                    Ok(n) => {
                        if let Err(e) = remote.write_all(&client_buf[..n]).await {
                            debug!("client->remote write ended: {}", e);
                            break;
                        }
                        result.client_to_remote += n as u64;
                    }
                    Err(e) => {
                        debug!("client read ended: {}", e);
                        break;
                    }
                }
            }
            read = remote.read(&mut remote_buf), if remote_open => {
                match read {
                    Ok(0) => {
                        remote_open = false;
                        let _ = client.shutdown().await;
                    }
                    Ok(n) => {
                        if let Err(e) = client.write_all(&remote_buf[..n]).await {
                            debug!("remote->client write ended: {}", e);
                            break;
                        }
                        result.remote_to_client += n as u64;
                    }
                    Err(e) => {
                        debug!("remote read ended: {}", e);
                        break;
                    }
                }
            }
        }
    }

    // Best-effort flush; the peers may already be gone.
    let _ = client.flush().await;
    let _ = remote.flush().await;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_copy_result_total() {
        let result = CopyResult {
            client_to_remote: 100,
            remote_to_client: 200,
        };
        assert_eq!(result.total(), 300);
    }

    #[tokio::test]
    async fn test_relay_forwards_both_directions() {
        // client_far <-> client_near ... remote_near <-> remote_far
        let (mut client_far, mut client_near) = duplex(256);
        let (mut remote_near, mut remote_far) = duplex(256);

        let relay_task =
            tokio::spawn(async move { relay(&mut client_near, &mut remote_near).await });

        client_far.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        remote_far.write_all(b"pong").await.unwrap();
        client_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        // Closing the client side propagates EOF to the remote; closing
        // the remote in turn ends the loop.
        drop(client_far);
        assert_eq!(remote_far.read(&mut buf).await.unwrap(), 0);
        drop(remote_far);

        let result = relay_task.await.unwrap().unwrap();
        assert_eq!(result.client_to_remote, 4);
        assert_eq!(result.remote_to_client, 4);
    }

    #[tokio::test]
    async fn test_relay_ends_when_both_sides_close() {
        let (mut client_far, mut client_near) = duplex(64);
        let (mut remote_near, remote_far) = duplex(64);

        let relay_task =
            tokio::spawn(async move { relay(&mut client_near, &mut remote_near).await });

        drop(remote_far);
        // The remote's EOF is forwarded to the client.
        let mut buf = [0u8; 1];
        assert_eq!(client_far.read(&mut buf).await.unwrap(), 0);
        drop(client_far);

        let result = relay_task.await.unwrap().unwrap();
        assert_eq!(result.total(), 0);
    }

    #[tokio::test]
    async fn test_relay_half_close_drains_pending_reply() {
        // A client that shuts down its write side after the request must
        // still receive the full response.
        let (mut client_far, mut client_near) = duplex(64);
        let (mut remote_near, mut remote_far) = duplex(64);

        let relay_task =
            tokio::spawn(async move { relay(&mut client_near, &mut remote_near).await });

        client_far.write_all(b"request").await.unwrap();
        client_far.shutdown().await.unwrap();

        let mut buf = [0u8; 7];
        remote_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"request");
        assert_eq!(remote_far.read(&mut buf).await.unwrap(), 0);

        remote_far.write_all(b"replied").await.unwrap();
        drop(remote_far);

        let mut received = Vec::new();
        client_far.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"replied");

        let result = relay_task.await.unwrap().unwrap();
        assert_eq!(result.client_to_remote, 7);
        assert_eq!(result.remote_to_client, 7);
    }

    #[tokio::test]
    async fn test_relay_ordering_preserved() {
        let (mut client_far, mut client_near) = duplex(1024);
        let (mut remote_near, mut remote_far) = duplex(1024);

        let relay_task =
            tokio::spawn(async move { relay(&mut client_near, &mut remote_near).await });

        for chunk in [b"one".as_slice(), b"two".as_slice(), b"three".as_slice()] {
            client_far.write_all(chunk).await.unwrap();
        }
        drop(client_far);

        let mut collected = Vec::new();
        remote_far.read_to_end(&mut collected).await.unwrap();
        assert_eq!(collected, b"onetwothree");
        drop(remote_far);

        relay_task.await.unwrap().unwrap();
    }
}
