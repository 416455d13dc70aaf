//! SOCKS server accept loop
//!
//! One task per accepted connection; a failed session logs and dies
//! alone, the listener keeps accepting.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SessionError};
use crate::pool::AddressPool;
use crate::socks::Session;

/// The listening SOCKS5 server
pub struct Server {
    listener: TcpListener,
    pool: Arc<AddressPool>,
}

impl Server {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns the bind error (port in use, privileged port, etc.).
    pub async fn bind(addr: SocketAddr, pool: Arc<AddressPool>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("SOCKS5 server listening on {}", listener.local_addr()?);
        Ok(Self { listener, pool })
    }

    /// The actually bound address (relevant for port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is cancelled.
    ///
    /// Runs forever; the caller races it against a shutdown signal and
    /// drops it to stop accepting.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Per-connection accept errors (ECONNABORTED, EMFILE
                    // bursts) are survivable; keep listening.
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };
            debug!("Accepted connection from {}", peer);

            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("{}: failed to set TCP_NODELAY: {}", peer, e);
                }
                match Session::new(stream, peer).run(&pool).await {
                    Ok(_) => {}
                    // Protocol violations and dead peers are routine.
                    Err(SessionError::IoError(e)) => {
                        debug!("{}: session I/O ended: {}", peer, e);
                    }
                    Err(e @ SessionError::Allocate(_)) => {
                        error!("{}: {}", peer, e);
                    }
                    Err(e) => {
                        debug!("{}: session failed: {}", peer, e);
                    }
                }
            });
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.listener.local_addr().ok())
            .finish()
    }
}
