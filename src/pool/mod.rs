//! Outbound address pool
//!
//! Owns the set of IPv4 addresses available for rotation and the
//! virtual interfaces backing them. Sessions call [`AddressPool::allocate`]
//! to draw a random outbound address and [`AddressPool::release`] when
//! the connection ends; the release must happen on every exit path.
//!
//! All pool bookkeeping (the random pick, outstanding counts, and the
//! interface create/delete commands whose label generation races) is
//! serialized behind a single async mutex. The dial and relay phases of
//! a session run outside the lock.

mod populate;

use std::collections::HashMap;
use std::net::Ipv4Addr;

use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use populate::{discover, populate};

use crate::error::PoolError;
use crate::net::{InterfaceManager, NetContext, VirtualInterface};

/// Mutex-guarded pool state
struct PoolInner {
    /// Fixed address set; never shrinks or grows after construction
    addresses: Vec<Ipv4Addr>,
    /// Outstanding allocation count per address. The source's rotation
    /// picks with replacement, so the same address can back two live
    /// sessions; the interface is created on the 0→1 transition and
    /// destroyed on 1→0.
    outstanding: HashMap<Ipv4Addr, usize>,
    /// Aliases currently held (standing ones in reserve mode, live
    /// allocations otherwise)
    ifaces: HashMap<Ipv4Addr, VirtualInterface>,
}

/// Rotating pool of outbound addresses
pub struct AddressPool {
    ctx: NetContext,
    ifmgr: InterfaceManager,
    reserve: bool,
    inner: Mutex<PoolInner>,
}

impl AddressPool {
    /// Create a pool over an already-populated address set.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Empty` for an empty set; the server must
    /// not start without outbound addresses.
    pub fn new(
        ctx: NetContext,
        addresses: Vec<Ipv4Addr>,
        reserve: bool,
        label_prefix: &str,
    ) -> Result<Self, PoolError> {
        if addresses.is_empty() {
            return Err(PoolError::Empty { strategy: "pool" });
        }

        let ifmgr = InterfaceManager::new(ctx.device.clone(), ctx.prefix_len, label_prefix);

        info!(
            "Address pool ready: {} addresses on {} (reserve={})",
            addresses.len(),
            ctx.device,
            reserve
        );

        Ok(Self {
            ctx,
            ifmgr,
            reserve,
            inner: Mutex::new(PoolInner {
                addresses,
                outstanding: HashMap::new(),
                ifaces: HashMap::new(),
            }),
        })
    }

    /// Number of addresses in the pool
    pub async fn len(&self) -> usize {
        self.inner.lock().await.addresses.len()
    }

    /// Whether the pool holds no addresses (never true after construction)
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.addresses.is_empty()
    }

    /// Snapshot of the address set
    pub async fn addresses(&self) -> Vec<Ipv4Addr> {
        self.inner.lock().await.addresses.clone()
    }

    /// Number of allocated-but-not-released addresses
    pub async fn outstanding(&self) -> usize {
        self.inner
            .lock()
            .await
            .outstanding
            .values()
            .filter(|&&n| n > 0)
            .count()
    }

    /// Whether the pool runs in reserve mode
    #[must_use]
    pub const fn is_reserve(&self) -> bool {
        self.reserve
    }

    /// The network context this pool operates in
    #[must_use]
    pub const fn context(&self) -> &NetContext {
        &self.ctx
    }

    /// In reserve mode, create one standing alias per pool address.
    ///
    /// A creation failure for one address (typically "File exists" when
    /// the alias is already present) is logged and does not abort
    /// startup for the rest.
    pub async fn reserve_all(&self) {
        if !self.reserve {
            return;
        }

        let mut inner = self.inner.lock().await;
        let addresses = inner.addresses.clone();
        for ip in addresses {
            match self.ifmgr.add(ip).await {
                Ok(iface) => {
                    inner.ifaces.insert(ip, iface);
                }
                Err(e) => {
                    warn!("Address {} not reserved (may already exist): {}", ip, e);
                }
            }
        }
        info!("Reserved {} standing aliases", inner.ifaces.len());
    }

    /// Draw one outbound address, uniformly at random.
    ///
    /// Outside reserve mode the backing alias is created here; a
    /// creation failure is fatal to the calling session's connect
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AllocateIface` when the alias cannot be
    /// created.
    pub async fn allocate(&self) -> Result<Ipv4Addr, PoolError> {
        let mut inner = self.inner.lock().await;

        let ip = *inner
            .addresses
            .choose(&mut rand::thread_rng())
            .ok_or(PoolError::Empty { strategy: "pool" })?;

        let count = inner.outstanding.entry(ip).or_insert(0);
        *count += 1;
        let first = *count == 1;

        if !self.reserve && first {
            match self.ifmgr.add(ip).await {
                Ok(iface) => {
                    inner.ifaces.insert(ip, iface);
                }
                Err(e) => {
                    // Roll back the count so the address stays cleanly
                    // allocatable next time.
                    if let Some(n) = inner.outstanding.get_mut(&ip) {
                        *n -= 1;
                    }
                    return Err(PoolError::AllocateIface(e));
                }
            }
        }

        debug!("Allocated outbound address {}", ip);
        Ok(ip)
    }

    /// Return an address to the pool.
    ///
    /// Outside reserve mode the backing alias is destroyed once the
    /// last outstanding allocation of this address releases it; a
    /// deletion failure is logged and swallowed. The address returns
    /// to rotation regardless, accepting that its alias may linger.
    pub async fn release(&self, ip: Ipv4Addr) {
        let mut inner = self.inner.lock().await;

        let last = match inner.outstanding.get_mut(&ip) {
            Some(n) if *n > 0 => {
                *n -= 1;
                *n == 0
            }
            _ => {
                warn!("Release of {} without a matching allocation", ip);
                return;
            }
        };

        if !self.reserve && last {
            inner.ifaces.remove(&ip);
            if let Err(e) = self.ifmgr.delete(ip).await {
                warn!("Failed to remove alias for {} (leaked): {}", ip, e);
            }
        }

        debug!("Released outbound address {}", ip);
    }

    /// Remove every alias the pool created. Called at orderly shutdown;
    /// abrupt termination leaks aliases, an accepted limitation.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        let ips: Vec<Ipv4Addr> = inner.ifaces.keys().copied().collect();
        for ip in ips {
            inner.ifaces.remove(&ip);
            if let Err(e) = self.ifmgr.delete(ip).await {
                warn!("Shutdown: failed to remove alias for {}: {}", ip, e);
            }
        }
        info!("Address pool shut down");
    }
}

impl std::fmt::Debug for AddressPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressPool")
            .field("device", &self.ctx.device)
            .field("reserve", &self.reserve)
            .finish()
    }
}
