//! Local network context resolution
//!
//! The pool needs to know which device outbound aliases attach to, the
//! device's own IPv4 address, and the subnet prefix. When no device is
//! configured, the outbound-facing address is discovered by connecting a
//! UDP socket toward an external host (no packet is sent) and reading
//! the chosen local address back, then the owning device is looked up
//! from the interface table.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use ipnet::Ipv4Net;
use pnet::datalink::{self, NetworkInterface};
use tracing::debug;

use crate::error::PoolError;

/// Remote used for the connected-UDP-socket trick; never actually sent to.
const PROBE_TARGET: &str = "1.1.1.1:1";

/// Network context for outbound address management
#[derive(Debug, Clone)]
pub struct NetContext {
    /// Device outbound aliases attach to (e.g. "eth0")
    pub device: String,
    /// The device's own IPv4 address
    pub base_ip: Ipv4Addr,
    /// Subnet prefix length of the device's address
    pub prefix_len: u8,
}

impl NetContext {
    /// Resolve the network context, preferring an explicitly configured
    /// device and falling back to the outbound-facing interface.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::NetContext` when no usable IPv4 interface can
    /// be found.
    pub fn resolve(configured_device: Option<&str>) -> Result<Self, PoolError> {
        let ctx = match configured_device {
            Some(device) => Self::from_device(device)?,
            None => {
                let ip = outbound_ip()?;
                Self::from_ip(ip)?
            }
        };
        debug!(
            "Network context: {} {}/{}",
            ctx.device, ctx.base_ip, ctx.prefix_len
        );
        Ok(ctx)
    }

    /// Build the context from a known device name
    pub fn from_device(device: &str) -> Result<Self, PoolError> {
        let iface = interface_by_name(device)
            .ok_or_else(|| PoolError::NetContext(format!("no such device: {device}")))?;
        let (ip, prefix_len) = first_ipv4(&iface)
            .ok_or_else(|| PoolError::NetContext(format!("device {device} has no IPv4 address")))?;
        Ok(Self {
            device: device.to_string(),
            base_ip: ip,
            prefix_len,
        })
    }

    /// Build the context from a local address by finding its device
    pub fn from_ip(ip: Ipv4Addr) -> Result<Self, PoolError> {
        for iface in datalink::interfaces() {
            for net in &iface.ips {
                if net.ip() == std::net::IpAddr::V4(ip) {
                    return Ok(Self {
                        device: iface.name.clone(),
                        base_ip: ip,
                        prefix_len: net.prefix(),
                    });
                }
            }
        }
        Err(PoolError::NetContext(format!(
            "no interface carries address {ip}"
        )))
    }

    /// The local subnet as a network value
    ///
    /// # Errors
    ///
    /// Returns `PoolError::NetContext` for an out-of-range prefix.
    pub fn subnet(&self) -> Result<Ipv4Net, PoolError> {
        Ipv4Net::new(self.base_ip, self.prefix_len)
            .map_err(|e| PoolError::NetContext(format!("invalid prefix {}: {e}", self.prefix_len)))
    }
}

/// The machine's outbound-facing IPv4 address
///
/// Connecting a UDP socket selects a source address via the routing
/// table without sending anything; the target does not need to exist.
pub fn outbound_ip() -> Result<Ipv4Addr, PoolError> {
    let sock = UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| PoolError::NetContext(format!("cannot bind probe socket: {e}")))?;
    sock.connect(PROBE_TARGET)
        .map_err(|e| PoolError::NetContext(format!("cannot route to {PROBE_TARGET}: {e}")))?;
    match sock
        .local_addr()
        .map_err(|e| PoolError::NetContext(e.to_string()))?
    {
        SocketAddr::V4(addr) => Ok(*addr.ip()),
        SocketAddr::V6(addr) => Err(PoolError::NetContext(format!(
            "outbound route selected an IPv6 source: {addr}"
        ))),
    }
}

/// Look up an interface by name
pub fn interface_by_name(name: &str) -> Option<NetworkInterface> {
    datalink::interfaces().into_iter().find(|i| i.name == name)
}

/// First IPv4 address and prefix on an interface
pub fn first_ipv4(iface: &NetworkInterface) -> Option<(Ipv4Addr, u8)> {
    iface.ips.iter().find_map(|net| match net.ip() {
        std::net::IpAddr::V4(ip) => Some((ip, net.prefix())),
        std::net::IpAddr::V6(_) => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_context() {
        // Every Linux machine has lo with 127.0.0.1/8.
        let ctx = NetContext::from_device("lo").unwrap();
        assert_eq!(ctx.base_ip, Ipv4Addr::LOCALHOST);
        assert_eq!(ctx.device, "lo");
        let subnet = ctx.subnet().unwrap();
        assert!(subnet.contains(&Ipv4Addr::new(127, 0, 0, 2)));
    }

    #[test]
    fn test_from_ip_loopback() {
        let ctx = NetContext::from_ip(Ipv4Addr::LOCALHOST).unwrap();
        assert_eq!(ctx.device, "lo");
    }

    #[test]
    fn test_unknown_device() {
        assert!(matches!(
            NetContext::from_device("rp-does-not-exist0"),
            Err(PoolError::NetContext(_))
        ));
    }
}
