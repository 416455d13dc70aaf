//! ARP liveness probing
//!
//! Before an address joins the pool, discovery asks the local segment
//! whether anything already answers for it: one broadcast ARP request is
//! sent on the device and a raw receive socket watches for a matching
//! ARP reply within a bounded window. A reply means "taken"; silence
//! means "free". This is a best-effort heuristic: a host may be silent
//! or sit behind proxy ARP, so callers must tolerate a false "free".
//!
//! Raw AF_PACKET sockets require CAP_NET_RAW; a permission failure is
//! fatal, never silently swallowed.

use std::io::Read;
use std::net::Ipv4Addr;
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::trace;

use crate::error::ProbeError;
use crate::net;

/// Default wait for an ARP reply
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// EtherType for ARP
const ETHERTYPE_ARP: [u8; 2] = [0x08, 0x06];
/// ARP opcode: reply
const ARP_OP_REPLY: [u8; 2] = [0x00, 0x02];
/// Ethernet header length
const ETH_HEADER_LEN: usize = 14;
/// ARP payload length for Ethernet/IPv4
const ARP_LEN: usize = 28;

/// Oracle answering "is this address already in use on the segment?"
///
/// Behind a trait so discovery can be exercised with a simulated
/// prober in tests.
pub trait LivenessProbe: Send + Sync {
    /// Whether `candidate` is already claimed by a host on `device`'s
    /// segment. Blocks up to the prober's timeout.
    ///
    /// # Errors
    ///
    /// Returns `ProbeError` for raw-socket setup failures; these are
    /// fatal for discovery (insufficient privilege, missing device).
    fn is_taken(&self, device: &str, candidate: Ipv4Addr) -> Result<bool, ProbeError>;
}

/// Raw-socket ARP prober
#[derive(Debug, Clone)]
pub struct ArpProber {
    timeout: Duration,
}

impl ArpProber {
    /// Create a prober with the default 250 ms reply window
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Create a prober with a custom reply window
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ArpProber {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessProbe for ArpProber {
    fn is_taken(&self, device: &str, candidate: Ipv4Addr) -> Result<bool, ProbeError> {
        let iface = net::interface_by_name(device)
            .ok_or_else(|| ProbeError::device(device, "no such device"))?;
        let mac = iface
            .mac
            .ok_or_else(|| ProbeError::device(device, "device has no MAC address"))?
            .octets();
        let (own_ip, _) = net::first_ipv4(&iface)
            .ok_or_else(|| ProbeError::device(device, "device has no IPv4 address"))?;
        let ifindex = i32::try_from(iface.index)
            .map_err(|_| ProbeError::device(device, "interface index out of range"))?;

        // Open the receive socket before transmitting so the reply
        // cannot slip past between send and listen.
        let mut rx = open_packet_socket(device, ifindex)?;
        rx.set_read_timeout(Some(self.timeout))
            .map_err(|e| ProbeError::setup(device, e.to_string()))?;

        let tx = open_packet_socket(device, ifindex)?;
        let frame = build_request(mac, own_ip, candidate);
        tx.send(&frame)?;
        trace!("Sent ARP who-has {} on {}", candidate, device);

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; 2048];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            rx.set_read_timeout(Some(remaining))
                .map_err(|e| ProbeError::setup(device, e.to_string()))?;

            match rx.read(&mut buf) {
                Ok(n) => {
                    if reply_matches(&buf[..n], candidate) {
                        trace!("ARP reply: {} is taken", candidate);
                        return Ok(true);
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Ok(false);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Open an AF_PACKET raw socket bound to the device
fn open_packet_socket(device: &str, ifindex: i32) -> Result<Socket, ProbeError> {
    let socket = Socket::new(
        Domain::PACKET,
        Type::RAW,
        Some(Protocol::from(libc::ETH_P_ALL)),
    )
    .map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::PermissionDenied
        } else {
            ProbeError::setup(device, e.to_string())
        }
    })?;

    // socket2 has no sockaddr_ll constructor; bind through libc.
    let addr = libc::sockaddr_ll {
        sll_family: libc::AF_PACKET as u16,
        sll_protocol: (libc::ETH_P_ALL as u16).to_be(),
        sll_ifindex: ifindex,
        sll_hatype: 0,
        sll_pkttype: 0,
        sll_halen: 0,
        sll_addr: [0; 8],
    };
    let ret = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
            std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(ProbeError::setup(
            device,
            format!("bind to interface failed: {err}"),
        ));
    }

    Ok(socket)
}

/// Build a broadcast ARP request frame
fn build_request(sender_mac: [u8; 6], sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> [u8; 42] {
    let mut frame = [0u8; ETH_HEADER_LEN + ARP_LEN];

    // Ethernet: broadcast destination, our source, ARP ethertype
    frame[0..6].copy_from_slice(&[0xFF; 6]);
    frame[6..12].copy_from_slice(&sender_mac);
    frame[12..14].copy_from_slice(&ETHERTYPE_ARP);

    // ARP: Ethernet/IPv4 request
    frame[14..16].copy_from_slice(&[0x00, 0x01]); // hardware type
    frame[16..18].copy_from_slice(&[0x08, 0x00]); // protocol type
    frame[18] = 6; // hardware size
    frame[19] = 4; // protocol size
    frame[20..22].copy_from_slice(&[0x00, 0x01]); // opcode: request
    frame[22..28].copy_from_slice(&sender_mac);
    frame[28..32].copy_from_slice(&sender_ip.octets());
    // target MAC left zeroed
    frame[38..42].copy_from_slice(&target_ip.octets());

    frame
}

/// Whether a captured frame is an ARP reply claiming `candidate`
fn reply_matches(frame: &[u8], candidate: Ipv4Addr) -> bool {
    if frame.len() < ETH_HEADER_LEN + ARP_LEN {
        return false;
    }
    if frame[12..14] != ETHERTYPE_ARP {
        return false;
    }
    let arp = &frame[ETH_HEADER_LEN..ETH_HEADER_LEN + ARP_LEN];
    if arp[6..8] != ARP_OP_REPLY {
        return false;
    }
    let sender = Ipv4Addr::new(arp[14], arp[15], arp[16], arp[17]);
    sender == candidate
}
