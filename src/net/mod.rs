//! Local network plumbing: context resolution, external command
//! execution, and virtual-interface (IP alias) management.

pub mod command;
mod context;
mod iface;

pub use command::CommandOutput;
pub use context::{first_ipv4, interface_by_name, outbound_ip, NetContext};
pub use iface::{InterfaceManager, VirtualInterface};
