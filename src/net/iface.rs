//! Virtual interface (IP alias) management
//!
//! Each outbound address in the pool is backed by an IP alias on the
//! configured device, created with `ip addr add ... label <dev>:<label>`
//! and removed with a matching `ip addr del`. Labels are unique per
//! device; generation retries with a fresh random suffix until the label
//! is not in use.

use std::net::Ipv4Addr;

use rand::Rng;
use tracing::debug;

use super::command;
use crate::error::IfaceError;

/// One OS-level IP alias owned by the pool or by a single allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualInterface {
    /// Physical device the alias is attached to
    pub device: String,
    /// Alias label, unique per device ("eth0:rp37")
    pub label: String,
    /// Alias address
    pub ip: Ipv4Addr,
    /// Subnet prefix length
    pub prefix_len: u8,
}

/// Manages IP aliases on one device
#[derive(Debug, Clone)]
pub struct InterfaceManager {
    device: String,
    prefix_len: u8,
    label_prefix: String,
}

impl InterfaceManager {
    /// Create a manager for the given device and subnet prefix
    pub fn new(
        device: impl Into<String>,
        prefix_len: u8,
        label_prefix: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            prefix_len,
            label_prefix: label_prefix.into(),
        }
    }

    /// The device this manager operates on
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Create an alias for `ip`, generating a collision-free label.
    ///
    /// # Errors
    ///
    /// Returns `IfaceError` when the label query or the add command
    /// fails; a non-zero exit status from `ip addr add` is fatal for
    /// this alias.
    pub async fn add(&self, ip: Ipv4Addr) -> Result<VirtualInterface, IfaceError> {
        let existing = self.labels().await?;
        let label = self.generate_label(&existing);

        let cidr = format!("{ip}/{}", self.prefix_len);
        let out = command::run(
            "ip",
            &[
                "addr", "add", &cidr, "brd", "+", "dev", &self.device, "label", &label,
            ],
        )
        .await?;

        if !out.success() {
            return Err(IfaceError::AddFailed {
                ip,
                device: self.device.clone(),
                stderr: out.stderr.trim().to_string(),
            });
        }

        debug!("Added alias {} for {}", label, ip);

        Ok(VirtualInterface {
            device: self.device.clone(),
            label,
            ip,
            prefix_len: self.prefix_len,
        })
    }

    /// Remove the alias for `ip`.
    ///
    /// # Errors
    ///
    /// Returns `IfaceError::DeleteFailed` on a non-zero exit status.
    pub async fn delete(&self, ip: Ipv4Addr) -> Result<(), IfaceError> {
        let cidr = format!("{ip}/{}", self.prefix_len);
        let out = command::run("ip", &["addr", "del", &cidr, "dev", &self.device]).await?;

        if !out.success() {
            return Err(IfaceError::DeleteFailed {
                ip,
                stderr: out.stderr.trim().to_string(),
            });
        }

        debug!("Removed alias for {}", ip);
        Ok(())
    }

    /// List the alias labels currently assigned on the device.
    ///
    /// Parses one-line-per-address output of `ip -o addr show`.
    ///
    /// # Errors
    ///
    /// Returns `IfaceError::LabelQueryFailed` on a non-zero exit status.
    pub async fn labels(&self) -> Result<Vec<String>, IfaceError> {
        let out = command::run("ip", &["-o", "addr", "show", "dev", &self.device]).await?;

        if !out.success() {
            return Err(IfaceError::LabelQueryFailed {
                device: self.device.clone(),
                stderr: out.stderr.trim().to_string(),
            });
        }

        Ok(parse_labels(&out.stdout, &self.device))
    }

    /// Generate a label not present in `existing`
    fn generate_label(&self, existing: &[String]) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let label = format!(
                "{}:{}{}",
                self.device,
                self.label_prefix,
                rng.gen_range(1..=1000)
            );
            if !existing.contains(&label) {
                return label;
            }
        }
    }
}

/// Extract alias labels ("<dev>:<suffix>") from `ip -o addr show` output
fn parse_labels(stdout: &str, device: &str) -> Vec<String> {
    let prefix = format!("{device}:");
    stdout
        .lines()
        .flat_map(str::split_whitespace)
        .filter(|tok| tok.starts_with(&prefix) && tok.len() > prefix.len())
        .map(|tok| tok.trim_end_matches('\\').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        let output = "\
2: eth0    inet 192.168.1.5/24 brd 192.168.1.255 scope global dynamic eth0\\       valid_lft 86000sec preferred_lft 86000sec
2: eth0    inet 192.168.1.50/24 brd 192.168.1.255 scope global secondary eth0:rp42\\       valid_lft forever preferred_lft forever
2: eth0    inet 192.168.1.51/24 brd 192.168.1.255 scope global secondary eth0:rp7\\       valid_lft forever preferred_lft forever
";
        let labels = parse_labels(output, "eth0");
        assert_eq!(labels, vec!["eth0:rp42", "eth0:rp7"]);
    }

    #[test]
    fn test_parse_labels_empty() {
        assert!(parse_labels("", "eth0").is_empty());
    }

    #[test]
    fn test_parse_labels_other_device_ignored() {
        let output = "3: wlan0    inet 10.0.0.2/24 scope global wlan0:rp9\\  valid_lft forever";
        assert!(parse_labels(output, "eth0").is_empty());
    }

    #[test]
    fn test_generate_label_avoids_collisions() {
        let mgr = InterfaceManager::new("eth0", 24, "rp");

        // Occupy every label but one; generation must land on the hole.
        let mut existing: Vec<String> = (1..=1000).map(|n| format!("eth0:rp{n}")).collect();
        let free = existing.remove(499);

        let label = mgr.generate_label(&existing);
        assert_eq!(label, free);
    }

    #[test]
    fn test_generate_label_format() {
        let mgr = InterfaceManager::new("eth1", 24, "rp");
        let label = mgr.generate_label(&[]);
        assert!(label.starts_with("eth1:rp"));
        let suffix: u32 = label.trim_start_matches("eth1:rp").parse().unwrap();
        assert!((1..=1000).contains(&suffix));
    }
}
