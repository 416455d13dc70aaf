//! Address pool population strategies
//!
//! Exactly one strategy runs at startup, selected by precedence:
//! registry-backed, file-backed, static list, then ARP discovery of the
//! local subnet as the default. An empty result from any strategy is
//! fatal: the server must not begin serving without outbound addresses.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{PoolError, ProbeError, Result};
use crate::net::NetContext;
use crate::probe::LivenessProbe;
use crate::registry::RegistryClient;

/// Populate the outbound address set per the configured strategy.
///
/// Returns the addresses along with the strategy name for logging.
///
/// # Errors
///
/// Fatal on registry failures, unreadable files, malformed literals, or
/// an empty result.
pub async fn populate(
    config: &PoolConfig,
    ctx: &NetContext,
    probe: Arc<dyn LivenessProbe>,
) -> Result<(Vec<Ipv4Addr>, &'static str)> {
    if let Some(ref server) = config.address_server {
        let addrs = from_registry(config, server).await?;
        return Ok((addrs, "registry"));
    }

    if let Some(ref path) = config.address_file {
        let addrs = from_file(path)?;
        return Ok((addrs, "file"));
    }

    if let Some(ref list) = config.address_list {
        let addrs = dedupe(list.iter().copied());
        if addrs.is_empty() {
            return Err(PoolError::Empty { strategy: "static" }.into());
        }
        return Ok((addrs, "static"));
    }

    if config.address_count.is_none() {
        warn!("No address population method configured; falling back to subnet discovery");
    }
    let addrs = discover(ctx, probe, config.target_count()).await?;
    Ok((addrs, "discovery"))
}

/// Fetch a pre-registered block from the address registry
async fn from_registry(config: &PoolConfig, server: &str) -> Result<Vec<Ipv4Addr>> {
    let client = RegistryClient::new(server);
    client
        .login(&config.registry_username, &config.registry_password)
        .await?;

    let addrs = client
        .fetch_block(&config.address_block, config.target_count())
        .await?;

    if addrs.is_empty() {
        return Err(PoolError::Empty {
            strategy: "registry",
        }
        .into());
    }

    info!(
        "Loaded {} addresses from registry '{}'",
        addrs.len(),
        server
    );
    Ok(dedupe(addrs.into_iter()))
}

/// Read one IPv4 literal per line; empty lines are skipped, nothing
/// else is validated.
fn from_file(path: &std::path::Path) -> Result<Vec<Ipv4Addr>> {
    let contents = std::fs::read_to_string(path).map_err(|e| PoolError::AddressFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut addrs = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let ip: Ipv4Addr = line.parse().map_err(|_| PoolError::InvalidAddress {
            literal: line.to_string(),
        })?;
        addrs.push(ip);
    }

    let addrs = dedupe(addrs.into_iter());
    if addrs.is_empty() {
        return Err(PoolError::Empty { strategy: "file" }.into());
    }

    info!("Loaded {} addresses from {:?}", addrs.len(), path);
    Ok(addrs)
}

/// Discover free addresses on the local subnet via ARP probing.
///
/// Enumerates every host address in the subnet, shuffles the order, and
/// probes candidates one at a time until `count` free addresses are
/// found or the subnet is exhausted. This is the expensive path (one
/// ARP round-trip per candidate), so progress is logged along the way.
///
/// A permission failure from the prober is fatal; any other probe error
/// marks that one candidate unusable and the loop continues.
pub async fn discover(
    ctx: &NetContext,
    probe: Arc<dyn LivenessProbe>,
    count: usize,
) -> Result<Vec<Ipv4Addr>> {
    let subnet = ctx.subnet()?;
    let mut candidates: Vec<Ipv4Addr> = subnet.hosts().filter(|ip| *ip != ctx.base_ip).collect();
    candidates.shuffle(&mut rand::thread_rng());

    info!(
        "Discovering up to {} free addresses on {} ({} candidates)",
        count,
        subnet,
        candidates.len()
    );

    let mut found: Vec<Ipv4Addr> = Vec::with_capacity(count);
    for candidate in candidates {
        if found.len() == count {
            break;
        }

        let probe = Arc::clone(&probe);
        let device = ctx.device.clone();
        let verdict = tokio::task::spawn_blocking(move || probe.is_taken(&device, candidate))
            .await
            .map_err(|e| PoolError::NetContext(format!("probe task failed: {e}")))?;

        match verdict {
            Ok(true) => debug!("{} is taken, skipping", candidate),
            Ok(false) => {
                found.push(candidate);
                if found.len() % 5 == 0 {
                    info!("Discovery progress: {}/{} addresses", found.len(), count);
                }
            }
            Err(ProbeError::PermissionDenied) => return Err(ProbeError::PermissionDenied.into()),
            Err(e) => debug!("Probe failed for {}, skipping: {}", candidate, e),
        }
    }

    if found.is_empty() {
        return Err(PoolError::Empty {
            strategy: "discovery",
        }
        .into());
    }

    info!("Discovery finished with {} addresses", found.len());
    Ok(found)
}

/// Drop duplicates while preserving first-seen order
fn dedupe(addrs: impl Iterator<Item = Ipv4Addr>) -> Vec<Ipv4Addr> {
    let mut seen = HashSet::new();
    addrs.filter(|ip| seen.insert(*ip)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipnet::Ipv4Net;
    use std::io::Write;

    /// Simulated prober backed by a fixed taken-set
    struct SimProbe {
        taken: HashSet<Ipv4Addr>,
    }

    impl LivenessProbe for SimProbe {
        fn is_taken(
            &self,
            _device: &str,
            candidate: Ipv4Addr,
        ) -> std::result::Result<bool, ProbeError> {
            Ok(self.taken.contains(&candidate))
        }
    }

    fn test_ctx() -> NetContext {
        NetContext {
            device: "eth0".into(),
            base_ip: Ipv4Addr::new(192, 168, 77, 1),
            prefix_len: 28,
        }
    }

    #[tokio::test]
    async fn test_discover_skips_taken_addresses() {
        // /28 has 14 hosts; minus our own address leaves 13 candidates.
        let taken: HashSet<Ipv4Addr> = [
            Ipv4Addr::new(192, 168, 77, 2),
            Ipv4Addr::new(192, 168, 77, 3),
            Ipv4Addr::new(192, 168, 77, 4),
        ]
        .into();
        let probe = Arc::new(SimProbe {
            taken: taken.clone(),
        });

        let found = discover(&test_ctx(), probe, 8).await.unwrap();
        assert_eq!(found.len(), 8);
        for ip in &found {
            assert!(!taken.contains(ip), "{ip} is in the taken set");
            assert_ne!(*ip, Ipv4Addr::new(192, 168, 77, 1), "own address reused");
        }
    }

    #[tokio::test]
    async fn test_discover_exhausts_subnet() {
        // Ask for more than the 13 usable candidates; get exactly the
        // free ones.
        let taken: HashSet<Ipv4Addr> = [Ipv4Addr::new(192, 168, 77, 5)].into();
        let probe = Arc::new(SimProbe { taken });

        let found = discover(&test_ctx(), probe, 50).await.unwrap();
        assert_eq!(found.len(), 12);
    }

    #[tokio::test]
    async fn test_discover_all_taken_is_fatal() {
        let subnet: Ipv4Net = "192.168.77.0/28".parse().unwrap();
        let probe = Arc::new(SimProbe {
            taken: subnet.hosts().collect(),
        });

        let result = discover(&test_ctx(), probe, 4).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_discover_permission_error_is_fatal() {
        struct DeniedProbe;
        impl LivenessProbe for DeniedProbe {
            fn is_taken(&self, _: &str, _: Ipv4Addr) -> std::result::Result<bool, ProbeError> {
                Err(ProbeError::PermissionDenied)
            }
        }

        let result = discover(&test_ctx(), Arc::new(DeniedProbe), 4).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_discover_candidate_errors_skipped() {
        // Probe errors on individual candidates do not abort discovery.
        struct FlakyProbe;
        impl LivenessProbe for FlakyProbe {
            fn is_taken(
                &self,
                _: &str,
                candidate: Ipv4Addr,
            ) -> std::result::Result<bool, ProbeError> {
                if candidate.octets()[3] % 2 == 0 {
                    Err(ProbeError::IoError(std::io::Error::other("transient")))
                } else {
                    Ok(false)
                }
            }
        }

        let found = discover(&test_ctx(), Arc::new(FlakyProbe), 50).await.unwrap();
        assert!(found.iter().all(|ip| ip.octets()[3] % 2 == 1));
        assert!(!found.is_empty());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile_path();
        writeln!(file.1, "10.0.0.5\n\n10.0.0.6\n10.0.0.5\n").unwrap();

        let addrs = from_file(&file.0).unwrap();
        assert_eq!(
            addrs,
            vec![Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 6)]
        );
        let _ = std::fs::remove_file(&file.0);
    }

    #[test]
    fn test_from_file_bad_literal() {
        let mut file = tempfile_path();
        writeln!(file.1, "not-an-ip").unwrap();

        let result = from_file(&file.0);
        assert!(result.is_err());
        let _ = std::fs::remove_file(&file.0);
    }

    #[test]
    fn test_from_file_missing() {
        assert!(from_file(std::path::Path::new("/nonexistent/addresses.txt")).is_err());
    }

    #[tokio::test]
    async fn test_static_list_precedence_over_discovery() {
        struct PanicProbe;
        impl LivenessProbe for PanicProbe {
            fn is_taken(&self, _: &str, _: Ipv4Addr) -> std::result::Result<bool, ProbeError> {
                panic!("discovery must not run when a static list is configured");
            }
        }

        let config = PoolConfig {
            address_list: Some(vec![Ipv4Addr::new(10, 9, 0, 1)]),
            ..Default::default()
        };
        let (addrs, strategy) = populate(&config, &test_ctx(), Arc::new(PanicProbe))
            .await
            .unwrap();
        assert_eq!(strategy, "static");
        assert_eq!(addrs, vec![Ipv4Addr::new(10, 9, 0, 1)]);
    }

    #[test]
    fn test_dedupe_preserves_order() {
        let addrs = dedupe(
            [
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
            ]
            .into_iter(),
        );
        assert_eq!(
            addrs,
            vec![Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 1)]
        );
    }

    /// Unique temp file path plus an open handle for writing
    fn tempfile_path() -> (std::path::PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!(
            "rotoproxy-test-{}-{}",
            std::process::id(),
            rand::random::<u32>()
        ));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
