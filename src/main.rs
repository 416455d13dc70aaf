//! rotoproxy: SOCKS5 proxy with per-connection source-address rotation
//!
//! This is the main entry point for the proxy daemon.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration (subnet discovery needs CAP_NET_RAW)
//! sudo ./rotoproxy
//!
//! # Run with custom configuration
//! sudo ./rotoproxy -c /path/to/config.json
//!
//! # Run with environment overrides
//! address_list=10.0.0.5,10.0.0.6 sudo -E ./rotoproxy
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use rotoproxy::config::{load_config_with_env, Config};
use rotoproxy::net::NetContext;
use rotoproxy::pool::{populate, AddressPool};
use rotoproxy::probe::ArpProber;
use rotoproxy::server::Server;

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/rotoproxy/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("rotoproxy v{}", rotoproxy::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", arg);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"rotoproxy v{}

SOCKS5 proxy that rotates the outbound source address per connection.

USAGE:
    rotoproxy [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/rotoproxy/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT:
    listen_address       Override listen address (e.g. 0.0.0.0:1080)
    address_server       Address registry base URL
    address_file         File with one IPv4 address per line
    address_list         Comma-separated IPv4 addresses
    address_count        Target pool size for discovery/registry
    reserve_addresses    Hold standing aliases for the process lifetime
    net_device           Device to attach aliases to (e.g. eth0)

REQUIREMENTS:
    - CAP_NET_RAW (or root) for ARP subnet discovery
    - CAP_NET_ADMIN (or root) for virtual-interface management
    - the `ip` utility on PATH

EXAMPLE:
    # Serve from three fixed addresses already routed to this host
    address_list=10.0.0.5,10.0.0.6,10.0.0.7 reserve_addresses=1 \
        sudo -E rotoproxy
"#,
        rotoproxy::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("tokio=warn".parse().unwrap());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        rotoproxy::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {:?}: {}",
            args.config_path,
            e
        )
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("rotoproxy v{}", rotoproxy::VERSION);

    // Resolve the device aliases will attach to.
    let ctx = NetContext::resolve(config.pool.net_device.as_deref())
        .map_err(|e| anyhow::anyhow!("Cannot resolve network context: {}", e))?;
    info!(
        "Outbound device {} ({}/{})",
        ctx.device, ctx.base_ip, ctx.prefix_len
    );

    // Populate the pool; discovery can take a while on large subnets.
    let (addresses, strategy) = populate(&config.pool, &ctx, Arc::new(ArpProber::new()))
        .await
        .map_err(|e| anyhow::anyhow!("Address pool population failed: {}", e))?;
    info!(
        "Pool populated via {}: {} addresses",
        strategy,
        addresses.len()
    );

    let pool = Arc::new(
        AddressPool::new(
            ctx,
            addresses,
            config.pool.reserve_addresses,
            &config.pool.label_prefix,
        )
        .map_err(|e| anyhow::anyhow!("Cannot build address pool: {}", e))?,
    );
    pool.reserve_all().await;

    let server = Server::bind(config.listen.address, Arc::clone(&pool))
        .await
        .map_err(|e| anyhow::anyhow!("Cannot bind {}: {}", config.listen.address, e))?;

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    // Run the accept loop with signal handling.
    let accept_result = tokio::select! {
        result = server.run() => result,
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
            Ok(())
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
            Ok(())
        }
    };

    // Graceful shutdown: remove every alias the pool created. Sessions
    // still in flight are cut; their releases hit an already-drained
    // pool and log at worst.
    info!("Shutting down...");
    pool.shutdown().await;
    info!("Shutdown complete");

    accept_result.map_err(|e| anyhow::anyhow!("Server error: {}", e))
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
