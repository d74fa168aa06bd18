//! Rover relay daemon - pairs rovers with their operators
//!
//! Devices announce themselves with `DC:<name>`, controllers with
//! `CC:<name>`. A controller picks a device with `CD:<name>` and from then on
//! `RE:` lines are relayed between the two.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default 0.0.0.0:8123
//! roverd
//!
//! # Listen on a specific address and port
//! roverd --bind 127.0.0.1 --port 9000
//!
//! # Load settings from a TOML file
//! roverd --config /etc/roverd.toml
//! ROVERD_CONFIG=/etc/roverd.toml roverd
//!
//! # Enable debug logging
//! RUST_LOG=roverd=debug roverd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use roverd::broker::spawn_broker;
use roverd::config::BrokerConfig;
use roverd::server::BrokerServer;

/// Environment variable naming a config file when `--config` is absent
const CONFIG_ENV: &str = "ROVERD_CONFIG";

/// Rover relay daemon - rendezvous broker for rovers and controllers
#[derive(Parser, Debug)]
#[command(name = "roverd", version, about)]
struct Args {
    /// TCP port to listen on
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Address to listen on
    #[arg(short = 'b', long)]
    bind: Option<IpAddr>,

    /// TOML config file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

impl Args {
    /// Defaults, then the config file, then flags.
    fn resolve_config(&self) -> Result<BrokerConfig> {
        let path = self
            .config
            .clone()
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match &path {
            Some(path) => BrokerConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => BrokerConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.resolve_config()?;
    run(config)
}

/// Runs the broker (async entry point).
#[tokio::main]
async fn run(config: BrokerConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("roverd=info".parse()?)
                .add_directive("rover_core=info".parse()?)
                .add_directive("rover_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        addr = %config.listen_addr(),
        max_line_length = config.max_line_length,
        "Rover relay starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let broker = spawn_broker();
    let server = BrokerServer::new(config, broker, cancel_token);

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Rover relay stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
