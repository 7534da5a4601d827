//! Outline CLI
//!
//! Command-line front-end for the local Outline VPN control plane.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use outline_core::{NativeError, Platform, ShadowsocksSessionConfig, TunnelStatus};
use outline_logging::LogLevel;
use outline_settings::{default_settings_path, Settings};
use outline_tunnel::{ServiceConfig, StartRequest, VpnService};

/// Outline - local VPN control plane
#[derive(Parser)]
#[command(name = "outline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a Shadowsocks server and route system traffic through it
    Connect {
        #[command(flatten)]
        server: ServerArgs,

        /// Skip the connectivity check, as on startup reconnection
        #[arg(long)]
        auto_connect: bool,

        /// Identifier reported with status changes
        #[arg(long, default_value = "cli")]
        id: String,
    },

    /// Check that a server is reachable and whether it relays UDP
    Check {
        #[command(flatten)]
        server: ServerArgs,
    },

    /// Show the effective settings
    Config,
}

#[derive(Args)]
struct ServerArgs {
    /// Server hostname or IP address
    #[arg(long)]
    host: String,

    /// Server port
    #[arg(long)]
    port: u16,

    /// Shadowsocks password
    #[arg(long)]
    password: String,

    /// Shadowsocks cipher
    #[arg(long, default_value = "chacha20-ietf-poly1305")]
    cipher: String,

    /// Salt prefix for the first packet
    #[arg(long)]
    prefix: Option<String>,
}

impl ServerArgs {
    fn session_config(self) -> ShadowsocksSessionConfig {
        let config = ShadowsocksSessionConfig::new(self.host, self.port, self.cipher, self.password);
        match self.prefix {
            Some(prefix) => config.with_prefix(prefix),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    outline_logging::try_init(level).map_err(|e| anyhow::anyhow!("{}", e))?;

    let settings_path = cli.config.unwrap_or_else(default_settings_path);
    let settings = Settings::load_from(&settings_path)
        .with_context(|| format!("Failed to load settings from {:?}", settings_path))?;

    match cli.command {
        Commands::Connect {
            server,
            auto_connect,
            id,
        } => {
            connect(&settings, server.session_config(), auto_connect, id).await?;
        }
        Commands::Check { server } => {
            check(&settings, server.session_config()).await?;
        }
        Commands::Config => {
            println!("Settings file: {}", settings_path.display());
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}

fn service_config(settings: &Settings) -> ServiceConfig {
    let mut platform = Platform::current();
    if let Some(endpoint) = &settings.routing.endpoint {
        platform = platform.with_routing_endpoint(endpoint.clone());
    }

    let mut config = ServiceConfig::new(platform, settings.tun2socks.resolved_binary_path());
    config.debug_mode = settings.tun2socks.debug;
    config.handshake_timeout = settings.routing.handshake_timeout();
    config.teardown_timeout = settings.routing.teardown_timeout();
    config.connectivity_timeout = settings.connectivity.timeout();
    config
}

async fn connect(
    settings: &Settings,
    config: ShadowsocksSessionConfig,
    auto_connect: bool,
    id: String,
) -> Result<()> {
    let service = VpnService::new(service_config(settings));

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    service.on_status_change(Some(Arc::new(move |id: &str, status: TunnelStatus| {
        let _ = status_tx.send((id.to_string(), status));
    })));

    info!("Connecting to {}:{}", config.host, config.port);
    let request = StartRequest {
        id: id.clone(),
        name: config.host.clone(),
        config,
    };
    let start = service.start(request, auto_connect);
    tokio::pin!(start);
    let result = tokio::select! {
        result = &mut start => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Cancelling connection to {}", id);
            // The start has to keep running to observe the stop.
            let (_, result) = tokio::join!(service.stop(Some(&id)), &mut start);
            if result.is_ok() {
                service.stop(Some(&id)).await;
            }
            println!("Cancelled.");
            return Ok(());
        }
    };
    result.map_err(|e| failure(&e, e.native_error()))?;

    println!("Connected. Press Ctrl+C to disconnect.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Disconnecting...");
                service.stop(Some(&id)).await;
                break;
            }
            status = status_rx.recv() => {
                let Some((id, status)) = status else { break };
                println!("{}: {:?}", id, status);
                if status == TunnelStatus::Disconnected {
                    break;
                }
            }
        }
    }

    println!("Disconnected.");
    Ok(())
}

async fn check(settings: &Settings, config: ShadowsocksSessionConfig) -> Result<()> {
    let binary = settings.tun2socks.resolved_binary_path();
    info!("Checking {}:{} with {:?}", config.host, config.port, binary);

    let udp = outline_tun2socks::check_connectivity(
        &binary,
        &config,
        settings.tun2socks.debug,
        settings.connectivity.timeout(),
    )
    .await
    .map_err(|e| failure(&e, e.native_error()))?;

    println!("Server reachable.");
    println!("UDP supported: {}", if udp { "yes" } else { "no" });
    Ok(())
}

fn failure(error: &dyn std::fmt::Display, native: NativeError) -> anyhow::Error {
    let code = native.error_code().code();
    if native.is_red_flag() {
        anyhow::anyhow!("{} (error code {}). This is unexpected, please report it.", error, code)
    } else {
        anyhow::anyhow!("{} (error code {})", error, code)
    }
}
