//! Command-line interface for the GlowGrid control panel.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use glowgrid_api::ServerState;
use glowgrid_core::AppConfig;
use glowgrid_devices::{DeviceDirector, DeviceModel};

/// GlowGrid - one control panel for your smart outlets and switches.
#[derive(Parser, Debug)]
#[command(name = "glowgrid")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the web server.
    Serve {
        /// Path to the config file.
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
        /// Override the configured bind host.
        #[arg(long)]
        host: Option<String>,
        /// Override the configured bind port.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Validate a config file without touching the network.
    Check {
        /// Path to the config file.
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Serve { config, host, port } => serve(config, host, port).await,
        Command::Check { config } => check(config),
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose {
        "glowgrid=debug"
    } else {
        "glowgrid=info"
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(default_directive)
                .add_directive(tracing::Level::WARN.into())
        });

    // JSON format for production/container environments
    let json_logging = std::env::var("GLOWGRID_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

async fn serve(config_path: PathBuf, host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let host = host.unwrap_or_else(|| config.host.clone());
    let port = port.unwrap_or(config.port);
    let bind: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {host}:{port}"))?;

    let director = DeviceDirector::new(&config.devices)
        .context("building the device fleet from the config")?;

    let state = ServerState::new(Arc::new(director), config.theme());
    glowgrid_api::run(bind, state).await
}

fn check(config_path: PathBuf) -> Result<()> {
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    for (number, device) in config.devices.iter().enumerate() {
        DeviceModel::resolve(&device.maker, &device.model).with_context(|| {
            format!("device {} (\"{}\")", number + 1, device.title)
        })?;
    }

    println!(
        "{}: {} device(s), {} field(s), theme {:?}",
        config_path.display(),
        config.devices.len(),
        config.field_count(),
        config.theme()
    );
    println!("supported pairings:");
    for (maker, model) in DeviceModel::supported() {
        println!("  {maker} {model}");
    }
    Ok(())
}
