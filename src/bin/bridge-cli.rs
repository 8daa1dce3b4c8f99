//! Bridge CLI - run the bridge against a live counterpart
//!
//! Provides subcommands for serving an in-memory host over a WebSocket
//! connection and for creating and checking config files.

use anyhow::{Context, Result};
use blueprint_bridge::bridge::host::Host;
use blueprint_bridge::bridge::storage::{self, CONFIG_FILE_NAME};
use blueprint_bridge::bridge::transport::WsConnector;
use blueprint_bridge::bridge::{BridgeClient, BridgeConfig, EndpointResolver};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bridge-cli")]
#[command(about = "Remote class asset mutation bridge for a live editor host", long_about = None)]
struct Cli {
    /// Config file
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and serve commands until Ctrl-C
    Run {
        /// Override the server address
        #[arg(long)]
        address: Option<String>,

        /// Override the server port
        #[arg(long)]
        port: Option<u16>,

        /// Use wss://
        #[arg(long)]
        tls: bool,

        /// Do not reconnect after the link drops
        #[arg(long)]
        no_reconnect: bool,
    },

    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the config file and print the endpoint
    CheckConfig,
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();
}

fn load_or_default(path: &Path) -> Result<BridgeConfig> {
    if path.exists() {
        storage::load_config(path)
    } else {
        Ok(BridgeConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            address,
            port,
            tls,
            no_reconnect,
        } => {
            let mut config = load_or_default(&cli.config)?;
            init_tracing(config.verbose_logging);

            if let Some(address) = address {
                config.server_address = address;
            }
            if let Some(port) = port {
                config.server_port = port;
            }
            config.use_tls |= tls;
            if no_reconnect {
                config.reconnect.enabled = false;
            }
            config.auto_connect = true;

            let endpoint = config.resolve()?;
            info!(url = %endpoint.url, "Starting bridge");

            let client = BridgeClient::start(config, Arc::new(WsConnector::new()), Host::new())
                .await
                .context("Failed to start bridge")?;
            client.connection().subscribe(|change| match &change.error {
                Some(error) => warn!(
                    previous = %change.previous,
                    current = %change.current,
                    error = %error,
                    "State changed"
                ),
                None => info!(
                    previous = %change.previous,
                    current = %change.current,
                    "State changed"
                ),
            })?;

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
            client.shutdown().await?;
        }

        Commands::InitConfig { force } => {
            init_tracing(false);
            if cli.config.exists() && !force {
                anyhow::bail!(
                    "{:?} already exists (use --force to overwrite)",
                    cli.config
                );
            }
            storage::save_config(&cli.config, &BridgeConfig::default())?;
            println!("Wrote default config to {:?}", cli.config);
        }

        Commands::CheckConfig => {
            init_tracing(false);
            let config = storage::load_config(&cli.config)?;
            let endpoint = config.resolve()?;
            println!("Config OK: {:?}", cli.config);
            println!("Endpoint: {}", endpoint.url);
            println!(
                "Reconnect: {} (base {} ms, cap {} ms, {} attempts)",
                if config.reconnect.enabled { "on" } else { "off" },
                config.reconnect.base_delay_ms,
                config.reconnect.max_delay_ms,
                config.reconnect.max_attempts
            );
            println!("Protected paths: {}", config.protected_paths.join(", "));
        }
    }

    Ok(())
}
