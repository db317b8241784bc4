//! # pairline
//!
//! Serves the live state of a device-pairing session over SSE, and talks to
//! a running server from the command line.

#![deny(unsafe_code)]

mod commands;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use pairline_client::{BridgeFactory, ScriptedFactory};
use pairline_core::PairingClientFactory;
use pairline_server::{EventBus, ServerConfig, SessionController};
use pairline_settings::{load_settings, load_settings_from_path, PairlineSettings};
use pairline_telemetry::{init_telemetry, TelemetryConfig};

const DEFAULT_URL: &str = "http://127.0.0.1:3001";

/// How long the simulated pairing waits before "scanning" the challenge.
const SIMULATED_SCAN: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "pairline", about = "Pairing session status server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Run the server (the default when no subcommand is given).
    Serve {
        /// Settings file (defaults to ~/.pairline/settings.json).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to bind, overriding settings and environment.
        #[arg(long)]
        port: Option<u16>,

        /// Use a built-in scripted client instead of the bridge process.
        #[arg(long)]
        simulate: bool,
    },
    /// Print stream events from a running server.
    Watch {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
    /// Ask a running server to start a fresh pairing.
    Restart {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
    /// Ask a running server to log the session out.
    Logout {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
    },
    /// Relay a test message through a running server.
    Send {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        text: String,
    },
}

impl Default for Command {
    fn default() -> Self {
        Self::Serve {
            config: None,
            port: None,
            simulate: false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or_default() {
        Command::Serve {
            config,
            port,
            simulate,
        } => serve(config, port, simulate).await,
        Command::Watch { url } => commands::watch(&url).await,
        Command::Restart { url } => commands::restart(&url).await,
        Command::Logout { url } => commands::logout(&url).await,
        Command::Send { url, phone, text } => commands::send(&url, &phone, &text).await,
    }
}

fn load(config: Option<PathBuf>, port: Option<u16>) -> Result<PairlineSettings> {
    let mut settings = match &config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    if let Some(port) = port {
        settings.server.port = port;
    }
    Ok(settings)
}

fn client_factory(
    settings: &PairlineSettings,
    simulate: bool,
) -> Result<Arc<dyn PairingClientFactory>> {
    if simulate {
        return Ok(Arc::new(ScriptedFactory::demo(SIMULATED_SCAN)));
    }
    if settings.bridge.command.is_none() {
        anyhow::bail!(
            "no pairing bridge configured: set bridge.command in settings, \
             PAIRLINE_BRIDGE_COMMAND, or pass --simulate"
        );
    }
    Ok(Arc::new(BridgeFactory::new(settings.bridge.clone())))
}

async fn serve(config: Option<PathBuf>, port: Option<u16>, simulate: bool) -> Result<()> {
    let settings = load(config, port)?;
    init_telemetry(&TelemetryConfig::from_settings(&settings.logging)?)?;

    let factory = client_factory(&settings, simulate)?;
    let bus = Arc::new(EventBus::new(settings.server.max_send_queue));
    let controller = SessionController::new(bus, factory, settings.session.clone());

    let config = ServerConfig::from_settings(&settings.server);
    let handle = pairline_server::start(config, controller.clone())
        .await
        .with_context(|| format!("failed to bind {}", settings.server.bind_addr()))?;

    if settings.session.autostart {
        controller.schedule_start(false);
    }
    info!(port = handle.port, simulate, "pairline ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    handle.shutdown().await;
    Ok(())
}
