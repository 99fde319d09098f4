//! # relay
//!
//! WebSocket broadcast hub binary: loads settings, installs telemetry, and
//! serves until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::{RelayServer, ServerConfig};
use relay_settings::RelaySettings;
use relay_telemetry::TelemetryConfig;

/// Relay broadcast server.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "WebSocket broadcast hub")]
struct Cli {
    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

impl Cli {
    fn load_settings(&self) -> Result<RelaySettings> {
        self.load_settings_with(|name| std::env::var(name).ok())
    }

    /// Load settings, reading `RELAY_*` overrides through `lookup`, then
    /// apply CLI flags on top.
    fn load_settings_with<F>(&self, lookup: F) -> Result<RelaySettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = self.config.clone().unwrap_or_else(relay_settings::settings_path);
        let mut settings = relay_settings::load_settings_with(&path, lookup)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

fn server_config(settings: &RelaySettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        allowed_origins: settings.server.allowed_origins.clone(),
        shutdown_timeout: Duration::from_secs(settings.server.shutdown_timeout_secs),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    relay_telemetry::init_telemetry(&TelemetryConfig {
        level: settings.logging.level.clone(),
        json: settings.logging.json,
    })
    .context("Failed to initialize logging")?;

    let metrics = match relay_telemetry::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let server = RelayServer::new(server_config(&settings), settings.hub_config(), metrics);
    let (addr, serve) = server.listen().await.context("Failed to start server")?;
    tracing::info!(%addr, "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("shutting down");

    server.stop(serve).await;
    Ok(())
}
