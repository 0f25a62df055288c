use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use relay_gateway::{GatewayConfig, GatewayConnector};
use relay_server::{AppState, ServerConfig};
use relay_session::{ConsolePrompt, Supervisor, SupervisorConfig};
use relay_settings::RelaySettings;
use relay_telemetry::TelemetryConfig;

/// HTTP relay that delivers one-time passwords over a messaging session.
#[derive(Debug, Parser)]
#[command(name = "otp-relay", version)]
struct Args {
    /// Settings file (JSON). Defaults to $OTP_RELAY_SETTINGS or ./relay.json.
    #[arg(long)]
    settings: Option<PathBuf>,
    /// HTTP listen port.
    #[arg(long)]
    port: Option<u16>,
    /// Base URL of the messaging gateway.
    #[arg(long)]
    gateway_url: Option<String>,
    /// Default log level (RUST_LOG still wins).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = &self.gateway_url {
            settings.gateway.url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        settings.validate();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let path = args
        .settings
        .clone()
        .unwrap_or_else(relay_settings::settings_path);
    let mut settings = relay_settings::load_settings_from_path(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;
    args.apply(&mut settings);

    let telemetry = relay_telemetry::init_telemetry(TelemetryConfig::from(&settings.logging))
        .context("initializing telemetry")?;
    tracing::info!(settings = %path.display(), "starting OTP relay");

    let connector = GatewayConnector::new(GatewayConfig::from(&settings.gateway))
        .context("building gateway client")?;
    let supervisor = Supervisor::new(SupervisorConfig::from(&settings));

    let state = AppState::new(Arc::clone(&supervisor), settings.send.clone())
        .with_metrics(telemetry.metrics_handle());
    let server = relay_server::start(ServerConfig::from(&settings.server), state)
        .await
        .context("binding HTTP listener")?;

    let task = supervisor
        .run(Arc::new(connector), Arc::new(ConsolePrompt))
        .context("starting connection supervisor")?;
    tracing::info!(port = server.port(), "OTP relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;

    tracing::info!("shutting down");
    server.shutdown().await;
    task.shutdown().await;
    Ok(())
}
