use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use parley_settings::loader::{parse_log_format, validate};
use parley_settings::{LogFormat, RelaySettings};
use parley_telemetry::{OutputFormat, TelemetryConfig};

/// Single-room chat relay over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Settings file (defaults to ~/.parley/settings.json).
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address for both endpoints.
    #[arg(long)]
    host: Option<String>,

    /// WebSocket endpoint port.
    #[arg(long)]
    ws_port: Option<u16>,

    /// Health endpoint port.
    #[arg(long)]
    http_port: Option<u16>,

    /// Log filter directive, e.g. `info` or `parley_server=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// `json` or `pretty`.
    #[arg(long, value_parser = log_format)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.ws_port {
            settings.server.ws_port = port;
        }
        if let Some(port) = self.http_port {
            settings.server.http_port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

fn log_format(val: &str) -> Result<LogFormat, String> {
    parse_log_format(val).ok_or_else(|| format!("unknown log format `{val}`"))
}

fn telemetry_config(settings: &RelaySettings) -> TelemetryConfig {
    TelemetryConfig {
        directive: settings.logging.level.clone(),
        module_levels: Vec::new(),
        format: match settings.logging.format {
            LogFormat::Json => OutputFormat::Json,
            LogFormat::Pretty => OutputFormat::Pretty,
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => parley_settings::load_settings_from_path(path),
        None => parley_settings::load_settings(),
    }
    .context("failed to load settings")?;
    cli.apply(&mut settings);
    validate(&settings).context("invalid settings")?;

    parley_telemetry::init_telemetry(&telemetry_config(&settings))
        .context("failed to initialize logging")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting parley relay");

    let shutdown = parley_server::ShutdownCoordinator::new();
    let config = parley_server::ServerConfig::from(&settings.server);
    let shutdown_timeout = config.shutdown_timeout;
    let handle = parley_server::start(config, &shutdown).await?;

    tracing::info!(
        ws = %handle.ws_addr(),
        http = %handle.http_addr(),
        "parley ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    if !shutdown
        .graceful_shutdown(handle.into_tasks(), Some(shutdown_timeout))
        .await
    {
        tracing::warn!("forced exit with tasks still running");
    }
    Ok(())
}
