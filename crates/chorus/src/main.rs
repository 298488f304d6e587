//! # chorus
//!
//! Binary entry point for the Chorus broadcast relay.
//!
//! Loads layered settings, applies command-line overrides, initializes logging
//! and the Prometheus recorder, then serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chorus_core::logging::{LogFormat, init_subscriber};
use chorus_server::render::is_known_template;
use chorus_server::{ChorusServer, ServerConfig};
use chorus_settings::{ChorusSettings, EchoPolicy, RelayStrategy};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "chorus", about = "WebSocket broadcast relay")]
struct Cli {
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 picks a free port).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to ~/.chorus/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Fan-out strategy: `direct` or `bus`.
    #[arg(long)]
    strategy: Option<String>,

    /// Who receives a sender's own message: `all`, `others`, or `self`.
    #[arg(long)]
    echo: Option<String>,

    /// Broker topic for the bus strategy.
    #[arg(long)]
    topic: Option<String>,

    /// Log level filter (`RUST_LOG` wins when set).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as newline-delimited JSON.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Load settings from `--settings` or the default path.
    fn load_settings(&self) -> Result<ChorusSettings> {
        let settings = match &self.settings {
            Some(path) => chorus_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => chorus_settings::load_settings().context("Failed to load settings")?,
        };
        Ok(settings)
    }

    /// Overlay command-line flags on loaded settings.
    fn apply(&self, settings: &mut ChorusSettings) -> Result<()> {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(name) = &self.strategy {
            let Some(strategy) = RelayStrategy::parse(name) else {
                bail!("unknown strategy '{name}' (expected direct or bus)");
            };
            settings.relay.strategy = strategy;
        }
        if let Some(name) = &self.echo {
            let Some(echo) = EchoPolicy::parse(name) else {
                bail!("unknown echo policy '{name}' (expected all, others or self)");
            };
            settings.relay.echo = echo;
        }
        if let Some(topic) = &self.topic {
            settings.relay.topic.clone_from(topic);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.format = "json".into();
        }
        settings.validate().context("Invalid settings")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = args.load_settings()?;
    args.apply(&mut settings)?;

    let format = LogFormat::parse(&settings.logging.format).unwrap_or_default();
    init_subscriber(&settings.logging.level, format);

    if !is_known_template(&settings.relay.template) {
        bail!("unknown template '{}'", settings.relay.template);
    }

    let metrics = chorus_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = ServerConfig::from_settings(&settings);
    let shutdown_timeout = config.shutdown_timeout;
    let server = ChorusServer::from_config(config).with_metrics(metrics);

    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!(
        "Chorus relay listening on http://{addr} (strategy {}, echo {})",
        settings.relay.strategy.as_str(),
        settings.relay.echo.as_str()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let outcome = server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(shutdown_timeout))
        .await;

    tracing::info!(clean = outcome.is_clean(), "Shutdown complete");
    Ok(())
}
