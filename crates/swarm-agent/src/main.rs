//! # swarm-agent
//!
//! Swarm bus binary. `coordinator` runs the server until Ctrl-C; `agent`
//! connects a client and logs inbound traffic.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use swarm_client::{ClientEvent, SwarmClient};
use swarm_core::logging;
use swarm_server::{Coordinator, CoordinatorEvent};
use swarm_settings::{ClientConfig, CoordinatorConfig, SwarmSettings};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Swarm coordination bus.
#[derive(Parser, Debug)]
#[command(name = "swarm-agent", about = "Swarm coordination bus")]
struct Cli {
    /// Settings file (defaults to `$SWARM_HOME/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Emit JSON logs regardless of settings.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the coordinator until Ctrl-C.
    Coordinator {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,

        /// Maximum concurrent connections.
        #[arg(long)]
        max_connections: Option<usize>,

        /// Serve Prometheus metrics on `/metrics`.
        #[arg(long)]
        metrics: bool,
    },
    /// Connect as an agent and log inbound traffic until Ctrl-C.
    Agent {
        /// Identity presented to the coordinator.
        #[arg(long)]
        agent_id: String,

        /// Coordinator WebSocket URL.
        #[arg(long)]
        url: Option<String>,

        /// Capabilities advertised in heartbeats, comma-separated.
        #[arg(long, value_delimiter = ',')]
        capabilities: Vec<String>,
    },
}

fn load(path: Option<&PathBuf>) -> Result<SwarmSettings> {
    match path {
        Some(path) => swarm_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => swarm_settings::load_settings().context("Failed to load settings"),
    }
}

fn apply_coordinator_overrides(
    config: &mut CoordinatorConfig,
    host: Option<String>,
    port: Option<u16>,
    max_connections: Option<usize>,
) {
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(max) = max_connections {
        config.max_connections = max;
    }
}

fn apply_agent_overrides(
    config: &mut ClientConfig,
    agent_id: String,
    url: Option<String>,
    capabilities: Vec<String>,
) {
    config.agent_id = agent_id;
    if let Some(url) = url {
        config.url = url;
    }
    if !capabilities.is_empty() {
        config.capabilities = Value::from(capabilities);
    }
}

async fn run_coordinator(config: CoordinatorConfig, serve_metrics: bool) -> Result<()> {
    let mut builder = Coordinator::builder(config);
    if serve_metrics {
        let handle = swarm_server::metrics::install_recorder()
            .context("Failed to install metrics recorder")?;
        builder = builder.metrics_handle(handle);
    }
    let coordinator = builder.build();

    let mut events = coordinator.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_coordinator_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let addr = coordinator
        .start()
        .await
        .context("Failed to start coordinator")?;
    info!("swarm coordinator listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    coordinator.stop().await;
    logger.abort();
    info!("Shutdown complete");
    Ok(())
}

fn log_coordinator_event(event: &CoordinatorEvent) {
    let detail = serde_json::to_string(event).unwrap_or_default();
    info!(event = event.name(), %detail, "coordinator event");
}

async fn run_agent(config: ClientConfig) -> Result<()> {
    let client = SwarmClient::new(config);
    let mut events = client.subscribe();
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", client.config().url))?;
    info!(agent_id = %client.agent_id(), "connected to coordinator");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_client_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Disconnecting...");
    client.disconnect().await;
    Ok(())
}

fn log_client_event(event: &ClientEvent) {
    match event {
        ClientEvent::Message(message) => info!(
            id = %message.id,
            kind = %message.message_type,
            from = %message.from,
            payload = %message.payload,
            "inbound"
        ),
        ClientEvent::Disconnected { reason } => warn!(%reason, "disconnected"),
        ClientEvent::Reconnecting { attempt, delay } => {
            info!(attempt, delay_ms = delay.as_millis(), "reconnecting");
        }
        ClientEvent::Error { message } => warn!(%message, "client error"),
        ClientEvent::Connected => info!("connected"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load(cli.settings.as_ref())?;

    if cli.json_logs || settings.logging.json {
        logging::init_json_subscriber(&settings.logging.level);
    } else {
        logging::init_subscriber(&settings.logging.level);
    }

    match cli.command {
        Command::Coordinator {
            host,
            port,
            max_connections,
            metrics,
        } => {
            apply_coordinator_overrides(&mut settings.coordinator, host, port, max_connections);
            settings.validate().context("Invalid settings")?;
            run_coordinator(settings.coordinator, metrics).await
        }
        Command::Agent {
            agent_id,
            url,
            capabilities,
        } => {
            apply_agent_overrides(&mut settings.client, agent_id, url, capabilities);
            settings.validate().context("Invalid settings")?;
            run_agent(settings.client).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn coordinator_flags_parse() {
        let cli = Cli::parse_from([
            "swarm-agent",
            "coordinator",
            "--port",
            "9100",
            "--max-connections",
            "8",
        ]);
        match cli.command {
            Command::Coordinator {
                host,
                port,
                max_connections,
                metrics,
            } => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9100));
                assert_eq!(max_connections, Some(8));
                assert!(!metrics);
            }
            Command::Agent { .. } => panic!("expected coordinator"),
        }
    }

    #[test]
    fn agent_requires_agent_id() {
        assert!(Cli::try_parse_from(["swarm-agent", "agent"]).is_err());
    }

    #[test]
    fn agent_capabilities_split_on_commas() {
        let cli = Cli::parse_from([
            "swarm-agent",
            "agent",
            "--agent-id",
            "w1",
            "--capabilities",
            "code,review",
        ]);
        let Command::Agent {
            agent_id,
            capabilities,
            ..
        } = cli.command
        else {
            panic!("expected agent");
        };
        assert_eq!(agent_id, "w1");
        assert_eq!(capabilities, ["code", "review"]);
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::parse_from(["swarm-agent", "coordinator", "--json-logs"]);
        assert!(cli.json_logs);
    }

    #[test]
    fn coordinator_overrides_replace_only_given_fields() {
        let mut config = CoordinatorConfig::default();
        apply_coordinator_overrides(&mut config, Some("0.0.0.0".into()), None, Some(3));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, CoordinatorConfig::default().port);
        assert_eq!(config.max_connections, 3);
    }

    #[test]
    fn agent_overrides_set_identity_and_capabilities() {
        let mut config = ClientConfig::default();
        apply_agent_overrides(
            &mut config,
            "w1".into(),
            Some("ws://h:1/ws".into()),
            vec!["code".into()],
        );
        assert_eq!(config.agent_id, "w1");
        assert_eq!(config.url, "ws://h:1/ws");
        assert_eq!(config.capabilities, serde_json::json!(["code"]));
    }

    #[test]
    fn empty_capabilities_keep_settings_value() {
        let mut config = ClientConfig {
            capabilities: serde_json::json!(["plan"]),
            ..ClientConfig::default()
        };
        apply_agent_overrides(&mut config, "w1".into(), None, Vec::new());
        assert_eq!(config.capabilities, serde_json::json!(["plan"]));
    }

    #[test]
    fn settings_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"coordinator":{"maxConnections":7}}"#).unwrap();
        let settings = load(Some(&path)).unwrap();
        assert_eq!(settings.coordinator.max_connections, 7);
    }
}
