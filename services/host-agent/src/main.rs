//! Helmsman host agent entry point.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use helmsman_host_agent::agent::{Agent, AgentConfig, ConfigSource};
use helmsman_host_agent::client::ControlPlaneClient;
use helmsman_host_agent::config::Config;
use helmsman_host_agent::runtime::MemoryRuntime;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting helmsman host agent");
    info!(
        host_address = %config.host_address,
        control_plane_url = %config.control_plane_url,
        reconcile_interval_secs = config.reconcile_interval_secs,
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // In-memory engine until a real engine binding is wired in.
    let runtime = Arc::new(MemoryRuntime::new());

    let source = match &config.node_config_path {
        Some(path) => ConfigSource::File(path.into()),
        None => ConfigSource::ControlPlane(ControlPlaneClient::new(&config)?),
    };
    let agent = Agent::new(source, runtime, AgentConfig::from_config(&config));

    let agent_handle = tokio::spawn(async move {
        agent.run(shutdown_rx).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = agent_handle => {
            info!("Agent exited");
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Host agent shutdown complete");
    Ok(())
}
