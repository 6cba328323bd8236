//! Reconciliation loop for converging host state.
//!
//! The agent:
//! - Periodically fetches this host's node config from the control plane
//! - Writes delivered files onto the host
//! - Converges the container runtime against the desired process set

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use helmsman_plan::NodeConfig;

use crate::client::ControlPlaneClient;
use crate::config::Config;
use crate::files;
use crate::reconciler;
use crate::runtime::ContainerRuntime;

/// Where the agent gets its desired state from.
pub enum ConfigSource {
    /// Fetched from the control plane each pass.
    ControlPlane(ControlPlaneClient),

    /// Read from a file on disk each pass, for air-gapped or
    /// bootstrap operation.
    File(PathBuf),
}

impl ConfigSource {
    async fn load(&self) -> anyhow::Result<NodeConfig> {
        match self {
            Self::ControlPlane(client) => client.fetch_node_config().await,
            Self::File(path) => {
                let raw = tokio::fs::read(path).await?;
                Ok(serde_json::from_slice(&raw)?)
            }
        }
    }
}

/// Reconciliation loop configuration.
pub struct AgentConfig {
    /// Interval between reconciliation passes.
    pub reconcile_interval: Duration,

    /// Root directory delivered files are written under.
    pub file_root: PathBuf,

    /// Restart matching containers even when unchanged.
    pub force_restart: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(15),
            file_root: PathBuf::from("/"),
            force_restart: false,
        }
    }
}

impl AgentConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reconcile_interval: Duration::from_secs(config.reconcile_interval_secs),
            file_root: PathBuf::from(&config.file_root),
            force_restart: config.force_restart,
        }
    }
}

/// Agent loop converging one host.
pub struct Agent {
    source: ConfigSource,
    runtime: Arc<dyn ContainerRuntime>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        source: ConfigSource,
        runtime: Arc<dyn ContainerRuntime>,
        config: AgentConfig,
    ) -> Self {
        Self {
            source,
            runtime,
            config,
        }
    }

    /// Run the reconciliation loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            reconcile_interval_secs = self.config.reconcile_interval.as_secs(),
            "Starting reconciliation loop"
        );

        let mut interval = tokio::time::interval(self.config.reconcile_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.reconcile().await {
                        error!(error = %e, "Reconciliation failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Agent shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Perform a single reconciliation pass.
    pub async fn reconcile(&self) -> anyhow::Result<()> {
        debug!("Starting reconciliation");

        let node_config = match self.source.load().await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Failed to load node config, will retry");
                return Err(e);
            }
        };

        files::deliver_files(&self.config.file_root, &node_config.files).await?;

        reconciler::converge_plan(
            Arc::clone(&self.runtime),
            &node_config.processes,
            reconciler::ConvergeOptions {
                force_restart: self.config.force_restart,
                ..Default::default()
            },
        )
        .await?;

        debug!(
            process_count = node_config.processes.len(),
            "Reconciliation complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use helmsman_plan::{ProcessSpec, PROCESS_NAME_LABEL};

    use crate::runtime::{ImageDetails, MemoryRuntime};

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.reconcile_interval, Duration::from_secs(15));
        assert!(!config.force_restart);
    }

    #[tokio::test]
    async fn test_file_source_drives_a_full_pass() {
        let node_config = NodeConfig {
            cluster_name: "local".to_string(),
            processes: BTreeMap::from([(
                "kubelet".to_string(),
                ProcessSpec {
                    name: "kubelet".to_string(),
                    image: "k:v1".to_string(),
                    labels: BTreeMap::from([(
                        PROCESS_NAME_LABEL.to_string(),
                        "kubelet".to_string(),
                    )]),
                    ..Default::default()
                },
            )]),
            ..Default::default()
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node-config.json");
        std::fs::write(&path, serde_json::to_vec(&node_config).unwrap()).unwrap();

        let runtime = Arc::new(MemoryRuntime::new());
        runtime.add_local_image("k:v1", ImageDetails::default()).await;

        let agent = Agent::new(
            ConfigSource::File(path),
            Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            AgentConfig {
                file_root: dir.path().to_path_buf(),
                ..Default::default()
            },
        );
        agent.reconcile().await.unwrap();

        assert_eq!(runtime.container_ids().await.len(), 1);
    }
}
