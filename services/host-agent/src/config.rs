//! Configuration for the host agent.

use anyhow::{Context, Result};

/// Host agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address this host is registered under in the cluster inventory.
    pub host_address: String,

    /// Control plane API URL.
    pub control_plane_url: String,

    /// When set, the node config is read from this file instead of
    /// being fetched from the control plane.
    pub node_config_path: Option<String>,

    /// Root directory delivered files are written under.
    pub file_root: String,

    /// Interval between reconciliation passes, in seconds.
    pub reconcile_interval_secs: u64,

    /// Restart matching containers even when their spec is unchanged.
    pub force_restart: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let host_address = std::env::var("HELMSMAN_HOST_ADDRESS")
            .context("HELMSMAN_HOST_ADDRESS must be set")?;

        let control_plane_url = std::env::var("HELMSMAN_CONTROL_PLANE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());

        let node_config_path = std::env::var("HELMSMAN_NODE_CONFIG_PATH").ok();

        let file_root = std::env::var("HELMSMAN_FILE_ROOT").unwrap_or_else(|_| "/".to_string());

        let reconcile_interval_secs = std::env::var("HELMSMAN_RECONCILE_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);

        let force_restart = std::env::var("HELMSMAN_FORCE_RESTART")
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let log_level = std::env::var("HELMSMAN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            host_address,
            control_plane_url,
            node_config_path,
            file_root,
            reconcile_interval_secs,
            force_restart,
            log_level,
        })
    }
}
