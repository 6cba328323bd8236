//! Process and plan types shared between the compiler and the host agent.
//!
//! These are the boundary artifacts of the system: the compiler emits
//! [`NodePlan`]s, the per-host agent consumes a [`NodeConfig`] and
//! converges the container runtime against each [`ProcessSpec`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label carried by every container managed by this system. The value is
/// the process name.
pub const PROCESS_NAME_LABEL: &str = "io.helmsman.process.name";

/// Label key recognized for containers created by older agent versions.
/// Matches under either label are merged during discovery.
pub const LEGACY_PROCESS_NAME_LABEL: &str = "io.helmsman.agent.process-name";

/// Environment variable carrying a checksum of the cloud-provider
/// configuration. It exists only so an env diff forces recreation when
/// the config file changes without altering any command-line flag.
pub const CLOUD_CONFIG_CHECKSUM_ENV: &str = "HELMSMAN_CLOUD_CONFIG_CHECKSUM";

/// Fully-resolved description of one container process to run on a host.
///
/// Must be fully determined by (ClusterConfig, Host): no hidden
/// randomness, no unstable iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,

    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Ordered environment entries (`KEY=value`). May contain duplicates
    /// before deduplication.
    #[serde(default)]
    pub env: Vec<String>,

    /// Bind mounts in `host:container[:options]` form.
    #[serde(default)]
    pub binds: Vec<String>,

    #[serde(default)]
    pub volumes_from: Vec<String>,

    #[serde(default)]
    pub network_mode: String,

    #[serde(default)]
    pub pid_mode: String,

    #[serde(default)]
    pub privileged: bool,

    #[serde(default)]
    pub restart_policy: String,

    pub image: String,

    #[serde(default)]
    pub health_check: HealthCheck,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Base64 auth blob for pulling the image from a private registry.
    /// Empty when the image's registry has no configured credentials.
    #[serde(default)]
    pub registry_auth: String,

    /// When true the process is expected to run to completion once; a
    /// container that exited with status 0 is left stopped rather than
    /// restarted.
    #[serde(default)]
    pub run_once: bool,
}

/// Health-check endpoint probed by an external collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub url: String,
}

/// A (address, port, protocol) triple verified for connectivity before
/// provisioning proceeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCheck {
    pub address: String,
    pub port: u16,
    pub protocol: String,
}

/// A file delivered to the host alongside the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredFile {
    pub name: String,
    /// Base64-encoded file contents.
    pub contents: String,
}

/// The complete set of process specs, port checks, and delivered files
/// for one host. Built fresh every compile cycle and never mutated; the
/// runtime's actual containers remain authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePlan {
    pub address: String,

    pub processes: BTreeMap<String, ProcessSpec>,

    #[serde(default)]
    pub port_checks: Vec<PortCheck>,

    #[serde(default)]
    pub files: Vec<DeliveredFile>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Per-host payload handed from the compiler to the host agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub cluster_name: String,

    /// Certificates bundle for the host, delivered opaquely.
    #[serde(default)]
    pub certs: String,

    pub processes: BTreeMap<String, ProcessSpec>,

    #[serde(default)]
    pub files: Vec<DeliveredFile>,
}

impl NodeConfig {
    /// Build the transport payload for one host from its compiled plan.
    pub fn from_plan(cluster_name: &str, certs: &str, plan: &NodePlan) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            certs: certs.to_string(),
            processes: plan.processes.clone(),
            files: plan.files.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_spec_roundtrip() {
        let spec = ProcessSpec {
            name: "kubelet".to_string(),
            command: vec!["/opt/helmsman-tools/entrypoint.sh".to_string()],
            env: vec!["FOO=bar".to_string()],
            network_mode: "host".to_string(),
            privileged: true,
            image: "registry.example.com/hyperkube:v1.10.3".to_string(),
            labels: BTreeMap::from([(
                PROCESS_NAME_LABEL.to_string(),
                "kubelet".to_string(),
            )]),
            ..Default::default()
        };

        let json = serde_json::to_string(&spec).unwrap();
        let back: ProcessSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }

    #[test]
    fn test_node_config_deserializes_with_defaults() {
        let json = r#"{
            "cluster_name": "local",
            "processes": {
                "etcd": {
                    "name": "etcd",
                    "image": "quay.io/coreos/etcd:v3.2.18"
                }
            }
        }"#;

        let config: NodeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.cluster_name, "local");
        assert!(config.certs.is_empty());
        let etcd = &config.processes["etcd"];
        assert!(etcd.command.is_empty());
        assert!(!etcd.run_once);
    }
}
