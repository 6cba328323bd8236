//! Declarative cluster configuration consumed by the plan compiler.
//!
//! All collections are ordered (`BTreeMap`) so a config always compiles
//! to the same plan. Every field has a serde default: an incomplete
//! config is completed, never rejected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Cloud provider whose credentials arrive via IAM/instance metadata
/// rather than a config file; it gets no `cloud-config` flag.
pub const ENV_CREDENTIALED_PROVIDER: &str = "aws";

/// Path the cloud-provider config file is delivered to on each host.
pub const CLOUD_CONFIG_PATH: &str = "/etc/kubernetes/cloud-config.json";

/// Immutable, whole-cluster configuration for one compile cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub cluster_name: String,

    /// Kubernetes version the cluster targets, e.g. `v1.10.3`.
    pub kubernetes_version: String,

    /// Pod network CIDR.
    pub cluster_cidr: String,

    pub service_cluster_ip_range: String,

    pub cluster_dns_server: String,

    pub cluster_domain: String,

    /// `rbac` or `none`.
    pub authorization_mode: String,

    /// Optional root prefix for managed state on hosts.
    pub prefix_path: String,

    pub cloud_provider: CloudProvider,

    pub system_images: SystemImages,

    pub services: ServicesConfig,

    /// Registry host -> credentials, for private system images.
    pub private_registries: BTreeMap<String, RegistryCredential>,

    /// Per-component flag overrides keyed by major version (`v1.10`).
    /// Unknown versions resolve to an empty option set.
    pub version_options: BTreeMap<String, VersionOptions>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_name: "local".to_string(),
            kubernetes_version: "v1.10.3".to_string(),
            cluster_cidr: "10.42.0.0/16".to_string(),
            service_cluster_ip_range: "10.43.0.0/16".to_string(),
            cluster_dns_server: "10.43.0.10".to_string(),
            cluster_domain: "cluster.local".to_string(),
            authorization_mode: "rbac".to_string(),
            prefix_path: String::new(),
            cloud_provider: CloudProvider::default(),
            system_images: SystemImages::default(),
            services: ServicesConfig::default(),
            private_registries: BTreeMap::new(),
            version_options: BTreeMap::new(),
        }
    }
}

/// Cloud provider name and raw config file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudProvider {
    pub name: String,
    /// Provider config file text, delivered to hosts and checksummed
    /// into process environments.
    pub config: String,
}

/// Images for system containers not tied to a single component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemImages {
    /// Kubernetes hyperkube-style image; its tag can refine the
    /// effective major version used for option lookup.
    pub kubernetes: String,

    /// Sidecar image sharing binaries and the tools entrypoint.
    pub sidecar: String,

    /// Proxy image run on worker-only hosts to reach the control plane.
    pub control_proxy: String,
}

impl Default for SystemImages {
    fn default() -> Self {
        Self {
            kubernetes: "registry.example.com/hyperkube:v1.10.3".to_string(),
            sidecar: "registry.example.com/service-sidecar:0.1.13".to_string(),
            control_proxy: "registry.example.com/control-proxy:0.1.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryCredential {
    pub username: String,
    pub password: String,
}

/// Per-component configuration sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub etcd: EtcdConfig,
    pub kube_api: KubeApiConfig,
    pub kube_controller: ServiceConfig,
    pub scheduler: ServiceConfig,
    pub kubelet: KubeletConfig,
    pub kubeproxy: ServiceConfig,
}

/// Common shape of a component section: image plus user extras.
/// `extra_args` replace colliding compiled flags; `extra_binds` and
/// `extra_env` append (deduplicated preserving first occurrence).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub image: String,
    pub extra_args: BTreeMap<String, String>,
    pub extra_binds: Vec<String>,
    pub extra_env: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    pub image: String,
    pub extra_args: BTreeMap<String, String>,
    pub extra_binds: Vec<String>,
    pub extra_env: Vec<String>,

    /// When set, the cluster uses an externally managed etcd and no
    /// etcd process is compiled; the API server points here instead.
    pub external_urls: Vec<String>,

    /// Key prefix within the external etcd.
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeApiConfig {
    pub image: String,
    pub extra_args: BTreeMap<String, String>,
    pub extra_binds: Vec<String>,
    pub extra_env: Vec<String>,

    pub service_node_port_range: String,

    pub pod_security_policy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeletConfig {
    pub image: String,
    pub extra_args: BTreeMap<String, String>,
    pub extra_binds: Vec<String>,
    pub extra_env: Vec<String>,

    /// Pause/infra container image for pods.
    pub infra_container_image: String,

    pub fail_swap_on: bool,
}

/// Version-specific flag overrides for each component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionOptions {
    pub etcd: BTreeMap<String, String>,
    pub kube_api: BTreeMap<String, String>,
    pub kube_controller: BTreeMap<String, String>,
    pub scheduler: BTreeMap<String, String>,
    pub kubelet: BTreeMap<String, String>,
    pub kubeproxy: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_completes_with_defaults() {
        let json = r#"{
            "cluster_name": "prod",
            "services": {
                "kubelet": { "extra_args": { "max-pods": "250" } }
            }
        }"#;

        let config: ClusterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.kubernetes_version, "v1.10.3");
        assert_eq!(config.services.kubelet.extra_args["max-pods"], "250");
        assert!(config.cloud_provider.name.is_empty());
    }

    #[test]
    fn test_version_options_ordered_by_key() {
        let mut config = ClusterConfig::default();
        config
            .version_options
            .insert("v1.9".to_string(), VersionOptions::default());
        config
            .version_options
            .insert("v1.10".to_string(), VersionOptions::default());

        let keys: Vec<_> = config.version_options.keys().collect();
        assert_eq!(keys, vec!["v1.10", "v1.9"]);
    }
}
