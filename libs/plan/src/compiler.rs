//! Per-host plan assembly.
//!
//! The compiler partitions the host inventory by role flags and invokes
//! one process builder per role. Compilation is pure and side-effect
//! free; plans for different hosts are independent.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::{ClusterConfig, CLOUD_CONFIG_PATH};
use crate::host::{self, Host};
use crate::process::{DeliveredFile, NodePlan, PortCheck};

pub const ETCD_PROCESS: &str = "etcd";
pub const API_SERVER_PROCESS: &str = "kube-apiserver";
pub const CONTROLLER_PROCESS: &str = "kube-controller-manager";
pub const SCHEDULER_PROCESS: &str = "kube-scheduler";
pub const KUBELET_PROCESS: &str = "kubelet";
pub const KUBE_PROXY_PROCESS: &str = "kube-proxy";
pub const SIDECAR_PROCESS: &str = "service-sidecar";
pub const CONTROL_PROXY_PROCESS: &str = "control-proxy";

pub const API_SERVER_PORT: u16 = 6443;
pub const SCHEDULER_PORT: u16 = 10251;
pub const CONTROLLER_PORT: u16 = 10252;
pub const KUBELET_PORT: u16 = 10250;
pub const KUBE_PROXY_PORT: u16 = 10256;
pub const ETCD_CLIENT_PORT: u16 = 2379;
pub const ETCD_PEER_PORT: u16 = 2380;

pub const PROTOCOL_TCP: &str = "TCP";

const WORKER_PORTS: &[u16] = &[KUBELET_PORT];
const CONTROL_PLANE_PORTS: &[u16] = &[API_SERVER_PORT];
const ETCD_PORTS: &[u16] = &[ETCD_CLIENT_PORT, ETCD_PEER_PORT];

pub const EXTERNAL_ADDRESS_ANNOTATION: &str = "helmsman.io/external-address";
pub const INTERNAL_ADDRESS_ANNOTATION: &str = "helmsman.io/internal-address";

/// Compiled plans for the whole inventory, one node plan per host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPlan {
    pub nodes: Vec<NodePlan>,
}

/// Orchestrates the per-role process builders over a host inventory.
pub struct PlanCompiler {
    pub(crate) config: ClusterConfig,
    hosts: Vec<Host>,
}

impl PlanCompiler {
    /// Deduplicates the inventory by address (first occurrence wins) and
    /// normalizes hosts: an empty internal address or hostname override
    /// falls back to the external address.
    pub fn new(config: ClusterConfig, inventory: &[Host]) -> Self {
        let mut hosts = host::unique_hosts(inventory);
        for h in &mut hosts {
            if h.internal_address.is_empty() {
                h.internal_address = h.address.clone();
            }
            if h.hostname_override.is_empty() {
                h.hostname_override = h.address.clone();
            }
        }
        Self { config, hosts }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub(crate) fn etcd_hosts(&self) -> Vec<&Host> {
        self.hosts.iter().filter(|h| h.is_etcd).collect()
    }

    pub(crate) fn ready_etcd_hosts(&self) -> Vec<&Host> {
        self.hosts
            .iter()
            .filter(|h| h.is_etcd && h.etcd_ready)
            .collect()
    }

    pub(crate) fn control_hosts(&self) -> Vec<&Host> {
        self.hosts.iter().filter(|h| h.is_control).collect()
    }

    /// Compile one node plan per unique host.
    pub fn generate_plan(&self) -> ClusterPlan {
        ClusterPlan {
            nodes: self
                .hosts
                .iter()
                .map(|host| self.build_node_plan(host))
                .collect(),
        }
    }

    /// Compile the full plan for a single host based on its role flags.
    pub fn build_node_plan(&self, host: &Host) -> NodePlan {
        let prefix = host::prefix_path(
            &host.runtime_info.operating_system,
            &self.config.prefix_path,
        );

        let mut processes = BTreeMap::new();
        let mut port_checks = port_checks_for(host, WORKER_PORTS);

        // Every host runs the sidecar, a kubelet, and a kube-proxy.
        processes.insert(SIDECAR_PROCESS.to_string(), self.build_sidecar_process());
        processes.insert(
            KUBELET_PROCESS.to_string(),
            self.build_kubelet_process(host, &prefix),
        );
        processes.insert(
            KUBE_PROXY_PROCESS.to_string(),
            self.build_kube_proxy_process(host, &prefix),
        );

        if !host.is_control {
            processes.insert(
                CONTROL_PROXY_PROCESS.to_string(),
                self.build_control_proxy_process(),
            );
        }
        if host.is_control {
            processes.insert(
                API_SERVER_PROCESS.to_string(),
                self.build_api_server_process(&prefix),
            );
            processes.insert(
                CONTROLLER_PROCESS.to_string(),
                self.build_controller_manager_process(&prefix),
            );
            processes.insert(
                SCHEDULER_PROCESS.to_string(),
                self.build_scheduler_process(&prefix),
            );
            port_checks.extend(port_checks_for(host, CONTROL_PLANE_PORTS));
        }
        if host.is_etcd {
            processes.insert(
                ETCD_PROCESS.to_string(),
                self.build_etcd_process(host, &prefix),
            );
            port_checks.extend(port_checks_for(host, ETCD_PORTS));
        }

        let cloud_config = DeliveredFile {
            name: CLOUD_CONFIG_PATH.to_string(),
            contents: BASE64.encode(self.config.cloud_provider.config.as_bytes()),
        };

        NodePlan {
            address: host.address.clone(),
            processes,
            port_checks,
            files: vec![cloud_config],
            annotations: BTreeMap::from([
                (
                    EXTERNAL_ADDRESS_ANNOTATION.to_string(),
                    host.address.clone(),
                ),
                (
                    INTERNAL_ADDRESS_ANNOTATION.to_string(),
                    host.internal_address.clone(),
                ),
            ]),
            labels: host.labels.clone(),
        }
    }
}

fn port_checks_for(host: &Host, ports: &[u16]) -> Vec<PortCheck> {
    ports
        .iter()
        .map(|&port| PortCheck {
            address: host.address.clone(),
            port,
            protocol: PROTOCOL_TCP.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::PROCESS_NAME_LABEL;

    fn host(address: &str, etcd: bool, control: bool, worker: bool) -> Host {
        Host {
            address: address.to_string(),
            is_etcd: etcd,
            is_control: control,
            is_worker: worker,
            ..Default::default()
        }
    }

    fn compiler(inventory: &[Host]) -> PlanCompiler {
        PlanCompiler::new(ClusterConfig::default(), inventory)
    }

    #[test]
    fn test_worker_host_gets_base_processes_and_proxy() {
        let inventory = vec![
            host("10.0.0.1", true, true, false),
            host("10.0.0.2", false, false, true),
        ];
        let compiler = compiler(&inventory);
        let plan = compiler.build_node_plan(&compiler.hosts()[1]);

        let names: Vec<_> = plan.processes.keys().cloned().collect();
        assert_eq!(
            names,
            vec![
                CONTROL_PROXY_PROCESS,
                KUBE_PROXY_PROCESS,
                KUBELET_PROCESS,
                SIDECAR_PROCESS,
            ]
        );
        assert_eq!(plan.port_checks.len(), 1);
        assert_eq!(plan.port_checks[0].port, KUBELET_PORT);
    }

    #[test]
    fn test_control_etcd_host_gets_full_stack_no_proxy() {
        let inventory = vec![host("10.0.0.1", true, true, false)];
        let compiler = compiler(&inventory);
        let plan = compiler.build_node_plan(&compiler.hosts()[0]);

        assert!(plan.processes.contains_key(API_SERVER_PROCESS));
        assert!(plan.processes.contains_key(CONTROLLER_PROCESS));
        assert!(plan.processes.contains_key(SCHEDULER_PROCESS));
        assert!(plan.processes.contains_key(ETCD_PROCESS));
        assert!(!plan.processes.contains_key(CONTROL_PROXY_PROCESS));

        let ports: Vec<_> = plan.port_checks.iter().map(|c| c.port).collect();
        assert_eq!(
            ports,
            vec![KUBELET_PORT, API_SERVER_PORT, ETCD_CLIENT_PORT, ETCD_PEER_PORT]
        );
    }

    #[test]
    fn test_duplicate_hosts_compile_once() {
        let inventory = vec![
            host("10.0.0.1", true, false, false),
            host("10.0.0.1", false, true, false),
            host("10.0.0.2", false, false, true),
        ];
        let plan = compiler(&inventory).generate_plan();
        assert_eq!(plan.nodes.len(), 2);
    }

    #[test]
    fn test_every_process_carries_name_label() {
        let inventory = vec![host("10.0.0.1", true, true, true)];
        let compiler = compiler(&inventory);
        let plan = compiler.build_node_plan(&compiler.hosts()[0]);

        for (name, spec) in &plan.processes {
            assert_eq!(spec.labels.get(PROCESS_NAME_LABEL), Some(name));
            assert_eq!(&spec.name, name);
        }
    }

    #[test]
    fn test_node_plan_carries_cloud_config_file_and_annotations() {
        let mut config = ClusterConfig::default();
        config.cloud_provider.name = "openstack".to_string();
        config.cloud_provider.config = "[Global]\nauth-url=http://keystone".to_string();
        let inventory = vec![Host {
            address: "1.2.3.4".to_string(),
            internal_address: "10.0.0.4".to_string(),
            is_worker: true,
            ..Default::default()
        }];

        let compiler = PlanCompiler::new(config, &inventory);
        let plan = compiler.build_node_plan(&compiler.hosts()[0]);

        assert_eq!(plan.files.len(), 1);
        assert_eq!(plan.files[0].name, CLOUD_CONFIG_PATH);
        let decoded = BASE64.decode(&plan.files[0].contents).unwrap();
        assert!(String::from_utf8(decoded).unwrap().contains("keystone"));

        assert_eq!(plan.annotations[EXTERNAL_ADDRESS_ANNOTATION], "1.2.3.4");
        assert_eq!(plan.annotations[INTERNAL_ADDRESS_ANNOTATION], "10.0.0.4");
    }

    #[test]
    fn test_compile_is_deterministic() {
        let inventory = vec![
            host("10.0.0.1", true, true, false),
            host("10.0.0.2", false, false, true),
        ];
        let a = compiler(&inventory).generate_plan();
        let b = compiler(&inventory).generate_plan();

        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }
}
