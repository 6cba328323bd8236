//! Process spec builders, one per control-plane role.
//!
//! Each builder seeds a flag map with role defaults, then applies in
//! order: version-specific option overrides, cloud-provider flags, and
//! user extra-args (which replace colliding keys). Flag maps are
//! `BTreeMap`s, so the rendered command line is always in sorted key
//! order and recompiles are byte-identical.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::compiler::{
    PlanCompiler, API_SERVER_PORT, API_SERVER_PROCESS, CONTROLLER_PORT, CONTROLLER_PROCESS,
    CONTROL_PROXY_PROCESS, ETCD_CLIENT_PORT, ETCD_PEER_PORT, ETCD_PROCESS, KUBELET_PORT,
    KUBELET_PROCESS, KUBE_PROXY_PORT, KUBE_PROXY_PROCESS, SCHEDULER_PORT, SCHEDULER_PROCESS,
    SIDECAR_PROCESS,
};
use crate::config::{
    CloudProvider, VersionOptions, CLOUD_CONFIG_PATH, ENV_CREDENTIALED_PROVIDER,
};
use crate::host::{join_prefix, Host};
use crate::pki;
use crate::process::{HealthCheck, ProcessSpec, CLOUD_CONFIG_CHECKSUM_ENV, PROCESS_NAME_LABEL};

/// Key prefix within etcd used by the API server.
const ETCD_PATH_PREFIX: &str = "/registry";

/// etcd data directory inside the container.
const ETCD_DATA_DIR: &str = "/var/lib/etcd/data";

/// Env variable the control proxy reads its upstream list from.
pub const CONTROL_PROXY_ENDPOINTS_ENV: &str = "CONTROL_PROXY_ENDPOINTS";

/// Taint applied to hosts that are control-plane but not worker.
const CONTROL_ONLY_TAINT: &str = "node-role.kubernetes.io/controlplane=true:NoSchedule";

const DEFAULT_NODE_PORT_RANGE: &str = "30000-32767";

const RBAC_MODE: &str = "rbac";

/// Shared tools entrypoint inside the sidecar image; sidecar tags older
/// than [`TOOLS_ENTRYPOINT_CUTOVER`] ship it at the legacy path.
const DEFAULT_TOOLS_ENTRYPOINT: &str = "/opt/helmsman-tools/entrypoint.sh";
const LEGACY_TOOLS_ENTRYPOINT: &str = "/opt/helmsman/entrypoint.sh";
const TOOLS_ENTRYPOINT_CUTOVER: (u64, u64, u64) = (0, 1, 13);

impl PlanCompiler {
    pub fn build_api_server_process(&self, prefix: &str) -> ProcessSpec {
        let service = &self.config.services.kube_api;

        // External etcd redirects the client endpoint and certs.
        let etcd = &self.config.services.etcd;
        let (etcd_servers, etcd_prefix, etcd_cert, etcd_key, etcd_ca) =
            if etcd.external_urls.is_empty() {
                (
                    etcd_connection_string(&self.etcd_hosts()),
                    ETCD_PATH_PREFIX.to_string(),
                    pki::cert_path(pki::NODE_CERT),
                    pki::key_path(pki::NODE_CERT),
                    pki::cert_path(pki::CA_CERT),
                )
            } else {
                (
                    etcd.external_urls.join(","),
                    etcd.path.clone(),
                    pki::cert_path(pki::ETCD_CLIENT_CERT),
                    pki::key_path(pki::ETCD_CLIENT_CERT),
                    pki::cert_path(pki::ETCD_CLIENT_CA_CERT),
                )
            };

        let node_port_range = if service.service_node_port_range.is_empty() {
            DEFAULT_NODE_PORT_RANGE.to_string()
        } else {
            service.service_node_port_range.clone()
        };

        let mut flags = BTreeMap::from(
            [
                ("insecure-bind-address", "127.0.0.1".to_string()),
                ("bind-address", "0.0.0.0".to_string()),
                ("insecure-port", "0".to_string()),
                ("secure-port", API_SERVER_PORT.to_string()),
                ("allow-privileged", "true".to_string()),
                (
                    "kubelet-preferred-address-types",
                    "InternalIP,ExternalIP,Hostname".to_string(),
                ),
                (
                    "service-cluster-ip-range",
                    self.config.service_cluster_ip_range.clone(),
                ),
                ("service-node-port-range", node_port_range),
                (
                    "admission-control",
                    "ServiceAccount,NamespaceLifecycle,LimitRanger,PersistentVolumeLabel,\
                     DefaultStorageClass,ResourceQuota,DefaultTolerationSeconds"
                        .to_string(),
                ),
                ("storage-backend", "etcd3".to_string()),
                ("client-ca-file", pki::cert_path(pki::CA_CERT)),
                ("tls-cert-file", pki::cert_path(pki::API_CERT)),
                ("tls-private-key-file", pki::key_path(pki::API_CERT)),
                ("kubelet-client-certificate", pki::cert_path(pki::API_CERT)),
                ("kubelet-client-key", pki::key_path(pki::API_CERT)),
                ("service-account-key-file", pki::key_path(pki::API_CERT)),
                ("etcd-cafile", etcd_ca),
                ("etcd-certfile", etcd_cert),
                ("etcd-keyfile", etcd_key),
                ("etcd-servers", etcd_servers),
                ("etcd-prefix", etcd_prefix),
                (
                    "requestheader-client-ca-file",
                    pki::cert_path(pki::REQUEST_HEADER_CA_CERT),
                ),
                (
                    "requestheader-allowed-names",
                    pki::API_PROXY_CLIENT_CERT.to_string(),
                ),
                (
                    "proxy-client-cert-file",
                    pki::cert_path(pki::API_PROXY_CLIENT_CERT),
                ),
                (
                    "proxy-client-key-file",
                    pki::key_path(pki::API_PROXY_CLIENT_CERT),
                ),
                (
                    "requestheader-extra-headers-prefix",
                    "X-Remote-Extra-".to_string(),
                ),
                ("requestheader-group-headers", "X-Remote-Group".to_string()),
                ("requestheader-username-headers", "X-Remote-User".to_string()),
            ]
            .map(|(k, v)| (k.to_string(), v)),
        );

        apply_options(&mut flags, &self.version_options().kube_api);

        // Only this major version needs an explicit apiserver count.
        if self.effective_major_version() == "v1.8" {
            flags.insert(
                "apiserver-count".to_string(),
                self.control_hosts().len().to_string(),
            );
        }
        if self.config.authorization_mode == RBAC_MODE {
            flags.insert("authorization-mode".to_string(), "Node,RBAC".to_string());
        }
        if service.pod_security_policy {
            flags.insert(
                "runtime-config".to_string(),
                "extensions/v1beta1/podsecuritypolicy=true".to_string(),
            );
            if let Some(admission) = flags.get_mut("admission-control") {
                admission.push_str(",PodSecurityPolicy");
            }
        }

        self.apply_cloud_provider_flags(&mut flags);
        apply_options(&mut flags, &service.extra_args);

        let mut command = vec![self.tools_entrypoint(), "kube-apiserver".to_string()];
        command.extend(render_flags(&flags));

        let mut env = service.extra_env.clone();
        self.append_cloud_checksum_env(&mut env);

        let mut binds = vec![etc_kubernetes_bind(prefix)];
        binds.extend(service.extra_binds.iter().cloned());

        let image = self.component_image(&service.image);
        ProcessSpec {
            name: API_SERVER_PROCESS.to_string(),
            command,
            env: dedup_first(env),
            binds: dedup_first(binds),
            volumes_from: vec![SIDECAR_PROCESS.to_string()],
            network_mode: "host".to_string(),
            restart_policy: "always".to_string(),
            health_check: HealthCheck {
                url: health_check_url(true, API_SERVER_PORT),
            },
            registry_auth: self.registry_auth_for(&image),
            labels: process_labels(API_SERVER_PROCESS),
            image,
            ..Default::default()
        }
    }

    pub fn build_controller_manager_process(&self, prefix: &str) -> ProcessSpec {
        let service = &self.config.services.kube_controller;

        let mut flags = BTreeMap::from(
            [
                ("address", "0.0.0.0".to_string()),
                ("allow-untagged-cloud", "true".to_string()),
                ("configure-cloud-routes", "false".to_string()),
                ("leader-elect", "true".to_string()),
                ("kubeconfig", pki::kubeconfig_path(pki::CONTROLLER_CERT)),
                ("enable-hostpath-provisioner", "false".to_string()),
                ("node-monitor-grace-period", "40s".to_string()),
                ("pod-eviction-timeout", "5m0s".to_string()),
                ("v", "2".to_string()),
                ("allocate-node-cidrs", "true".to_string()),
                ("cluster-cidr", self.config.cluster_cidr.clone()),
                (
                    "service-cluster-ip-range",
                    self.config.service_cluster_ip_range.clone(),
                ),
                (
                    "service-account-private-key-file",
                    pki::key_path(pki::API_CERT),
                ),
                ("root-ca-file", pki::cert_path(pki::CA_CERT)),
            ]
            .map(|(k, v)| (k.to_string(), v)),
        );

        apply_options(&mut flags, &self.version_options().kube_controller);
        self.apply_cloud_provider_flags(&mut flags);
        apply_options(&mut flags, &service.extra_args);

        let mut command = vec![
            self.tools_entrypoint(),
            "kube-controller-manager".to_string(),
        ];
        command.extend(render_flags(&flags));

        let mut args = Vec::new();
        if self.config.authorization_mode == RBAC_MODE {
            args.push("--use-service-account-credentials=true".to_string());
        }

        let mut env = service.extra_env.clone();
        self.append_cloud_checksum_env(&mut env);

        let mut binds = vec![etc_kubernetes_bind(prefix)];
        binds.extend(service.extra_binds.iter().cloned());

        let image = self.component_image(&service.image);
        ProcessSpec {
            name: CONTROLLER_PROCESS.to_string(),
            command,
            args,
            env: dedup_first(env),
            binds: dedup_first(binds),
            volumes_from: vec![SIDECAR_PROCESS.to_string()],
            network_mode: "host".to_string(),
            restart_policy: "always".to_string(),
            health_check: HealthCheck {
                url: health_check_url(false, CONTROLLER_PORT),
            },
            registry_auth: self.registry_auth_for(&image),
            labels: process_labels(CONTROLLER_PROCESS),
            image,
            ..Default::default()
        }
    }

    pub fn build_scheduler_process(&self, prefix: &str) -> ProcessSpec {
        let service = &self.config.services.scheduler;

        let mut flags = BTreeMap::from(
            [
                ("leader-elect", "true".to_string()),
                ("v", "2".to_string()),
                ("address", "0.0.0.0".to_string()),
                ("kubeconfig", pki::kubeconfig_path(pki::SCHEDULER_CERT)),
            ]
            .map(|(k, v)| (k.to_string(), v)),
        );

        apply_options(&mut flags, &self.version_options().scheduler);
        apply_options(&mut flags, &service.extra_args);

        let mut command = vec![self.tools_entrypoint(), "kube-scheduler".to_string()];
        command.extend(render_flags(&flags));

        let mut binds = vec![etc_kubernetes_bind(prefix)];
        binds.extend(service.extra_binds.iter().cloned());

        let image = self.component_image(&service.image);
        ProcessSpec {
            name: SCHEDULER_PROCESS.to_string(),
            command,
            env: dedup_first(service.extra_env.clone()),
            binds: dedup_first(binds),
            volumes_from: vec![SIDECAR_PROCESS.to_string()],
            network_mode: "host".to_string(),
            restart_policy: "always".to_string(),
            health_check: HealthCheck {
                url: health_check_url(false, SCHEDULER_PORT),
            },
            registry_auth: self.registry_auth_for(&image),
            labels: process_labels(SCHEDULER_PROCESS),
            image,
            ..Default::default()
        }
    }

    pub fn build_kubelet_process(&self, host: &Host, prefix: &str) -> ProcessSpec {
        let service = &self.config.services.kubelet;

        let mut flags = BTreeMap::from(
            [
                ("v", "2".to_string()),
                ("address", "0.0.0.0".to_string()),
                ("cadvisor-port", "0".to_string()),
                ("read-only-port", "0".to_string()),
                ("cluster-domain", self.config.cluster_domain.clone()),
                (
                    "pod-infra-container-image",
                    service.infra_container_image.clone(),
                ),
                ("cgroups-per-qos", "True".to_string()),
                ("enforce-node-allocatable", String::new()),
                ("hostname-override", host.hostname_override.clone()),
                ("cluster-dns", self.config.cluster_dns_server.clone()),
                ("network-plugin", "cni".to_string()),
                ("cni-conf-dir", "/etc/cni/net.d".to_string()),
                ("cni-bin-dir", "/opt/cni/bin".to_string()),
                ("resolv-conf", "/etc/resolv.conf".to_string()),
                ("allow-privileged", "true".to_string()),
                ("kubeconfig", pki::kubeconfig_path(pki::NODE_CERT)),
                ("client-ca-file", pki::cert_path(pki::CA_CERT)),
                ("anonymous-auth", "false".to_string()),
                (
                    "volume-plugin-dir",
                    "/var/lib/kubelet/volumeplugins".to_string(),
                ),
                ("fail-swap-on", service.fail_swap_on.to_string()),
                ("root-dir", join_prefix(prefix, "/var/lib/kubelet")),
                ("authentication-token-webhook", "true".to_string()),
            ]
            .map(|(k, v)| (k.to_string(), v)),
        );

        if host.is_control && !host.is_worker {
            flags.insert(
                "register-with-taints".to_string(),
                CONTROL_ONLY_TAINT.to_string(),
            );
        }
        if host.address != host.internal_address {
            flags.insert("node-ip".to_string(), host.internal_address.clone());
        }

        apply_options(&mut flags, &self.version_options().kubelet);
        self.apply_cloud_provider_flags(&mut flags);
        apply_options(&mut flags, &service.extra_args);

        let mut command = vec![self.tools_entrypoint(), "kubelet".to_string()];
        command.extend(render_flags(&flags));

        let mut env = service.extra_env.clone();
        self.append_cloud_checksum_env(&mut env);

        let kubelet_dir = join_prefix(prefix, "/var/lib/kubelet");
        let mut binds = vec![
            etc_kubernetes_bind(prefix),
            "/etc/cni:/etc/cni:rw,z".to_string(),
            "/opt/cni:/opt/cni:rw,z".to_string(),
            format!("{}:/var/lib/cni:z", join_prefix(prefix, "/var/lib/cni")),
            "/etc/resolv.conf:/etc/resolv.conf".to_string(),
            "/sys:/sys:rprivate".to_string(),
            format!("{kubelet_dir}:{kubelet_dir}:shared,z"),
            "/var/run:/var/run:rw,rprivate".to_string(),
            "/run:/run:rprivate".to_string(),
            format!("{}:/etc/ceph", join_prefix(prefix, "/etc/ceph")),
            "/dev:/host/dev:rprivate".to_string(),
            "/var/log/containers:/var/log/containers:z".to_string(),
            "/var/log/pods:/var/log/pods:z".to_string(),
            "/usr:/host/usr:ro".to_string(),
            "/etc:/host/etc:ro".to_string(),
        ];
        let runtime_root = &host.runtime_info.root_dir;
        if !runtime_root.is_empty() {
            binds.push(format!("{runtime_root}:{runtime_root}:rw,rslave,z"));
        }
        // Keep flex volume plugins reachable at the unprefixed path.
        if kubelet_dir != "/var/lib/kubelet" {
            binds.push(
                "/var/lib/kubelet/volumeplugins:/var/lib/kubelet/volumeplugins:shared,z"
                    .to_string(),
            );
        }
        binds.extend(service.extra_binds.iter().cloned());

        let image = self.component_image(&service.image);
        ProcessSpec {
            name: KUBELET_PROCESS.to_string(),
            command,
            env: dedup_first(env),
            binds: dedup_first(binds),
            volumes_from: vec![SIDECAR_PROCESS.to_string()],
            network_mode: "host".to_string(),
            pid_mode: "host".to_string(),
            privileged: true,
            restart_policy: "always".to_string(),
            health_check: HealthCheck {
                url: health_check_url(true, KUBELET_PORT),
            },
            registry_auth: self.registry_auth_for(&image),
            labels: process_labels(KUBELET_PROCESS),
            image,
            ..Default::default()
        }
    }

    pub fn build_kube_proxy_process(&self, host: &Host, prefix: &str) -> ProcessSpec {
        let service = &self.config.services.kubeproxy;

        let mut flags = BTreeMap::from(
            [
                ("cluster-cidr", self.config.cluster_cidr.clone()),
                ("v", "2".to_string()),
                ("healthz-bind-address", "0.0.0.0".to_string()),
                ("hostname-override", host.hostname_override.clone()),
                ("kubeconfig", pki::kubeconfig_path(pki::PROXY_CERT)),
            ]
            .map(|(k, v)| (k.to_string(), v)),
        );

        apply_options(&mut flags, &self.version_options().kubeproxy);
        apply_options(&mut flags, &service.extra_args);

        let mut command = vec![self.tools_entrypoint(), "kube-proxy".to_string()];
        command.extend(render_flags(&flags));

        let mut binds = vec![etc_kubernetes_bind(prefix)];
        binds.extend(service.extra_binds.iter().cloned());

        let image = self.component_image(&service.image);
        ProcessSpec {
            name: KUBE_PROXY_PROCESS.to_string(),
            command,
            env: dedup_first(service.extra_env.clone()),
            binds: dedup_first(binds),
            volumes_from: vec![SIDECAR_PROCESS.to_string()],
            network_mode: "host".to_string(),
            pid_mode: "host".to_string(),
            privileged: true,
            restart_policy: "always".to_string(),
            health_check: HealthCheck {
                url: health_check_url(false, KUBE_PROXY_PORT),
            },
            registry_auth: self.registry_auth_for(&image),
            labels: process_labels(KUBE_PROXY_PROCESS),
            image,
            ..Default::default()
        }
    }

    /// Proxy run on non-control hosts so local components can reach the
    /// API servers. The upstream list rides in both env and args so any
    /// control-plane membership change is diff-significant and forces a
    /// container update.
    pub fn build_control_proxy_process(&self) -> ProcessSpec {
        let upstreams: Vec<&str> = self
            .control_hosts()
            .iter()
            .map(|h| h.dial_address())
            .collect();
        let env = vec![format!(
            "{CONTROL_PROXY_ENDPOINTS_ENV}={}",
            upstreams.join(",")
        )];

        let image = self.config.system_images.control_proxy.clone();
        ProcessSpec {
            name: CONTROL_PROXY_PROCESS.to_string(),
            command: vec!["control-proxy".to_string()],
            args: env.clone(),
            env,
            network_mode: "host".to_string(),
            restart_policy: "always".to_string(),
            registry_auth: self.registry_auth_for(&image),
            labels: process_labels(CONTROL_PROXY_PROCESS),
            image,
            ..Default::default()
        }
    }

    pub fn build_sidecar_process(&self) -> ProcessSpec {
        let image = self.config.system_images.sidecar.clone();
        ProcessSpec {
            name: SIDECAR_PROCESS.to_string(),
            network_mode: "none".to_string(),
            registry_auth: self.registry_auth_for(&image),
            labels: process_labels(SIDECAR_PROCESS),
            image,
            ..Default::default()
        }
    }

    pub fn build_etcd_process(&self, host: &Host, prefix: &str) -> ProcessSpec {
        let service = &self.config.services.etcd;
        let member_cert = pki::etcd_cert_name(&host.internal_address);

        // Peer URLs come from the ready members; before any member is
        // ready, bootstrap from the full configured etcd set.
        let ready = self.ready_etcd_hosts();
        let initial_cluster = if ready.is_empty() {
            etcd_initial_cluster(&self.etcd_hosts())
        } else {
            etcd_initial_cluster(&ready)
        };

        let cluster_state = if host.existing_etcd_cluster {
            "existing"
        } else {
            "new"
        };

        // A host with a DNATed public address cannot bind it; fall back
        // to the wildcard address when no distinct internal address is
        // configured.
        let listen_address = if host.address == host.internal_address {
            "0.0.0.0"
        } else {
            host.internal_address.as_str()
        };

        let mut flags = BTreeMap::from(
            [
                ("name", format!("etcd-{}", host.hostname_override)),
                ("data-dir", ETCD_DATA_DIR.to_string()),
                (
                    "advertise-client-urls",
                    format!("https://{}:{ETCD_CLIENT_PORT}", host.internal_address),
                ),
                (
                    "listen-client-urls",
                    format!("https://{listen_address}:{ETCD_CLIENT_PORT}"),
                ),
                (
                    "initial-advertise-peer-urls",
                    format!("https://{}:{ETCD_PEER_PORT}", host.internal_address),
                ),
                (
                    "listen-peer-urls",
                    format!("https://{listen_address}:{ETCD_PEER_PORT}"),
                ),
                ("initial-cluster-token", "etcd-cluster-1".to_string()),
                ("initial-cluster", initial_cluster),
                ("initial-cluster-state", cluster_state.to_string()),
                ("trusted-ca-file", pki::cert_path(pki::CA_CERT)),
                ("peer-trusted-ca-file", pki::cert_path(pki::CA_CERT)),
                ("cert-file", pki::cert_path(&member_cert)),
                ("key-file", pki::key_path(&member_cert)),
                ("peer-cert-file", pki::cert_path(&member_cert)),
                ("peer-key-file", pki::key_path(&member_cert)),
            ]
            .map(|(k, v)| (k.to_string(), v)),
        );

        apply_options(&mut flags, &self.version_options().etcd);
        apply_options(&mut flags, &service.extra_args);

        // etcd runs from the image entrypoint; the binary and its flags
        // ride in args.
        let mut args = vec![
            "/usr/local/bin/etcd".to_string(),
            "--peer-client-cert-auth".to_string(),
            "--client-cert-auth".to_string(),
        ];
        args.extend(render_flags(&flags));

        let mut env = vec![
            "ETCDCTL_API=3".to_string(),
            format!("ETCDCTL_ENDPOINT=https://{listen_address}:{ETCD_CLIENT_PORT}"),
            format!("ETCDCTL_CACERT={}", pki::cert_path(pki::CA_CERT)),
            format!("ETCDCTL_CERT={}", pki::cert_path(&member_cert)),
            format!("ETCDCTL_KEY={}", pki::key_path(&member_cert)),
        ];
        env.extend(service.extra_env.iter().cloned());

        let mut binds = vec![
            format!(
                "{}:{ETCD_DATA_DIR}:z",
                join_prefix(prefix, "/var/lib/etcd")
            ),
            etc_kubernetes_bind(prefix),
        ];
        binds.extend(service.extra_binds.iter().cloned());

        let image = self.component_image(&service.image);
        ProcessSpec {
            name: ETCD_PROCESS.to_string(),
            args,
            env: dedup_first(env),
            binds: dedup_first(binds),
            network_mode: "host".to_string(),
            restart_policy: "always".to_string(),
            health_check: HealthCheck {
                url: format!(
                    "https://{}:{ETCD_CLIENT_PORT}/health",
                    host.internal_address
                ),
            },
            registry_auth: self.registry_auth_for(&image),
            labels: process_labels(ETCD_PROCESS),
            image,
            ..Default::default()
        }
    }

    /// Version options for the cluster's effective major version; an
    /// unknown version resolves to the empty option set.
    pub(crate) fn version_options(&self) -> VersionOptions {
        let major = self.effective_major_version();
        match self.config.version_options.get(&major) {
            Some(options) => options.clone(),
            None => {
                debug!(version = %major, "No version-specific options, using defaults");
                VersionOptions::default()
            }
        }
    }

    /// Major version used for option lookup: the configured Kubernetes
    /// version's `vX.Y`, overridden by the system image tag's `vX.Y`
    /// when that is present and differs.
    pub(crate) fn effective_major_version(&self) -> String {
        let cluster_major = major_version(&self.config.kubernetes_version);
        let image_major = image_tag(&self.config.system_images.kubernetes)
            .map(major_version)
            .unwrap_or_default();

        if !image_major.is_empty() && image_major != cluster_major {
            image_major
        } else {
            cluster_major
        }
    }

    fn tools_entrypoint(&self) -> String {
        let entrypoint = image_tag(&self.config.system_images.sidecar)
            .and_then(parse_version_triple)
            .map(|version| {
                if version < TOOLS_ENTRYPOINT_CUTOVER {
                    LEGACY_TOOLS_ENTRYPOINT
                } else {
                    DEFAULT_TOOLS_ENTRYPOINT
                }
            })
            .unwrap_or(DEFAULT_TOOLS_ENTRYPOINT);
        entrypoint.to_string()
    }

    fn component_image(&self, configured: &str) -> String {
        if configured.is_empty() {
            self.config.system_images.kubernetes.clone()
        } else {
            configured.to_string()
        }
    }

    fn apply_cloud_provider_flags(&self, flags: &mut BTreeMap<String, String>) {
        let provider = &self.config.cloud_provider;
        flags.insert("cloud-provider".to_string(), provider.name.clone());
        // Providers credentialed via IAM/env take no config file.
        if !provider.name.is_empty() && provider.name != ENV_CREDENTIALED_PROVIDER {
            flags.insert("cloud-config".to_string(), CLOUD_CONFIG_PATH.to_string());
        }
    }

    /// The checksum env entry exists so the reconciler's env diff picks
    /// up cloud-config changes that alter no command-line flag.
    fn append_cloud_checksum_env(&self, env: &mut Vec<String>) {
        if !self.config.cloud_provider.name.is_empty() {
            env.push(format!(
                "{CLOUD_CONFIG_CHECKSUM_ENV}={}",
                cloud_config_checksum(&self.config.cloud_provider)
            ));
        }
    }

    /// Base64 auth blob for the registry serving `image`, empty when no
    /// credentials are configured for it.
    pub(crate) fn registry_auth_for(&self, image: &str) -> String {
        let registry = registry_host(image);
        match self.config.private_registries.get(registry) {
            Some(credential) => {
                let auth = serde_json::json!({
                    "username": credential.username,
                    "password": credential.password,
                    "serveraddress": registry,
                });
                BASE64.encode(auth.to_string())
            }
            None => String::new(),
        }
    }
}

/// Render a flag map as `--key=value` strings. The map is ordered, so
/// output order is stable across compiles.
fn render_flags(flags: &BTreeMap<String, String>) -> Vec<String> {
    flags
        .iter()
        .map(|(key, value)| format!("--{key}={value}"))
        .collect()
}

fn apply_options(flags: &mut BTreeMap<String, String>, options: &BTreeMap<String, String>) {
    for (key, value) in options {
        flags.insert(key.clone(), value.clone());
    }
}

/// Deduplicate preserving first occurrence.
fn dedup_first(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn process_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(PROCESS_NAME_LABEL.to_string(), name.to_string())])
}

fn etc_kubernetes_bind(prefix: &str) -> String {
    format!("{}:/etc/kubernetes:z", join_prefix(prefix, "/etc/kubernetes"))
}

fn health_check_url(secure: bool, port: u16) -> String {
    let scheme = if secure { "https" } else { "http" };
    format!("{scheme}://localhost:{port}/healthz")
}

fn etcd_connection_string(hosts: &[&Host]) -> String {
    hosts
        .iter()
        .map(|h| format!("https://{}:{ETCD_CLIENT_PORT}", h.dial_address()))
        .collect::<Vec<_>>()
        .join(",")
}

fn etcd_initial_cluster(hosts: &[&Host]) -> String {
    hosts
        .iter()
        .map(|h| {
            format!(
                "etcd-{}=https://{}:{ETCD_PEER_PORT}",
                h.hostname_override,
                h.dial_address()
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// `vX.Y` portion of a version tag, empty when the tag has fewer than
/// two segments.
fn major_version(tag: &str) -> String {
    let segments: Vec<&str> = tag.split('.').collect();
    if segments.len() < 2 {
        return String::new();
    }
    segments[..2].join(".")
}

/// Tag portion of an image reference. A colon inside the registry host
/// (port number) is not a tag separator.
fn image_tag(image: &str) -> Option<&str> {
    let tag = image.rsplit(':').next()?;
    if tag == image || tag.contains('/') {
        None
    } else {
        Some(tag)
    }
}

fn parse_version_triple(tag: &str) -> Option<(u64, u64, u64)> {
    let mut parts = tag.trim_start_matches('v').splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor, patch))
}

fn cloud_config_checksum(provider: &CloudProvider) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.name.as_bytes());
    hasher.update(b"\n");
    hasher.update(provider.config.as_bytes());
    hex::encode(hasher.finalize())
}

/// Registry host portion of an image reference. The first path segment
/// is a registry only when it looks like a host (dot, port, or
/// `localhost`); otherwise the image lives on the default registry.
fn registry_host(image: &str) -> &str {
    match image.split_once('/') {
        Some((first, _))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            first
        }
        _ => "index.docker.io",
    }
}
