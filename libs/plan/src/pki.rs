//! Certificate path conventions shared by the process builders.
//!
//! Certificates themselves are generated and delivered by an external
//! collaborator; the builders only need the on-host paths.

/// Directory all certificates and kubeconfigs live under, inside the
/// shared `/etc/kubernetes` bind mount.
pub const CERT_DIR: &str = "/etc/kubernetes/ssl";

pub const CA_CERT: &str = "kube-ca";
pub const API_CERT: &str = "kube-apiserver";
pub const NODE_CERT: &str = "kube-node";
pub const CONTROLLER_CERT: &str = "kube-controller-manager";
pub const SCHEDULER_CERT: &str = "kube-scheduler";
pub const PROXY_CERT: &str = "kube-proxy";
pub const REQUEST_HEADER_CA_CERT: &str = "kube-apiserver-requestheader-ca";
pub const API_PROXY_CLIENT_CERT: &str = "kube-apiserver-proxy-client";
pub const ETCD_CLIENT_CERT: &str = "kube-etcd-client";
pub const ETCD_CLIENT_CA_CERT: &str = "kube-etcd-client-ca";

pub fn cert_path(name: &str) -> String {
    format!("{CERT_DIR}/{name}.pem")
}

pub fn key_path(name: &str) -> String {
    format!("{CERT_DIR}/{name}-key.pem")
}

pub fn kubeconfig_path(name: &str) -> String {
    format!("{CERT_DIR}/kubecfg-{name}.yaml")
}

/// Per-member etcd certificate name, derived from the member's address.
pub fn etcd_cert_name(address: &str) -> String {
    format!("kube-etcd-{}", address.replace(['.', ':'], "-"))
}
