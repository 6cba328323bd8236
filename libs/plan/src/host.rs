//! Host inventory entries and host-derived path logic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operating systems whose root filesystem is read-only; managed state
/// is rooted under [`IMMUTABLE_OS_PREFIX`] on these hosts.
const IMMUTABLE_OS_MARKERS: &[&str] = &["RancherOS", "CoreOS"];

const IMMUTABLE_OS_PREFIX: &str = "/opt/helmsman";

/// One entry of the cluster's host inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Externally reachable address.
    pub address: String,

    /// Address other cluster members use to reach this host. Equals
    /// `address` unless the host sits behind NAT.
    #[serde(default)]
    pub internal_address: String,

    /// Node name override registered with the API server.
    #[serde(default)]
    pub hostname_override: String,

    #[serde(default)]
    pub is_etcd: bool,

    #[serde(default)]
    pub is_control: bool,

    #[serde(default)]
    pub is_worker: bool,

    /// Set once this host's etcd member has joined and is serving.
    #[serde(default)]
    pub etcd_ready: bool,

    /// Whether this host was previously a member of the etcd cluster;
    /// selects the "existing" bootstrap state on rejoin.
    #[serde(default)]
    pub existing_etcd_cluster: bool,

    #[serde(default)]
    pub runtime_info: RuntimeInfo,

    /// Labels to attach to the compiled node plan.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Runtime facts discovered from the host's container runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    /// Container runtime root directory (bind-mounted into the kubelet).
    #[serde(default)]
    pub root_dir: String,

    /// Host operating system string as reported by the runtime.
    #[serde(default)]
    pub operating_system: String,
}

impl Host {
    /// The address peers should dial, preferring the internal one.
    pub fn dial_address(&self) -> &str {
        if self.internal_address.is_empty() {
            &self.address
        } else {
            &self.internal_address
        }
    }
}

/// Deduplicate hosts by address, preserving first occurrence. Address
/// comparison is ASCII case-insensitive.
pub fn unique_hosts(hosts: &[Host]) -> Vec<Host> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for host in hosts {
        let key = host.address.to_ascii_lowercase();
        if !seen.contains(&key) {
            seen.push(key);
            out.push(host.clone());
        }
    }
    out
}

/// Root prefix for managed state on a host. Hosts running a read-only
/// OS force the immutable prefix regardless of configuration.
pub fn prefix_path(operating_system: &str, configured: &str) -> String {
    if IMMUTABLE_OS_MARKERS
        .iter()
        .any(|marker| operating_system.contains(marker))
    {
        return IMMUTABLE_OS_PREFIX.to_string();
    }
    if configured.is_empty() {
        "/".to_string()
    } else {
        configured.to_string()
    }
}

/// Join an absolute in-container path under a host prefix.
pub fn join_prefix(prefix: &str, path: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        path.to_string()
    } else {
        format!("{trimmed}{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(address: &str) -> Host {
        Host {
            address: address.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_unique_hosts_preserves_first_occurrence() {
        let hosts = vec![host("10.0.0.1"), host("10.0.0.2"), host("10.0.0.1")];
        let unique = unique_hosts(&hosts);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].address, "10.0.0.1");
        assert_eq!(unique[1].address, "10.0.0.2");
    }

    #[test]
    fn test_unique_hosts_case_insensitive() {
        let hosts = vec![host("Node-A.example.com"), host("node-a.example.com")];
        assert_eq!(unique_hosts(&hosts).len(), 1);
    }

    #[test]
    fn test_prefix_path_immutable_os_wins() {
        assert_eq!(prefix_path("RancherOS v1.3", "/custom"), "/opt/helmsman");
        assert_eq!(prefix_path("Ubuntu 18.04", "/custom"), "/custom");
        assert_eq!(prefix_path("Ubuntu 18.04", ""), "/");
    }

    #[test]
    fn test_join_prefix() {
        assert_eq!(join_prefix("/", "/etc/kubernetes"), "/etc/kubernetes");
        assert_eq!(
            join_prefix("/opt/helmsman", "/etc/kubernetes"),
            "/opt/helmsman/etc/kubernetes"
        );
    }

    #[test]
    fn test_dial_address_prefers_internal() {
        let mut h = host("1.2.3.4");
        assert_eq!(h.dial_address(), "1.2.3.4");
        h.internal_address = "10.0.0.1".to_string();
        assert_eq!(h.dial_address(), "10.0.0.1");
    }

    proptest::proptest! {
        #[test]
        fn unique_hosts_is_idempotent_and_collision_free(
            addresses in proptest::collection::vec("[a-zA-Z0-9.]{1,12}", 0..8),
        ) {
            let hosts: Vec<Host> = addresses.iter().map(|a| host(a)).collect();
            let once = unique_hosts(&hosts);
            let twice = unique_hosts(&once);
            proptest::prop_assert_eq!(&once, &twice);

            let mut keys: Vec<String> =
                once.iter().map(|h| h.address.to_ascii_lowercase()).collect();
            keys.sort();
            keys.dedup();
            proptest::prop_assert_eq!(keys.len(), once.len());
        }
    }
}
