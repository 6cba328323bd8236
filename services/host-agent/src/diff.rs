//! Field-by-field comparison of a desired spec against a running
//! container.
//!
//! The comparator decides whether a container must be replaced. It is
//! deliberately asymmetric: desired command, args, env, modes, and
//! labels left unset inherit whatever the container has, and defaults
//! baked into the image (env, labels) never count as drift. Mounts
//! (binds, volumes_from) are exact. Name, health check, and restart
//! policy are agent-side concerns that the engine does not materialize
//! in the container, so they are exempt.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use helmsman_plan::ProcessSpec;

use crate::runtime::{ContainerDetails, ImageDetails};

/// True when the container no longer matches the spec and must be
/// recreated.
pub fn spec_changed(
    desired: &ProcessSpec,
    observed: &ContainerDetails,
    image: &ImageDetails,
) -> bool {
    let mut changed = false;

    if desired.image != observed.image {
        field_changed("image", &desired.image, &observed.image);
        changed = true;
    }

    // Command order is not significant; the engine may report
    // entrypoint arguments in a different order than submitted. Args
    // are compared as given.
    if !desired.command.is_empty() && !set_eq(&desired.command, &observed.command) {
        field_changed("command", &desired.command, &observed.command);
        changed = true;
    }
    if !desired.args.is_empty() && desired.args != observed.args {
        field_changed("args", &desired.args, &observed.args);
        changed = true;
    }

    // The container's env is the submitted env plus image defaults.
    let mut expected_env = desired.env.clone();
    expected_env.extend(image.env.iter().cloned());
    if !set_eq(&expected_env, &observed.env) {
        field_changed("env", &expected_env, &observed.env);
        changed = true;
    }

    // Binds and volumes_from are exact: an empty desired list means no
    // mounts, and a duplicated or reordered entry is drift.
    if desired.binds != observed.binds {
        field_changed("binds", &desired.binds, &observed.binds);
        changed = true;
    }
    if desired.volumes_from != observed.volumes_from {
        field_changed("volumes_from", &desired.volumes_from, &observed.volumes_from);
        changed = true;
    }

    if !desired.network_mode.is_empty() && desired.network_mode != observed.network_mode {
        field_changed("network_mode", &desired.network_mode, &observed.network_mode);
        changed = true;
    }
    if !desired.pid_mode.is_empty() && desired.pid_mode != observed.pid_mode {
        field_changed("pid_mode", &desired.pid_mode, &observed.pid_mode);
        changed = true;
    }
    if desired.privileged != observed.privileged {
        field_changed("privileged", &desired.privileged, &observed.privileged);
        changed = true;
    }

    // The container's labels are the submitted labels merged over image
    // defaults (submitted values win on collision). An empty desired
    // map inherits whatever the container carries.
    if !desired.labels.is_empty() {
        let mut expected_labels: BTreeMap<String, String> = image.labels.clone();
        expected_labels.extend(desired.labels.clone());
        if expected_labels != observed.labels {
            field_changed("labels", &expected_labels, &observed.labels);
            changed = true;
        }
    }

    changed
}

fn field_changed<T: std::fmt::Debug>(field: &str, desired: &T, observed: &T) {
    debug!(field, desired = ?desired, observed = ?observed, "Spec field differs");
}

fn set_eq(a: &[String], b: &[String]) -> bool {
    let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_plan::HealthCheck;

    fn desired() -> ProcessSpec {
        ProcessSpec {
            name: "kubelet".to_string(),
            image: "k:v1".to_string(),
            command: vec!["/entry".to_string(), "kubelet".to_string()],
            env: vec!["A=1".to_string()],
            binds: vec!["/etc:/etc".to_string()],
            network_mode: "host".to_string(),
            privileged: true,
            labels: BTreeMap::from([("name".to_string(), "kubelet".to_string())]),
            ..Default::default()
        }
    }

    fn observed_from(spec: &ProcessSpec) -> ContainerDetails {
        ContainerDetails {
            image: spec.image.clone(),
            command: spec.command.clone(),
            args: spec.args.clone(),
            env: spec.env.clone(),
            binds: spec.binds.clone(),
            volumes_from: spec.volumes_from.clone(),
            network_mode: spec.network_mode.clone(),
            pid_mode: spec.pid_mode.clone(),
            privileged: spec.privileged,
            labels: spec.labels.clone(),
            ..Default::default()
        }
    }

    #[test]
    fn test_identical_container_is_unchanged() {
        let spec = desired();
        let observed = observed_from(&spec);
        assert!(!spec_changed(&spec, &observed, &ImageDetails::default()));
    }

    #[test]
    fn test_command_order_is_insignificant() {
        let spec = desired();
        let mut observed = observed_from(&spec);
        observed.command.reverse();
        assert!(!spec_changed(&spec, &observed, &ImageDetails::default()));
    }

    #[test]
    fn test_image_env_defaults_are_tolerated() {
        let spec = desired();
        let mut observed = observed_from(&spec);
        observed.env.push("PATH=/usr/bin".to_string());

        let image = ImageDetails {
            env: vec!["PATH=/usr/bin".to_string()],
            ..Default::default()
        };
        assert!(!spec_changed(&spec, &observed, &image));

        // The same extra env without an image default is drift.
        assert!(spec_changed(&spec, &observed, &ImageDetails::default()));
    }

    #[test]
    fn test_image_labels_are_merged_under_desired() {
        let spec = desired();
        let mut observed = observed_from(&spec);
        observed
            .labels
            .insert("maintainer".to_string(), "upstream".to_string());

        let image = ImageDetails {
            labels: BTreeMap::from([("maintainer".to_string(), "upstream".to_string())]),
            ..Default::default()
        };
        assert!(!spec_changed(&spec, &observed, &image));
    }

    #[test]
    fn test_desired_label_wins_over_image_label() {
        let mut spec = desired();
        spec.labels
            .insert("maintainer".to_string(), "helmsman".to_string());
        let observed = observed_from(&spec);

        // Image carries a colliding default, container has the desired
        // value: no drift.
        let image = ImageDetails {
            labels: BTreeMap::from([("maintainer".to_string(), "upstream".to_string())]),
            ..Default::default()
        };
        assert!(!spec_changed(&spec, &observed, &image));
    }

    #[test]
    fn test_unset_desired_fields_inherit() {
        let mut spec = desired();
        spec.command = Vec::new();
        spec.args = Vec::new();
        spec.network_mode = String::new();
        spec.labels = BTreeMap::new();

        let mut observed = observed_from(&desired());
        observed.network_mode = "bridge".to_string();
        observed.args = vec!["--leftover".to_string()];
        assert!(!spec_changed(&spec, &observed, &ImageDetails::default()));
    }

    #[test]
    fn test_duplicated_bind_is_drift() {
        let spec = desired();
        let mut observed = observed_from(&spec);
        observed.binds.push(observed.binds[0].clone());
        assert!(spec_changed(&spec, &observed, &ImageDetails::default()));
    }

    #[test]
    fn test_spurious_bind_on_bindless_spec_is_drift() {
        let mut spec = desired();
        spec.binds = Vec::new();
        let mut observed = observed_from(&spec);
        observed.binds = vec!["/host:/host".to_string()];
        assert!(spec_changed(&spec, &observed, &ImageDetails::default()));
    }

    #[test]
    fn test_args_compared_in_order() {
        let mut spec = desired();
        spec.args = vec!["--a=1".to_string(), "--b=2".to_string()];
        let mut observed = observed_from(&spec);
        observed.args.reverse();
        assert!(spec_changed(&spec, &observed, &ImageDetails::default()));
    }

    #[test]
    fn test_exempt_fields_never_force_replacement() {
        let mut spec = desired();
        spec.restart_policy = "always".to_string();
        spec.health_check = HealthCheck {
            url: "https://localhost:10250/healthz".to_string(),
        };
        spec.run_once = true;

        let observed = observed_from(&desired());
        assert!(!spec_changed(&spec, &observed, &ImageDetails::default()));
    }

    #[rstest::rstest]
    #[case::network_mode("network_mode")]
    #[case::pid_mode("pid_mode")]
    #[case::volumes_from("volumes_from")]
    fn test_hard_field_change_forces_replacement(#[case] field: &str) {
        let mut spec = desired();
        spec.pid_mode = "host".to_string();
        spec.volumes_from = vec!["service-sidecar".to_string()];
        let mut observed = observed_from(&spec);

        match field {
            "network_mode" => observed.network_mode = "bridge".to_string(),
            "pid_mode" => observed.pid_mode = String::new(),
            _ => observed.volumes_from = Vec::new(),
        }
        assert!(spec_changed(&spec, &observed, &ImageDetails::default()));
    }

    #[test]
    fn test_image_change_forces_replacement() {
        let mut spec = desired();
        let observed = observed_from(&spec);
        spec.image = "k:v2".to_string();
        assert!(spec_changed(&spec, &observed, &ImageDetails::default()));
    }

    #[test]
    fn test_privileged_change_forces_replacement() {
        let mut spec = desired();
        let observed = observed_from(&spec);
        spec.privileged = false;
        assert!(spec_changed(&spec, &observed, &ImageDetails::default()));
    }
}
