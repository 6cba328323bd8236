//! Container runtime interface and in-memory implementation.
//!
//! The runtime interface abstracts the container engine operations the
//! reconciler needs: discovery by label, inspection, image pulls, and
//! container lifecycle. An in-memory implementation backs tests and
//! development.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use helmsman_plan::ProcessSpec;

/// Grace period a container gets to stop on restart before it is
/// killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("runtime error: {0}")]
    Engine(String),
}

/// One entry of a label-filtered container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,

    /// Creation ordinal; lower means created earlier.
    pub created: u64,

    pub labels: BTreeMap<String, String>,
}

/// Inspected state and configuration of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub running: bool,
    pub exit_code: i64,

    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub volumes_from: Vec<String>,
    pub network_mode: String,
    pub pid_mode: String,
    pub privileged: bool,
    pub labels: BTreeMap<String, String>,
}

/// Inspected defaults baked into an image. Containers inherit these, so
/// the comparator must tolerate them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDetails {
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// Container engine interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers (running or not) carrying the given label value.
    async fn list_containers(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<ContainerSummary>, RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError>;

    async fn inspect_image(&self, image: &str) -> Result<ImageDetails, RuntimeError>;

    /// Pull an image, authenticating with the registry when a non-empty
    /// auth blob is given.
    async fn pull_image(&self, image: &str, registry_auth: &str) -> Result<(), RuntimeError>;

    /// Create a container from the spec; fails with
    /// [`RuntimeError::ImageNotFound`] when the image is not present
    /// locally. Returns the new container's id.
    async fn create_container(&self, spec: &ProcessSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stop (with the given grace period) and start a container.
    async fn restart_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    /// Force-remove a container and its anonymous volumes.
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;
}

#[derive(Debug, Clone)]
struct StoredContainer {
    id: String,
    created: u64,
    running: bool,
    exit_code: i64,
    spec: ProcessSpec,
}

/// Counts of mutating runtime operations, for asserting convergence
/// cost in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub pulls: u64,
    pub creates: u64,
    pub starts: u64,
    pub restarts: u64,
    pub removes: u64,
}

impl OperationCounts {
    pub fn mutations(&self) -> u64 {
        self.pulls + self.creates + self.starts + self.restarts + self.removes
    }
}

#[derive(Default)]
struct MemoryState {
    containers: BTreeMap<String, StoredContainer>,
    /// Images present locally.
    images: BTreeMap<String, ImageDetails>,
    /// Images a pull can fetch.
    registry: BTreeMap<String, ImageDetails>,
    counts: OperationCounts,
    next_id: u64,
}

/// In-memory container engine for testing and development.
pub struct MemoryRuntime {
    state: Mutex<MemoryState>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Make an image available locally without a pull.
    pub async fn add_local_image(&self, image: &str, details: ImageDetails) {
        let mut state = self.state.lock().await;
        state.images.insert(image.to_string(), details);
    }

    /// Make an image pullable from the registry.
    pub async fn add_registry_image(&self, image: &str, details: ImageDetails) {
        let mut state = self.state.lock().await;
        state.registry.insert(image.to_string(), details);
    }

    /// Seed a pre-existing container as if a previous agent created it.
    /// Returns its id. Labels come from the spec.
    pub async fn seed_container(
        &self,
        spec: ProcessSpec,
        running: bool,
        exit_code: i64,
    ) -> String {
        let mut state = self.state.lock().await;
        let (id, created) = next_identity(&mut state);
        state.containers.insert(
            id.clone(),
            StoredContainer {
                id: id.clone(),
                created,
                running,
                exit_code,
                spec,
            },
        );
        id
    }

    pub async fn counts(&self) -> OperationCounts {
        self.state.lock().await.counts
    }

    pub async fn container_ids(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<_> = state.containers.values().cloned().collect();
        ids.sort_by_key(|c| c.created);
        ids.into_iter().map(|c| c.id).collect()
    }

    pub async fn is_running(&self, id: &str) -> bool {
        let state = self.state.lock().await;
        state.containers.get(id).map(|c| c.running).unwrap_or(false)
    }
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn next_identity(state: &mut MemoryState) -> (String, u64) {
    let ordinal = state.next_id;
    state.next_id += 1;
    (format!("ctr_{ordinal:016x}"), ordinal)
}

fn details_from(stored: &StoredContainer) -> ContainerDetails {
    ContainerDetails {
        id: stored.id.clone(),
        running: stored.running,
        exit_code: stored.exit_code,
        image: stored.spec.image.clone(),
        command: stored.spec.command.clone(),
        args: stored.spec.args.clone(),
        env: stored.spec.env.clone(),
        binds: stored.spec.binds.clone(),
        volumes_from: stored.spec.volumes_from.clone(),
        network_mode: stored.spec.network_mode.clone(),
        pid_mode: stored.spec.pid_mode.clone(),
        privileged: stored.spec.privileged,
        labels: stored.spec.labels.clone(),
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn list_containers(
        &self,
        label: &str,
        value: &str,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let state = self.state.lock().await;
        let mut matches: Vec<ContainerSummary> = state
            .containers
            .values()
            .filter(|c| c.spec.labels.get(label).map(String::as_str) == Some(value))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                created: c.created,
                labels: c.spec.labels.clone(),
            })
            .collect();
        matches.sort_by_key(|c| c.created);
        Ok(matches)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        let state = self.state.lock().await;
        state
            .containers
            .get(id)
            .map(details_from)
            .ok_or_else(|| RuntimeError::ContainerNotFound(id.to_string()))
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageDetails, RuntimeError> {
        let state = self.state.lock().await;
        state
            .images
            .get(image)
            .cloned()
            .ok_or_else(|| RuntimeError::ImageNotFound(image.to_string()))
    }

    async fn pull_image(&self, image: &str, registry_auth: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.counts.pulls += 1;
        debug!(image, authenticated = !registry_auth.is_empty(), "Pulling image");
        match state.registry.get(image).cloned() {
            Some(details) => {
                state.images.insert(image.to_string(), details);
                Ok(())
            }
            None => Err(RuntimeError::ImageNotFound(image.to_string())),
        }
    }

    async fn create_container(&self, spec: &ProcessSpec) -> Result<String, RuntimeError> {
        let mut state = self.state.lock().await;
        if !state.images.contains_key(&spec.image) {
            return Err(RuntimeError::ImageNotFound(spec.image.clone()));
        }
        state.counts.creates += 1;
        let (id, created) = next_identity(&mut state);
        info!(name = %spec.name, id = %id, image = %spec.image, "Created container");
        state.containers.insert(
            id.clone(),
            StoredContainer {
                id: id.clone(),
                created,
                running: false,
                exit_code: 0,
                spec: spec.clone(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.counts.starts += 1;
        match state.containers.get_mut(id) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(RuntimeError::ContainerNotFound(id.to_string())),
        }
    }

    async fn restart_container(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.counts.restarts += 1;
        match state.containers.get_mut(id) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(RuntimeError::ContainerNotFound(id.to_string())),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.counts.removes += 1;
        match state.containers.remove(id) {
            Some(removed) => {
                info!(name = %removed.spec.name, id, "Removed container");
                Ok(())
            }
            None => Err(RuntimeError::ContainerNotFound(id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_plan::PROCESS_NAME_LABEL;

    fn spec(name: &str, image: &str) -> ProcessSpec {
        ProcessSpec {
            name: name.to_string(),
            image: image.to_string(),
            labels: BTreeMap::from([(PROCESS_NAME_LABEL.to_string(), name.to_string())]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_requires_local_image() {
        let runtime = MemoryRuntime::new();
        let err = runtime.create_container(&spec("kubelet", "k:v1")).await;
        assert!(matches!(err, Err(RuntimeError::ImageNotFound(_))));

        runtime.add_local_image("k:v1", ImageDetails::default()).await;
        let id = runtime.create_container(&spec("kubelet", "k:v1")).await.unwrap();
        assert!(!runtime.is_running(&id).await);

        runtime.start_container(&id).await.unwrap();
        assert!(runtime.is_running(&id).await);
    }

    #[tokio::test]
    async fn test_pull_fetches_only_registry_images() {
        let runtime = MemoryRuntime::new();
        let err = runtime.pull_image("k:v1", "").await;
        assert!(matches!(err, Err(RuntimeError::ImageNotFound(_))));

        runtime.add_registry_image("k:v1", ImageDetails::default()).await;
        runtime.pull_image("k:v1", "").await.unwrap();
        runtime.inspect_image("k:v1").await.unwrap();
        assert_eq!(runtime.counts().await.pulls, 2);
    }

    #[tokio::test]
    async fn test_list_filters_by_label_in_creation_order() {
        let runtime = MemoryRuntime::new();
        runtime.seed_container(spec("etcd", "e:v3"), true, 0).await;
        let second = runtime.seed_container(spec("kubelet", "k:v1"), true, 0).await;
        runtime.seed_container(spec("kubelet", "k:v1"), false, 0).await;

        let matches = runtime
            .list_containers(PROCESS_NAME_LABEL, "kubelet")
            .await
            .unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, second);
        assert!(matches[0].created < matches[1].created);
    }
}
