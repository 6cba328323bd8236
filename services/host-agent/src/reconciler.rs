//! Convergence of a host's containers to the desired process set.
//!
//! Each desired process converges independently: discover matching
//! containers by label, remove drifted ones, prune duplicates down to
//! the earliest surviving match, and start whatever should be running.
//! A pass touches the engine as little as possible; reconciling an
//! already-converged host performs no mutations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use helmsman_plan::{ProcessSpec, LEGACY_PROCESS_NAME_LABEL, PROCESS_NAME_LABEL};

use crate::runtime::{
    ContainerRuntime, ContainerSummary, ImageDetails, RuntimeError, DEFAULT_STOP_TIMEOUT,
};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("processes failed to converge: {}", .0.join(", "))]
    Processes(Vec<String>),
}

/// Per-pass convergence options.
#[derive(Debug, Clone, Copy)]
pub struct ConvergeOptions {
    /// Restart matching containers even when their spec is unchanged.
    pub force_restart: bool,

    /// Start containers that should be running. When false, convergence
    /// creates and prunes but leaves containers stopped.
    pub start: bool,
}

impl Default for ConvergeOptions {
    fn default() -> Self {
        Self {
            force_restart: false,
            start: true,
        }
    }
}

/// Converge every process of a plan. Processes converge concurrently
/// and independently; one failure does not stop the others.
pub async fn converge_plan(
    runtime: Arc<dyn ContainerRuntime>,
    processes: &BTreeMap<String, ProcessSpec>,
    options: ConvergeOptions,
) -> Result<(), ReconcileError> {
    let mut tasks = JoinSet::new();
    for (name, spec) in processes {
        let runtime = Arc::clone(&runtime);
        let name = name.clone();
        let spec = spec.clone();
        tasks.spawn(async move {
            let result = converge_process(runtime.as_ref(), &spec, options).await;
            (name, result)
        });
    }

    let mut failed = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((name, Err(e))) => {
                warn!(process = %name, error = %e, "Process failed to converge");
                failed.push(name);
            }
            Err(e) => {
                warn!(error = %e, "Convergence task panicked");
                failed.push("<panicked>".to_string());
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        failed.sort();
        Err(ReconcileError::Processes(failed))
    }
}

/// Converge one desired process. After a successful pass exactly zero
/// or one container remains for the process name.
pub async fn converge_process(
    runtime: &dyn ContainerRuntime,
    desired: &ProcessSpec,
    options: ConvergeOptions,
) -> Result<(), ReconcileError> {
    // Every managed container carries the name label; stamp it here so
    // a spec that omits it is still rediscovered on the next tick.
    let mut desired = desired.clone();
    let name = desired.name.clone();
    desired
        .labels
        .entry(PROCESS_NAME_LABEL.to_string())
        .or_insert(name);
    let desired = &desired;

    let discovered = discover(runtime, &desired.name).await?;

    let image = match runtime.inspect_image(&desired.image).await {
        Ok(details) => details,
        // A missing desired image means any existing container was
        // created from a different one; the comparator flags that on
        // its own.
        Err(RuntimeError::ImageNotFound(_)) => ImageDetails::default(),
        Err(e) => return Err(e.into()),
    };

    // Remove drifted containers; of the unchanged ones, the earliest
    // survives and the rest are duplicates.
    let mut survivor = None;
    for summary in &discovered {
        let observed = runtime.inspect_container(&summary.id).await?;
        if crate::diff::spec_changed(desired, &observed, &image) {
            info!(process = %desired.name, id = %summary.id, "Container drifted, removing");
            runtime.remove_container(&summary.id).await?;
        } else if survivor.is_none() {
            survivor = Some(observed);
        } else {
            warn!(
                process = %desired.name,
                id = %summary.id,
                "Removing duplicate container"
            );
            runtime.remove_container(&summary.id).await?;
        }
    }

    let Some(observed) = survivor else {
        debug!(process = %desired.name, "No matching container, creating");
        create_container(runtime, desired, options.start).await?;
        return Ok(());
    };

    if options.force_restart {
        info!(process = %desired.name, id = %observed.id, "Restarting container");
        runtime
            .restart_container(&observed.id, DEFAULT_STOP_TIMEOUT)
            .await?;
        return Ok(());
    }

    if observed.running || !options.start {
        debug!(process = %desired.name, id = %observed.id, "Container up to date");
        return Ok(());
    }

    // A completed one-shot stays stopped.
    if desired.run_once && observed.exit_code == 0 {
        debug!(
            process = %desired.name,
            id = %observed.id,
            "One-shot container already completed"
        );
        return Ok(());
    }

    info!(process = %desired.name, id = %observed.id, "Starting stopped container");
    runtime.start_container(&observed.id).await?;
    Ok(())
}

/// Containers claiming the process name under either the current or the
/// legacy label, merged and deduplicated by id, earliest first.
async fn discover(
    runtime: &dyn ContainerRuntime,
    name: &str,
) -> Result<Vec<ContainerSummary>, ReconcileError> {
    let mut merged = runtime.list_containers(PROCESS_NAME_LABEL, name).await?;
    merged.extend(
        runtime
            .list_containers(LEGACY_PROCESS_NAME_LABEL, name)
            .await?,
    );

    let mut seen = BTreeSet::new();
    merged.retain(|c| seen.insert(c.id.clone()));
    merged.sort_by_key(|c| c.created);
    Ok(merged)
}

/// Create the container, pulling the image once if it is not present
/// locally, and start it when requested. Any second failure propagates.
async fn create_container(
    runtime: &dyn ContainerRuntime,
    desired: &ProcessSpec,
    start: bool,
) -> Result<(), ReconcileError> {
    let id = match runtime.create_container(desired).await {
        Ok(id) => id,
        Err(RuntimeError::ImageNotFound(image)) => {
            info!(process = %desired.name, image = %image, "Image missing, pulling");
            runtime
                .pull_image(&desired.image, &desired.registry_auth)
                .await?;
            runtime.create_container(desired).await?
        }
        Err(e) => return Err(e.into()),
    };

    if start {
        runtime.start_container(&id).await?;
        info!(process = %desired.name, id = %id, "Container started");
    } else {
        debug!(process = %desired.name, id = %id, "Container created, start not requested");
    }
    Ok(())
}
