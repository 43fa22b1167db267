//! Container runtime interface.
//!
//! Everything the autoscaler does to the fleet goes through this trait, so the
//! control logic can run against Docker in production and a fake in tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::models::{LaunchSpec, ReplicaStatus, ReplicaTemplate, WorkerReplica};

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Containers whose name contains `name_filter` and whose state is one of
    /// `statuses`. Names are returned without Docker's leading `/`.
    async fn list_containers(
        &self,
        name_filter: &str,
        statuses: &[ReplicaStatus],
    ) -> RuntimeResult<Vec<WorkerReplica>>;

    /// Names of all containers matching `name_filter`, in any state.
    async fn container_names(&self, name_filter: &str) -> RuntimeResult<Vec<String>>;

    /// Clone configuration from a reference replica: environment, volume binds
    /// and network.
    async fn clone_config(&self, id: &str) -> RuntimeResult<ReplicaTemplate>;

    /// Create and start a detached container with an `unless-stopped` restart
    /// policy. Returns the new container id.
    async fn run_container(&self, spec: &LaunchSpec) -> RuntimeResult<String>;

    /// Stopping a container that is not running succeeds.
    async fn stop_container(&self, id: &str, timeout: Duration) -> RuntimeResult<()>;

    /// With `force`, a running container is killed first.
    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()>;

    /// Pull `reference` from its registry and return the resulting image id.
    async fn pull_image(&self, reference: &str) -> RuntimeResult<String>;

    /// Image id of an already-present local image.
    async fn resolve_image(&self, reference: &str) -> RuntimeResult<String>;
}
