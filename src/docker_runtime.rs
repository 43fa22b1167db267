// Docker-backed ContainerRuntime via bollard

use crate::error::RuntimeError;
use crate::models::{LaunchSpec, ReplicaStatus, ReplicaTemplate, WorkerReplica};
use crate::runtime::{ContainerRuntime, RuntimeResult};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{
    ContainerCreateBody, ContainerInspectResponse, ContainerSummary, HostConfig, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
    ListContainersOptions, RemoveContainerOptionsBuilder, StartContainerOptions,
    StopContainerOptionsBuilder,
};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_unix_defaults()?;
        Ok(Self { docker })
    }

    async fn list_raw(
        &self,
        name_filter: &str,
        status: Option<ReplicaStatus>,
    ) -> RuntimeResult<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name_filter.to_string()]);
        if let Some(status) = status {
            filters.insert(
                "status".to_string(),
                vec![status.docker_filter().to_string()],
            );
        }

        let options = ListContainersOptions {
            all: true,
            filters: Some(filters),
            ..Default::default()
        };
        Ok(self.docker.list_containers(Some(options)).await?)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(
        &self,
        name_filter: &str,
        statuses: &[ReplicaStatus],
    ) -> RuntimeResult<Vec<WorkerReplica>> {
        // One query per status so each replica carries the state it was listed under.
        let mut out = Vec::new();
        for &status in statuses {
            let containers = self.list_raw(name_filter, Some(status)).await?;
            out.extend(
                containers
                    .iter()
                    .filter_map(|c| replica_from_summary(c, status)),
            );
        }
        Ok(out)
    }

    async fn container_names(&self, name_filter: &str) -> RuntimeResult<Vec<String>> {
        let containers = self.list_raw(name_filter, None).await?;
        Ok(containers.iter().filter_map(summary_name).collect())
    }

    async fn clone_config(&self, id: &str) -> RuntimeResult<ReplicaTemplate> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        Ok(template_from_inspect(&inspect))
    }

    #[instrument(skip(self, spec), fields(replica = %spec.name, image = %spec.image))]
    async fn run_container(&self, spec: &LaunchSpec) -> RuntimeResult<String> {
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(spec.env_list()),
            host_config: Some(HostConfig {
                binds: Some(spec.volumes.clone()),
                network_mode: Some(spec.network.clone()),
                restart_policy: Some(RestartPolicy {
                    name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                    maximum_retry_count: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptionsBuilder::default()
            .name(&spec.name)
            .build();

        let created = self.docker.create_container(Some(options), body).await?;
        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await
        {
            // A created-but-never-started container would still count as a replica.
            if let Err(cleanup) = self.remove_container(&created.id, true).await {
                warn!(id = %created.id, error = %cleanup, "failed to remove unstarted container");
            }
            return Err(e.into());
        }
        debug!(id = %created.id, "container started");
        Ok(created.id)
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> RuntimeResult<()> {
        let secs = i32::try_from(timeout.as_secs()).unwrap_or(i32::MAX);
        let options = StopContainerOptionsBuilder::default().t(secs).build();
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => {
                debug!(id, "container was not running");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
        let options = RemoveContainerOptionsBuilder::default().force(force).build();
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pull_image(&self, reference: &str) -> RuntimeResult<String> {
        let options = CreateImageOptionsBuilder::default()
            .from_image(reference)
            .build();
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            let info = progress?;
            if let Some(status) = info.status {
                debug!(status = %status, "pull progress");
            }
        }
        self.resolve_image(reference).await
    }

    async fn resolve_image(&self, reference: &str) -> RuntimeResult<String> {
        let image = self.docker.inspect_image(reference).await?;
        image
            .id
            .ok_or_else(|| RuntimeError::NotFound(reference.to_string()))
    }
}

/// Docker answers 304 when stopping a container that is not running.
pub(crate) fn is_not_modified(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

fn summary_name(c: &ContainerSummary) -> Option<String> {
    c.names
        .as_ref()
        .and_then(|n| n.first())
        .map(|n| n.trim_start_matches('/').to_string())
}

/// Map a list entry to a replica. Entries without an id are dropped.
pub(crate) fn replica_from_summary(
    c: &ContainerSummary,
    status: ReplicaStatus,
) -> Option<WorkerReplica> {
    let id = c.id.clone()?;
    let name = summary_name(c).unwrap_or_else(|| id.clone());
    Some(WorkerReplica {
        id,
        name,
        image_id: c.image_id.clone().unwrap_or_default(),
        status,
    })
}

/// Environment, volume binds and network of an inspected container.
pub(crate) fn template_from_inspect(inspect: &ContainerInspectResponse) -> ReplicaTemplate {
    let env = inspect
        .config
        .as_ref()
        .and_then(|c| c.env.as_ref())
        .map(|e| ReplicaTemplate::env_from_docker(e))
        .unwrap_or_default();

    let mut volumes: Vec<String> = Vec::new();
    if let Some(hc) = inspect.host_config.as_ref() {
        if let Some(binds) = hc.binds.as_ref() {
            volumes.extend(binds.iter().cloned());
        }
        // Compose declares named volumes as mounts rather than binds.
        if let Some(mounts) = hc.mounts.as_ref() {
            for m in mounts {
                let (Some(source), Some(target)) = (m.source.as_ref(), m.target.as_ref()) else {
                    continue;
                };
                let mode = if m.read_only.unwrap_or(false) { "ro" } else { "rw" };
                let bind = format!("{}:{}:{}", source, target, mode);
                if !volumes.contains(&bind) {
                    volumes.push(bind);
                }
            }
        }
    }

    // Prefer an attached user network; fall back to the configured network mode.
    let network = inspect
        .network_settings
        .as_ref()
        .and_then(|ns| ns.networks.as_ref())
        .and_then(|nets| {
            let mut names: Vec<&String> = nets.keys().collect();
            names.sort();
            names.first().map(|n| n.to_string())
        })
        .or_else(|| {
            inspect
                .host_config
                .as_ref()
                .and_then(|hc| hc.network_mode.clone())
        });

    ReplicaTemplate {
        env,
        volumes,
        network,
    }
}
