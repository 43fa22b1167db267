// Periodic image check and rolling recreate of outdated replicas.

use crate::error::{MutationAction, MutationError, RefreshError, RuntimeError};
use crate::fleet_inspector::FleetInspector;
use crate::models::{LaunchSpec, ScalingState, WorkerReplica};
use crate::runtime::ContainerRuntime;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct RefresherConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub image: String,
    pub fallback_network: String,
    pub stop_timeout: Duration,
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Disabled,
    NotDue,
    /// Pull and local lookup both failed; retried on the next tick.
    Skipped(RefreshError),
    /// Replicas could not be listed after resolving the image.
    Unlisted { image_id: String },
    UpToDate { image_id: String },
    Refreshed {
        image_id: String,
        recreated: Vec<String>,
        failed: Vec<MutationError>,
    },
}

pub struct ImageRefresher {
    runtime: Arc<dyn ContainerRuntime>,
    inspector: FleetInspector,
    config: RefresherConfig,
}

impl ImageRefresher {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        inspector: FleetInspector,
        config: RefresherConfig,
    ) -> Self {
        Self {
            runtime,
            inspector,
            config,
        }
    }

    #[instrument(skip(self, state, now), fields(image = %self.config.image))]
    pub async fn refresh(&self, state: &mut ScalingState, now: Instant) -> RefreshOutcome {
        if !self.config.enabled {
            return RefreshOutcome::Disabled;
        }
        if !state.image_check_due(self.config.interval, now) {
            return RefreshOutcome::NotDue;
        }

        let image_id = match self.resolve_latest().await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, operation = "refresh_image", "image refresh skipped");
                return RefreshOutcome::Skipped(e);
            }
        };
        state.last_pull_time = Some(now);

        let replicas = match self.inspector.list_replicas().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, operation = "refresh_image", "cannot list replicas");
                return RefreshOutcome::Unlisted { image_id };
            }
        };

        let outdated: Vec<WorkerReplica> = replicas
            .into_iter()
            .filter(|r| r.image_id != image_id)
            .collect();
        if outdated.is_empty() {
            return RefreshOutcome::UpToDate { image_id };
        }

        let mut recreated = Vec::new();
        let mut failed = Vec::new();
        for replica in outdated {
            info!(replica = %replica.name, old = %replica.image_id, new = %image_id, "replica outdated; recreating");
            match self.recreate(&replica, &image_id).await {
                Ok(()) => {
                    info!(replica = %replica.name, "recreated");
                    recreated.push(replica.name);
                }
                Err(e) => {
                    warn!(replica = %replica.name, error = %e, "recreate failed");
                    failed.push(e);
                }
            }
        }
        RefreshOutcome::Refreshed {
            image_id,
            recreated,
            failed,
        }
    }

    /// Registry pull, or the local image when the registry is not reachable.
    async fn resolve_latest(&self) -> Result<String, RefreshError> {
        let pull = match self.runtime.pull_image(&self.config.image).await {
            Ok(id) => return Ok(id),
            Err(e) => e,
        };
        info!(error = %pull, "pull failed; falling back to local image");
        self.runtime
            .resolve_image(&self.config.image)
            .await
            .map_err(|local| RefreshError {
                image: self.config.image.clone(),
                pull,
                local,
            })
    }

    /// Same name, network, environment and volumes; new image.
    async fn recreate(&self, replica: &WorkerReplica, image_id: &str) -> Result<(), MutationError> {
        let fail = |action, source: RuntimeError| MutationError {
            replica: replica.name.clone(),
            action,
            source,
        };

        let template = self
            .runtime
            .clone_config(&replica.id)
            .await
            .map_err(|e| fail(MutationAction::Recreate, e))?;
        match self
            .runtime
            .stop_container(&replica.id, self.config.stop_timeout)
            .await
        {
            Ok(()) => self
                .runtime
                .remove_container(&replica.id, false)
                .await
                .map_err(|e| fail(MutationAction::Remove, e))?,
            Err(stop) => {
                warn!(replica = %replica.name, error = %stop, "stop failed; forcing removal");
                self.runtime
                    .remove_container(&replica.id, true)
                    .await
                    .map_err(|_| fail(MutationAction::Stop, stop))?
            }
        }

        let spec = LaunchSpec {
            name: replica.name.clone(),
            image: image_id.to_string(),
            network: template
                .network
                .unwrap_or_else(|| self.config.fallback_network.clone()),
            env: template.env,
            volumes: template.volumes,
        };
        self.runtime
            .run_container(&spec)
            .await
            .map(|_| ())
            .map_err(|e| fail(MutationAction::Launch, e))
    }
}
