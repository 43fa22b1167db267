// Reconciles the live fleet toward a desired replica count.
//
// Every mutation is gated by the cooldown window and by a fresh inspection taken
// immediately before acting, so the controller never acts on a count another
// actor has already changed.

use crate::error::{MutationAction, MutationError};
use crate::fleet_inspector::{FleetCount, FleetInspector};
use crate::models::{
    LaunchSpec, ReplicaTemplate, ScalingState, WorkerReplica, is_primary, next_replica_name,
    replica_number,
};
use crate::policy::ScalingPolicy;
use crate::runtime::ContainerRuntime;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub policy: ScalingPolicy,
    pub cooldown: Duration,
    pub image: String,
    /// Used when no reference replica exists.
    pub fallback_network: String,
    /// Used when no reference replica exists.
    pub fallback_volumes: Vec<String>,
    pub stop_timeout: Duration,
}

#[derive(Debug)]
pub struct ScaleReport {
    pub from: u32,
    pub to: u32,
    pub failures: Vec<MutationError>,
}

impl ScaleReport {
    /// Some replicas changed, others failed.
    pub fn is_partial_failure(&self) -> bool {
        !self.failures.is_empty() && self.from != self.to
    }
}

#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Nothing to do; no runtime calls were made.
    Unchanged,
    CoolingDown { remaining: Duration },
    /// The fresh inspection failed; refusing to mutate on an unverified count.
    Unverified,
    /// The fleet had already moved to the desired count.
    Stale { fresh: u32 },
    Scaled(ScaleReport),
    /// Every mutation in the batch failed; cached state is untouched.
    Failed(ScaleReport),
}

pub struct FleetController {
    runtime: Arc<dyn ContainerRuntime>,
    inspector: FleetInspector,
    config: ControllerConfig,
}

impl FleetController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        inspector: FleetInspector,
        config: ControllerConfig,
    ) -> Self {
        Self {
            runtime,
            inspector,
            config,
        }
    }

    #[instrument(skip(self, state, now), fields(current = state.current))]
    pub async fn reconcile(
        &self,
        state: &mut ScalingState,
        desired: u32,
        now: Instant,
    ) -> ReconcileOutcome {
        if desired == state.current {
            return ReconcileOutcome::Unchanged;
        }
        if let Some(remaining) = state.cooldown_remaining(self.config.cooldown, now) {
            info!(desired, remaining_secs = remaining.as_secs(), "cooling down; not scaling");
            return ReconcileOutcome::CoolingDown { remaining };
        }

        let fresh = match self.inspector.count().await {
            FleetCount::Observed(n) => n,
            FleetCount::Assumed { .. } => return ReconcileOutcome::Unverified,
        };
        if fresh != state.current {
            warn!(
                cached = state.current,
                fresh, "stale replica count detected; updating"
            );
            state.current = fresh;
            if desired == fresh {
                return ReconcileOutcome::Stale { fresh };
            }
        }

        let target = self.config.policy.clamp(desired);
        if target == state.current {
            return ReconcileOutcome::Unchanged;
        }

        let from = state.current;
        let (succeeded, failures) = if target > from {
            info!(from, to = target, "scaling up");
            self.scale_up(target - from).await
        } else {
            info!(from, to = target, "scaling down");
            self.scale_down(from - target).await
        };

        let achieved = if target > from {
            from + succeeded
        } else {
            from - succeeded
        };
        let report = ScaleReport {
            from,
            to: achieved,
            failures,
        };
        if succeeded == 0 {
            warn!(from, target, failed = report.failures.len(), "scale action failed");
            return ReconcileOutcome::Failed(report);
        }

        state.record_scale(achieved, now);
        if report.is_partial_failure() {
            warn!(
                from,
                to = achieved,
                target,
                failed = report.failures.len(),
                "scaled with partial failure"
            );
        } else {
            info!(from, to = achieved, "scaled");
        }
        ReconcileOutcome::Scaled(report)
    }

    /// Launch `count` replicas. Returns how many started, plus the failures.
    async fn scale_up(&self, count: u32) -> (u32, Vec<MutationError>) {
        let template = self.reference_template().await;
        let network = template
            .network
            .clone()
            .unwrap_or_else(|| self.config.fallback_network.clone());
        let volumes = if template.volumes.is_empty() {
            self.config.fallback_volumes.clone()
        } else {
            template.volumes.clone()
        };

        let mut started = 0;
        let mut failures = Vec::new();
        for _ in 0..count {
            let existing = match self.runtime.container_names(self.inspector.service()).await {
                Ok(names) => names,
                Err(source) => {
                    failures.push(MutationError {
                        replica: self.inspector.service().to_string(),
                        action: MutationAction::Launch,
                        source,
                    });
                    continue;
                }
            };
            let spec = LaunchSpec {
                name: next_replica_name(self.inspector.service(), &existing),
                image: self.config.image.clone(),
                network: network.clone(),
                env: template.env.clone(),
                volumes: volumes.clone(),
            };
            match self.runtime.run_container(&spec).await {
                Ok(_) => {
                    info!(replica = %spec.name, "replica started");
                    started += 1;
                }
                Err(source) => {
                    warn!(replica = %spec.name, error = %source, "failed to start replica");
                    failures.push(MutationError {
                        replica: spec.name,
                        action: MutationAction::Launch,
                        source,
                    });
                }
            }
        }
        (started, failures)
    }

    /// Configuration of the first replica of the service, or an empty template.
    async fn reference_template(&self) -> ReplicaTemplate {
        let replicas = match self.inspector.list_replicas().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "no reference replica; using configured defaults");
                return ReplicaTemplate::default();
            }
        };
        let Some(reference) = replicas.first() else {
            return ReplicaTemplate::default();
        };
        match self.runtime.clone_config(&reference.id).await {
            Ok(t) => t,
            Err(e) => {
                warn!(replica = %reference.name, error = %e, "clone_config failed; using configured defaults");
                ReplicaTemplate::default()
            }
        }
    }

    /// Stop and remove up to `count` replicas, highest numbered first.
    async fn scale_down(&self, count: u32) -> (u32, Vec<MutationError>) {
        let replicas = match self.inspector.list_replicas().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "cannot list replicas for scale down");
                return (
                    0,
                    vec![MutationError {
                        replica: self.inspector.service().to_string(),
                        action: MutationAction::Stop,
                        source: e.0,
                    }],
                );
            }
        };

        let victims = removal_candidates(replicas, self.inspector.service(), count as usize);
        let mut removed = 0;
        let mut failures = Vec::new();
        for replica in victims {
            let (gone, failure) = self.retire(&replica).await;
            if gone {
                info!(replica = %replica.name, "replica removed");
                removed += 1;
            }
            if let Some(e) = failure {
                warn!(replica = %replica.name, error = %e, "failed to remove replica");
                failures.push(e);
            }
        }
        (removed, failures)
    }

    /// Takes a replica out of the active set. Returns whether it left, plus any
    /// failure to report. A stopped replica has left even when removal fails; one
    /// that cannot be stopped is force-removed.
    async fn retire(&self, replica: &WorkerReplica) -> (bool, Option<MutationError>) {
        let fail = |action, source| MutationError {
            replica: replica.name.clone(),
            action,
            source,
        };

        if let Err(stop) = self
            .runtime
            .stop_container(&replica.id, self.config.stop_timeout)
            .await
        {
            warn!(replica = %replica.name, error = %stop, "stop failed; forcing removal");
            return match self.runtime.remove_container(&replica.id, true).await {
                Ok(()) => (true, None),
                Err(e) => {
                    debug!(replica = %replica.name, error = %e, "forced removal failed");
                    (false, Some(fail(MutationAction::Stop, stop)))
                }
            };
        }
        match self.runtime.remove_container(&replica.id, false).await {
            Ok(()) => (true, None),
            Err(e) => (true, Some(fail(MutationAction::Remove, e))),
        }
    }
}

/// The leading `count` replicas by descending replica number, minus the primary
/// while more than one replica exists. The primary is skipped, not substituted.
pub fn removal_candidates(
    mut replicas: Vec<WorkerReplica>,
    service: &str,
    count: usize,
) -> Vec<WorkerReplica> {
    let total = replicas.len();
    replicas.sort_by(|a, b| {
        let na = replica_number(&a.name, service).unwrap_or(0);
        let nb = replica_number(&b.name, service).unwrap_or(0);
        nb.cmp(&na).then_with(|| b.name.cmp(&a.name))
    });
    replicas
        .into_iter()
        .take(count)
        .filter(|r| !(total > 1 && is_primary(&r.name, service)))
        .collect()
}
