// Authoritative replica count for the target service

use crate::error::InspectionError;
use crate::models::{ReplicaStatus, WorkerReplica};
use crate::runtime::ContainerRuntime;
use std::sync::Arc;
use tracing::warn;

/// Assumed fleet size when the runtime cannot be asked. Never 0, so a failed
/// inspection cannot read as "no replicas" and trigger aggressive scaling.
pub const SAFE_FLOOR: u32 = 1;

#[derive(Debug)]
pub enum FleetCount {
    Observed(u32),
    Assumed { floor: u32, error: InspectionError },
}

impl FleetCount {
    pub fn value(&self) -> u32 {
        match self {
            FleetCount::Observed(n) => *n,
            FleetCount::Assumed { floor, .. } => *floor,
        }
    }

    pub fn is_observed(&self) -> bool {
        matches!(self, FleetCount::Observed(_))
    }
}

#[derive(Clone)]
pub struct FleetInspector {
    runtime: Arc<dyn ContainerRuntime>,
    service: String,
    self_marker: String,
}

impl FleetInspector {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, service: &str, self_marker: &str) -> Self {
        Self {
            runtime,
            service: service.to_string(),
            self_marker: self_marker.to_string(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Name belongs to the scaled service and is not the autoscaler itself.
    pub fn is_member(&self, name: &str) -> bool {
        name.contains(&self.service) && !name.contains(&self.self_marker)
    }

    /// Replicas in running, restarting or created state. The same inclusion
    /// policy backs both `count` and the controller's pre-mutation re-check.
    pub async fn list_replicas(&self) -> Result<Vec<WorkerReplica>, InspectionError> {
        let listed = self
            .runtime
            .list_containers(&self.service, &ReplicaStatus::ACTIVE)
            .await
            .map_err(InspectionError)?;
        let mut replicas: Vec<WorkerReplica> = Vec::with_capacity(listed.len());
        for r in listed {
            // A container changing state between per-status queries may be listed twice.
            if self.is_member(&r.name) && !replicas.iter().any(|x| x.id == r.id) {
                replicas.push(r);
            }
        }
        Ok(replicas)
    }

    pub async fn count(&self) -> FleetCount {
        match self.list_replicas().await {
            Ok(replicas) => FleetCount::Observed(saturating_count(replicas.len())),
            Err(error) => {
                warn!(error = %error, operation = "count_replicas", floor = SAFE_FLOOR, "assuming safe floor");
                FleetCount::Assumed {
                    floor: SAFE_FLOOR,
                    error,
                }
            }
        }
    }
}

fn saturating_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
