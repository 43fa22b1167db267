// Worker replica models and the naming convention shared by the inspector and controller

use std::collections::BTreeMap;

/// Docker lifecycle state of a replica, as far as scaling cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicaStatus {
    Running,
    /// Docker "created": launched but not yet started.
    Starting,
    Restarting,
    Stopped,
}

impl ReplicaStatus {
    /// States that count towards the fleet size, for the per-tick count and the
    /// pre-mutation re-check alike.
    pub const ACTIVE: [ReplicaStatus; 3] = [
        ReplicaStatus::Running,
        ReplicaStatus::Restarting,
        ReplicaStatus::Starting,
    ];

    /// Value for Docker's `status` list filter.
    pub fn docker_filter(self) -> &'static str {
        match self {
            ReplicaStatus::Running => "running",
            ReplicaStatus::Starting => "created",
            ReplicaStatus::Restarting => "restarting",
            ReplicaStatus::Stopped => "exited",
        }
    }
}

/// One worker container as reported by the runtime. Never cached across ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReplica {
    pub id: String,
    pub name: String,
    pub image_id: String,
    pub status: ReplicaStatus,
}

/// Configuration cloned from a reference replica to seed new or recreated ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaTemplate {
    pub env: BTreeMap<String, String>,
    /// Docker bind strings, `source:target[:mode]`.
    pub volumes: Vec<String>,
    pub network: Option<String>,
}

impl ReplicaTemplate {
    /// Parse Docker's `KEY=value` environment list. Entries without `=` are dropped.
    pub fn env_from_docker(entries: &[String]) -> BTreeMap<String, String> {
        entries
            .iter()
            .filter_map(|e| e.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Everything needed to start one replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<String>,
}

impl LaunchSpec {
    /// Docker's `KEY=value` environment list.
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}

/// Replica number encoded in a container name: the bare service name (or a
/// compose-style `_1`/`-1` suffix) is 1, `{service}_N` is N. `None` when the
/// name carries something else after the service name.
pub fn replica_number(name: &str, service: &str) -> Option<u32> {
    let idx = name.rfind(service)?;
    let rest = &name[idx + service.len()..];
    if rest.is_empty() {
        return Some(1);
    }
    let digits = rest.strip_prefix('_').or_else(|| rest.strip_prefix('-'))?;
    digits.parse().ok()
}

/// The primary replica is the one that must exist standalone: the bare service
/// name, `{service}-1` / `{service}_1`, or a compose project-prefixed form of those.
pub fn is_primary(name: &str, service: &str) -> bool {
    if name == service {
        return true;
    }
    let suffixed = [format!("{}-1", service), format!("{}_1", service)];
    suffixed.iter().any(|s| {
        name == s
            || name.ends_with(&format!("_{}", s))
            || name.ends_with(&format!("-{}", s))
    })
}

/// Lowest unused `{service}_N` name with N >= 2; N = 1 belongs to the primary.
pub fn next_replica_name<S: AsRef<str>>(service: &str, existing: &[S]) -> String {
    let mut idx: u32 = 2;
    loop {
        let candidate = format!("{}_{}", service, idx);
        if !existing.iter().any(|n| n.as_ref() == candidate) {
            return candidate;
        }
        idx += 1;
    }
}
