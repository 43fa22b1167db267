// Shared test helpers: in-memory container runtime and offset source

#![allow(dead_code)]

use async_trait::async_trait;
use lag_autoscaler::broker::OffsetSource;
use lag_autoscaler::error::{BrokerError, RuntimeError};
use lag_autoscaler::fleet_controller::ControllerConfig;
use lag_autoscaler::models::{
    LaunchSpec, ReplicaStatus, ReplicaTemplate, WorkerReplica,
};
use lag_autoscaler::policy::ScalingPolicy;
use lag_autoscaler::runtime::{ContainerRuntime, RuntimeResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

pub const SERVICE: &str = "shorts-renderer";
pub const IMAGE: &str = "shorts-worker:latest";
pub const NETWORK: &str = "proj_default";

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image_id: String,
    pub status: ReplicaStatus,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub network: String,
}

#[derive(Default)]
struct Inner {
    containers: Vec<FakeContainer>,
    next_id: u64,
    launched: Vec<LaunchSpec>,
    stopped: Vec<String>,
    removed: Vec<String>,
    list_calls: usize,
    fail_list: bool,
    fail_launch_attempts: HashSet<usize>,
    fail_all_launches: bool,
    fail_stop: HashSet<String>,
    fail_remove: HashSet<String>,
    registry: HashMap<String, String>,
    local: HashMap<String, String>,
}

/// Docker stand-in. Mutating calls are recorded so tests can assert on them.
#[derive(Default)]
pub struct FakeRuntime {
    inner: Mutex<Inner>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a running container of the worker service with a standard env.
    pub fn with_worker(self, name: &str, image_id: &str) -> Self {
        self.with_container(name, image_id, ReplicaStatus::Running)
    }

    pub fn with_container(self, name: &str, image_id: &str, status: ReplicaStatus) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.next_id += 1;
            let id = format!("c{}", inner.next_id);
            let mut env = BTreeMap::new();
            env.insert("KAFKA_BOOTSTRAP_SERVERS".to_string(), "kafka:29092".to_string());
            env.insert("WORKER_NAME".to_string(), name.to_string());
            inner.containers.push(FakeContainer {
                id,
                name: name.to_string(),
                image_id: image_id.to_string(),
                status,
                env,
                volumes: vec!["proj_shared:/app/shared-data:rw".to_string()],
                network: NETWORK.to_string(),
            });
        }
        self
    }

    pub fn with_registry_image(self, reference: &str, id: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .registry
            .insert(reference.to_string(), id.to_string());
        self
    }

    pub fn with_local_image(self, reference: &str, id: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .local
            .insert(reference.to_string(), id.to_string());
        self
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.inner.lock().unwrap().fail_list = fail;
    }

    /// Fails the n-th launch attempt (0-based), whatever its name.
    pub fn fail_launch_attempt(&self, n: usize) {
        self.inner.lock().unwrap().fail_launch_attempts.insert(n);
    }

    pub fn fail_all_launches(&self) {
        self.inner.lock().unwrap().fail_all_launches = true;
    }

    pub fn fail_stop_of(&self, name: &str) {
        self.inner.lock().unwrap().fail_stop.insert(name.to_string());
    }

    pub fn fail_remove_of(&self, name: &str) {
        self.inner.lock().unwrap().fail_remove.insert(name.to_string());
    }

    /// Simulates another actor starting a worker outside the autoscaler.
    pub fn external_start(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("c{}", inner.next_id);
        inner.containers.push(FakeContainer {
            id,
            name: name.to_string(),
            image_id: "sha256:old".to_string(),
            status: ReplicaStatus::Running,
            env: BTreeMap::new(),
            volumes: vec![],
            network: NETWORK.to_string(),
        });
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.inner.lock().unwrap().containers.clone()
    }

    pub fn names(&self) -> Vec<String> {
        let mut n: Vec<String> = self.containers().into_iter().map(|c| c.name).collect();
        n.sort();
        n
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.inner.lock().unwrap().launched.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.inner.lock().unwrap().removed.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.inner.lock().unwrap().list_calls
    }

    /// Launch and stop attempts plus successful removals.
    pub fn mutations(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.launched.len() + inner.stopped.len() + inner.removed.len()
    }
}

fn replica(c: &FakeContainer) -> WorkerReplica {
    WorkerReplica {
        id: c.id.clone(),
        name: c.name.clone(),
        image_id: c.image_id.clone(),
        status: c.status,
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(
        &self,
        name_filter: &str,
        statuses: &[ReplicaStatus],
    ) -> RuntimeResult<Vec<WorkerReplica>> {
        let mut inner = self.inner.lock().unwrap();
        inner.list_calls += 1;
        if inner.fail_list {
            return Err(RuntimeError::Other("daemon unreachable".into()));
        }
        Ok(inner
            .containers
            .iter()
            .filter(|c| c.name.contains(name_filter) && statuses.contains(&c.status))
            .map(replica)
            .collect())
    }

    async fn container_names(&self, name_filter: &str) -> RuntimeResult<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_list {
            return Err(RuntimeError::Other("daemon unreachable".into()));
        }
        Ok(inner
            .containers
            .iter()
            .filter(|c| c.name.contains(name_filter))
            .map(|c| c.name.clone())
            .collect())
    }

    async fn clone_config(&self, id: &str) -> RuntimeResult<ReplicaTemplate> {
        let inner = self.inner.lock().unwrap();
        let c = inner
            .containers
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        Ok(ReplicaTemplate {
            env: c.env.clone(),
            volumes: c.volumes.clone(),
            network: Some(c.network.clone()),
        })
    }

    async fn run_container(&self, spec: &LaunchSpec) -> RuntimeResult<String> {
        let mut inner = self.inner.lock().unwrap();
        let attempt = inner.launched.len();
        inner.launched.push(spec.clone());
        if inner.fail_all_launches || inner.fail_launch_attempts.contains(&attempt) {
            return Err(RuntimeError::Other(format!("cannot start {}", spec.name)));
        }
        if inner.containers.iter().any(|c| c.name == spec.name) {
            return Err(RuntimeError::Other(format!("name {} in use", spec.name)));
        }
        let image_id = inner
            .local
            .get(&spec.image)
            .cloned()
            .unwrap_or_else(|| spec.image.clone());
        inner.next_id += 1;
        let id = format!("c{}", inner.next_id);
        inner.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            image_id,
            status: ReplicaStatus::Running,
            env: spec.env.clone(),
            volumes: spec.volumes.clone(),
            network: spec.network.clone(),
        });
        Ok(id)
    }

    /// Like Docker, refuses to stop a container that is not running.
    async fn stop_container(&self, id: &str, _timeout: Duration) -> RuntimeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped.push(id.to_string());
        let fail_stop = inner.fail_stop.clone();
        let c = inner
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        if fail_stop.contains(&c.name) {
            return Err(RuntimeError::Other(format!("cannot stop {}", c.name)));
        }
        if c.status != ReplicaStatus::Running {
            return Err(RuntimeError::Other(format!("{} is not running", c.name)));
        }
        c.status = ReplicaStatus::Stopped;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner
            .containers
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        let c = &inner.containers[pos];
        if inner.fail_remove.contains(&c.name) {
            return Err(RuntimeError::Other(format!("cannot remove {}", c.name)));
        }
        if c.status == ReplicaStatus::Running && !force {
            return Err(RuntimeError::Other(format!(
                "cannot remove running container {}",
                c.name
            )));
        }
        let c = inner.containers.remove(pos);
        inner.removed.push(c.name);
        Ok(())
    }

    async fn pull_image(&self, reference: &str) -> RuntimeResult<String> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner
            .registry
            .get(reference)
            .cloned()
            .ok_or_else(|| RuntimeError::Other(format!("pull access denied for {}", reference)))?;
        inner.local.insert(reference.to_string(), id.clone());
        Ok(id)
    }

    async fn resolve_image(&self, reference: &str) -> RuntimeResult<String> {
        self.inner
            .lock()
            .unwrap()
            .local
            .get(reference)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(reference.to_string()))
    }
}

/// Offsets per topic: (partition, end, committed).
#[derive(Default)]
pub struct FakeOffsets {
    pub topics: HashMap<String, Vec<(i32, i64, Option<i64>)>>,
    pub unreachable: bool,
    pub broken_topics: HashSet<String>,
}

impl FakeOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(mut self, name: &str, partitions: &[(i32, i64, Option<i64>)]) -> Self {
        self.topics.insert(name.to_string(), partitions.to_vec());
        self
    }

    /// A single-partition topic carrying `lag` messages of backlog.
    pub fn with_lag(lag: i64) -> Self {
        Self::new().topic("script-created", &[(0, 100 + lag, Some(100))])
    }

    fn check(&self, topic: &str) -> Result<(), BrokerError> {
        if self.unreachable {
            return Err(BrokerError::Unreachable("all brokers down".into()));
        }
        if self.broken_topics.contains(topic) {
            return Err(BrokerError::Topic {
                topic: topic.to_string(),
                reason: "leader not available".into(),
            });
        }
        Ok(())
    }

    fn find(&self, topic: &str, partition: i32) -> Option<(i64, Option<i64>)> {
        self.topics
            .get(topic)?
            .iter()
            .find(|(p, _, _)| *p == partition)
            .map(|(_, end, committed)| (*end, *committed))
    }
}

#[async_trait]
impl OffsetSource for FakeOffsets {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError> {
        self.check(topic)?;
        Ok(self
            .topics
            .get(topic)
            .map(|ps| ps.iter().map(|(p, _, _)| *p).collect())
            .unwrap_or_default())
    }

    async fn end_offset(&self, topic: &str, partition: i32) -> Result<i64, BrokerError> {
        self.check(topic)?;
        Ok(self.find(topic, partition).map(|(end, _)| end).unwrap_or(0))
    }

    async fn committed_offset(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>, BrokerError> {
        self.check(topic)?;
        Ok(self.find(topic, partition).and_then(|(_, c)| c))
    }
}

pub fn test_policy() -> ScalingPolicy {
    ScalingPolicy {
        min_replicas: 1,
        max_replicas: 5,
        scale_up_threshold: 5,
        scale_down_threshold: 2,
    }
}

pub fn controller_config(cooldown_secs: u64) -> ControllerConfig {
    ControllerConfig {
        policy: test_policy(),
        cooldown: Duration::from_secs(cooldown_secs),
        image: IMAGE.to_string(),
        fallback_network: "fallback_net".to_string(),
        fallback_volumes: vec!["fallback_vol:/data:rw".to_string()],
        stop_timeout: Duration::from_secs(10),
    }
}
