// End-to-end ticks against the in-memory runtime and offset source

mod common;

use async_trait::async_trait;
use common::{FakeOffsets, FakeRuntime, IMAGE, SERVICE, controller_config, test_policy};
use lag_autoscaler::broker::OffsetSource;
use lag_autoscaler::control_loop::Autoscaler;
use lag_autoscaler::error::BrokerError;
use lag_autoscaler::fleet_controller::FleetController;
use lag_autoscaler::fleet_inspector::FleetInspector;
use lag_autoscaler::image_refresher::{ImageRefresher, RefresherConfig};
use lag_autoscaler::lag_monitor::LagMonitor;
use lag_autoscaler::models::ScalingState;
use lag_autoscaler::runtime::ContainerRuntime;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn autoscaler(runtime: &Arc<FakeRuntime>, offsets: Arc<dyn OffsetSource>) -> Autoscaler {
    let rt: Arc<dyn ContainerRuntime> = runtime.clone();
    let inspector = FleetInspector::new(rt.clone(), SERVICE, "autoscaler");
    Autoscaler {
        refresher: ImageRefresher::new(
            rt.clone(),
            inspector.clone(),
            RefresherConfig {
                enabled: true,
                interval: Duration::from_secs(300),
                image: IMAGE.to_string(),
                fallback_network: "fallback_net".to_string(),
                stop_timeout: Duration::from_secs(10),
            },
        ),
        monitor: LagMonitor::new(offsets),
        inspector: inspector.clone(),
        policy: test_policy(),
        controller: FleetController::new(rt, inspector, controller_config(60)),
        topics: vec!["script-created".to_string(), "assets-ready".to_string()],
    }
}

struct PanickingOffsets;

#[async_trait]
impl OffsetSource for PanickingOffsets {
    async fn partitions(&self, _topic: &str) -> Result<Vec<i32>, BrokerError> {
        panic!("offset source exploded");
    }

    async fn end_offset(&self, _topic: &str, _partition: i32) -> Result<i64, BrokerError> {
        Ok(0)
    }

    async fn committed_offset(
        &self,
        _topic: &str,
        _partition: i32,
    ) -> Result<Option<i64>, BrokerError> {
        Ok(None)
    }
}

#[tokio::test]
async fn initial_state_comes_from_the_fleet() {
    let runtime = Arc::new(
        FakeRuntime::new()
            .with_worker("shorts-renderer", "img")
            .with_worker("shorts-renderer_2", "img"),
    );
    let scaler = autoscaler(&runtime, Arc::new(FakeOffsets::new()));
    let state = scaler.initial_state().await;
    assert_eq!(state, ScalingState::new(2));
}

#[tokio::test]
async fn backlog_adds_a_replica() {
    let runtime = Arc::new(FakeRuntime::new().with_worker("shorts-renderer", "img"));
    let scaler = autoscaler(&runtime, Arc::new(FakeOffsets::with_lag(12)));
    let now = Instant::now();
    let state = scaler.tick(ScalingState::new(1), now).await;
    assert_eq!(state.current, 2);
    assert_eq!(state.last_scale_time, Some(now));
    assert_eq!(runtime.names(), vec!["shorts-renderer", "shorts-renderer_2"]);
}

#[tokio::test]
async fn steep_backlog_adds_two() {
    let runtime = Arc::new(FakeRuntime::new().with_worker("shorts-renderer", "img"));
    let scaler = autoscaler(&runtime, Arc::new(FakeOffsets::with_lag(20)));
    let state = scaler.tick(ScalingState::new(1), Instant::now()).await;
    assert_eq!(state.current, 3);
}

#[tokio::test]
async fn unreachable_broker_never_scales_up() {
    let runtime = Arc::new(FakeRuntime::new().with_worker("shorts-renderer", "img"));
    let mut offsets = FakeOffsets::with_lag(500);
    offsets.unreachable = true;
    let scaler = autoscaler(&runtime, Arc::new(offsets));
    let state = scaler.tick(ScalingState::new(1), Instant::now()).await;
    assert_eq!(state.current, 1);
    assert_eq!(runtime.mutations(), 0);
}

#[tokio::test]
async fn tick_refreshes_cached_count() {
    let runtime = Arc::new(FakeRuntime::new().with_worker("shorts-renderer", "img"));
    // lag 3 sits inside the band: no action, but the count is corrected
    let scaler = autoscaler(&runtime, Arc::new(FakeOffsets::with_lag(3)));
    let state = scaler.tick(ScalingState::new(4), Instant::now()).await;
    assert_eq!(state.current, 1);
    assert_eq!(runtime.mutations(), 0);
}

#[tokio::test]
async fn low_backlog_removes_a_replica() {
    let runtime = Arc::new(
        FakeRuntime::new()
            .with_worker("shorts-renderer", "img")
            .with_worker("shorts-renderer_2", "img")
            .with_worker("shorts-renderer_3", "img"),
    );
    let scaler = autoscaler(&runtime, Arc::new(FakeOffsets::with_lag(1)));
    let state = scaler.tick(ScalingState::new(3), Instant::now()).await;
    assert_eq!(state.current, 2);
    assert_eq!(runtime.removed(), vec!["shorts-renderer_3"]);
}

#[tokio::test]
async fn panicking_tick_keeps_previous_state() {
    let runtime = Arc::new(FakeRuntime::new().with_worker("shorts-renderer", "img"));
    let scaler = autoscaler(&runtime, Arc::new(PanickingOffsets));
    let before = ScalingState::new(1);
    let after = scaler.guarded_tick(before.clone(), Instant::now()).await;
    assert_eq!(after, before);
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let runtime = Arc::new(FakeRuntime::new().with_worker("shorts-renderer", "img"));
    let scaler = autoscaler(&runtime, Arc::new(FakeOffsets::with_lag(12)));
    let (tx, rx) = tokio::sync::oneshot::channel();

    let (state, _) = tokio::join!(
        scaler.run(ScalingState::new(1), Duration::from_millis(10), rx),
        async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            let _ = tx.send(());
        }
    );
    // first tick scaled up, the cooldown held every later tick
    assert_eq!(state.current, 2);
    assert_eq!(runtime.launched().len(), 1);
}
