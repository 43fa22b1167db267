// Fixed-interval control loop: refresh -> measure -> count -> decide -> reconcile.
// One tick runs to completion before the next starts; a failing tick never ends the loop.

use crate::fleet_controller::{FleetController, ReconcileOutcome};
use crate::fleet_inspector::FleetInspector;
use crate::image_refresher::{ImageRefresher, RefreshOutcome};
use crate::lag_monitor::LagMonitor;
use crate::models::ScalingState;
use crate::policy::ScalingPolicy;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tokio::time::{Duration, interval};
use tracing::{debug, error, info, warn};

pub struct Autoscaler {
    pub refresher: ImageRefresher,
    pub monitor: LagMonitor,
    pub inspector: FleetInspector,
    pub policy: ScalingPolicy,
    pub controller: FleetController,
    pub topics: Vec<String>,
}

impl Autoscaler {
    /// Ground truth from the runtime; nothing survives a restart.
    pub async fn initial_state(&self) -> ScalingState {
        ScalingState::new(self.inspector.count().await.value())
    }

    pub async fn tick(&self, mut state: ScalingState, now: Instant) -> ScalingState {
        match self.refresher.refresh(&mut state, now).await {
            RefreshOutcome::Refreshed {
                image_id,
                recreated,
                failed,
            } => info!(
                image_id = %image_id,
                recreated = recreated.len(),
                failed = failed.len(),
                "image refresh"
            ),
            RefreshOutcome::UpToDate { image_id } => {
                debug!(image_id = %image_id, "replicas up to date")
            }
            _ => {}
        }

        let lag = self.monitor.measure(&self.topics).await.aggregate();
        state.current = self.inspector.count().await.value();
        let desired = self.policy.decide(lag, state.current);
        info!(lag, replicas = state.current, desired, "tick");

        match self.controller.reconcile(&mut state, desired, now).await {
            ReconcileOutcome::Failed(report) => {
                for f in &report.failures {
                    warn!(error = %f, "scale failure");
                }
            }
            ReconcileOutcome::Scaled(report) if report.is_partial_failure() => {
                for f in &report.failures {
                    warn!(error = %f, "scale failure");
                }
            }
            ReconcileOutcome::Unverified => {
                warn!(desired, "fleet could not be re-verified; not scaling")
            }
            _ => {}
        }
        state
    }

    /// Tick with a panic boundary: on panic the previous state is kept.
    pub async fn guarded_tick(&self, state: ScalingState, now: Instant) -> ScalingState {
        match AssertUnwindSafe(self.tick(state.clone(), now))
            .catch_unwind()
            .await
        {
            Ok(next) => next,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                error!(panic = %msg, "tick failed; retrying next interval");
                state
            }
        }
    }

    /// Runs until `shutdown` fires. Shutdown is only observed between ticks.
    pub async fn run(
        &self,
        mut state: ScalingState,
        every: Duration,
        mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> ScalingState {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = every.as_secs(), "starting autoscaler loop");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    state = self.guarded_tick(state, Instant::now()).await;
                }
                _ = &mut shutdown_rx => {
                    debug!("autoscaler loop shutting down");
                    break;
                }
            }
        }
        state
    }
}
