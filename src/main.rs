use anyhow::Result;
use lag_autoscaler::config::AppConfig;
use lag_autoscaler::control_loop::Autoscaler;
use lag_autoscaler::docker_runtime::DockerRuntime;
use lag_autoscaler::fleet_controller::{ControllerConfig, FleetController};
use lag_autoscaler::fleet_inspector::FleetInspector;
use lag_autoscaler::image_refresher::{ImageRefresher, RefresherConfig};
use lag_autoscaler::kafka_offsets::KafkaOffsets;
use lag_autoscaler::lag_monitor::LagMonitor;
use lag_autoscaler::policy::ScalingPolicy;
use lag_autoscaler::runtime::ContainerRuntime;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

fn build(config: &AppConfig) -> Result<Autoscaler> {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect()?);
    let offsets = Arc::new(KafkaOffsets::connect(&config.kafka)?);
    let inspector = FleetInspector::new(
        runtime.clone(),
        &config.target.service,
        &config.target.self_marker,
    );
    let policy = ScalingPolicy::from(&config.scaling);
    let stop_timeout = Duration::from_secs(config.target.stop_timeout_secs);

    let refresher = ImageRefresher::new(
        runtime.clone(),
        inspector.clone(),
        RefresherConfig {
            enabled: config.upgrade.auto_upgrade,
            interval: config.upgrade.check_interval(),
            image: config.target.image.clone(),
            fallback_network: config.target.network.clone(),
            stop_timeout,
        },
    );
    let controller = FleetController::new(
        runtime,
        inspector.clone(),
        ControllerConfig {
            policy,
            cooldown: config.scaling.cooldown(),
            image: config.target.image.clone(),
            fallback_network: config.target.network.clone(),
            fallback_volumes: config.target.volumes.clone(),
            stop_timeout,
        },
    );

    Ok(Autoscaler {
        refresher,
        monitor: LagMonitor::new(offsets),
        inspector,
        policy,
        controller,
        topics: config.kafka.topics.clone(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let config = AppConfig::load()?;
    let autoscaler = build(&config)?;
    let state = autoscaler.initial_state().await;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        target = %config.target.service,
        image = %config.target.image,
        consumer_group = %config.kafka.consumer_group,
        topics = ?config.kafka.topics,
        min_replicas = config.scaling.min_replicas,
        max_replicas = config.scaling.max_replicas,
        scale_up_threshold = config.scaling.scale_up_threshold,
        scale_down_threshold = config.scaling.scale_down_threshold,
        auto_upgrade = config.upgrade.auto_upgrade,
        replicas = state.current,
        "autoscaler initialized"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let every = config.scaling.check_interval();
    // The loop observes shutdown between ticks, so an in-flight tick always completes.
    tokio::join!(autoscaler.run(state, every, shutdown_rx), async {
        shutdown_signal().await;
        tracing::info!("Received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
