// Process-local scaling state, owned by the control loop

use std::time::{Duration, Instant};

/// Last known fleet size and the timestamps that gate scaling and image checks.
/// Rebuilt from a live inspection at startup; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingState {
    pub current: u32,
    pub last_scale_time: Option<Instant>,
    pub last_pull_time: Option<Instant>,
}

impl ScalingState {
    pub fn new(current: u32) -> Self {
        Self {
            current,
            last_scale_time: None,
            last_pull_time: None,
        }
    }

    /// Time left before another scaling action is allowed, if any.
    pub fn cooldown_remaining(&self, cooldown: Duration, now: Instant) -> Option<Duration> {
        let last = self.last_scale_time?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    pub fn image_check_due(&self, interval: Duration, now: Instant) -> bool {
        self.last_pull_time
            .is_none_or(|t| now.saturating_duration_since(t) >= interval)
    }

    /// Record a scale action that left `achieved` replicas behind.
    pub fn record_scale(&mut self, achieved: u32, now: Instant) {
        self.current = achieved;
        self.last_scale_time = Some(now);
    }
}
