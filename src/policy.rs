// Lag -> desired replica count, with a hysteresis band between the thresholds

use crate::config::ScalingConfig;

/// Bounds and thresholds for `decide`. `scale_down_threshold` is expected to be
/// strictly below `scale_up_threshold`; config validation enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingPolicy {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub scale_up_threshold: u64,
    pub scale_down_threshold: u64,
}

impl From<&ScalingConfig> for ScalingPolicy {
    fn from(c: &ScalingConfig) -> Self {
        Self {
            min_replicas: c.min_replicas,
            max_replicas: c.max_replicas,
            scale_up_threshold: c.scale_up_threshold,
            scale_down_threshold: c.scale_down_threshold,
        }
    }
}

impl ScalingPolicy {
    pub fn decide(&self, lag: u64, current: u32) -> u32 {
        decide(
            lag,
            current,
            self.min_replicas,
            self.max_replicas,
            self.scale_up_threshold,
            self.scale_down_threshold,
        )
    }

    /// Clamp into `[min, max]`.
    pub fn clamp(&self, desired: u32) -> u32 {
        desired.min(self.max_replicas).max(self.min_replicas)
    }
}

/// First matching rule wins:
/// 1. steep backlog (`lag > 3 * up`): two steps up
/// 2. `lag > up`: one step up
/// 3. `lag < down` with room above `min`: one step down
/// 4. otherwise hold.
///
/// Total over all inputs; arithmetic saturates.
pub fn decide(lag: u64, current: u32, min: u32, max: u32, up: u64, down: u64) -> u32 {
    if lag > up.saturating_mul(3) {
        max.min(current.saturating_add(2))
    } else if lag > up {
        max.min(current.saturating_add(1))
    } else if lag < down && current > min {
        min.max(current - 1)
    } else {
        current
    }
}
