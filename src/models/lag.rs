// Per-partition offsets and the lag derived from them

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOffsets {
    /// Log end offset (high watermark).
    pub end: i64,
    /// Last committed offset of the consumer group; 0 when nothing was committed.
    pub committed: i64,
}

impl PartitionOffsets {
    /// Backlog for this partition. Never negative, even when the broker briefly
    /// reports a committed offset past the end.
    pub fn lag(&self) -> u64 {
        self.end.saturating_sub(self.committed).max(0) as u64
    }
}

/// Offsets for every monitored topic, recomputed each tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LagSnapshot {
    pub topics: BTreeMap<String, BTreeMap<i32, PartitionOffsets>>,
}

impl LagSnapshot {
    pub fn record(&mut self, topic: &str, partition: i32, offsets: PartitionOffsets) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(partition, offsets);
    }

    pub fn topic_lag(&self, topic: &str) -> u64 {
        self.topics
            .get(topic)
            .map(|parts| saturating_sum(parts.values()))
            .unwrap_or(0)
    }

    /// Sum across all partitions of all topics, saturating at `u64::MAX`.
    pub fn aggregate(&self) -> u64 {
        saturating_sum(self.topics.values().flat_map(|parts| parts.values()))
    }
}

fn saturating_sum<'a>(offsets: impl Iterator<Item = &'a PartitionOffsets>) -> u64 {
    offsets.fold(0u64, |acc, o| acc.saturating_add(o.lag()))
}
