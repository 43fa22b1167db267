// Consumer-group backlog across the monitored topics.

use crate::broker::OffsetSource;
use crate::error::{BrokerError, MeasurementError};
use crate::models::{LagSnapshot, PartitionOffsets};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Result of one measurement. An unavailable reading counts as zero lag:
/// better to not scale up than to scale on bad data.
#[derive(Debug)]
pub enum LagReading {
    Measured(LagSnapshot),
    Unavailable(MeasurementError),
}

impl LagReading {
    pub fn aggregate(&self) -> u64 {
        match self {
            LagReading::Measured(snapshot) => snapshot.aggregate(),
            LagReading::Unavailable(_) => 0,
        }
    }
}

pub struct LagMonitor {
    source: Arc<dyn OffsetSource>,
}

impl LagMonitor {
    pub fn new(source: Arc<dyn OffsetSource>) -> Self {
        Self { source }
    }

    /// Never fails: topic-scoped errors skip the topic, connectivity errors
    /// abandon the whole reading.
    #[instrument(skip(self, topics), fields(topics = topics.len()))]
    pub async fn measure(&self, topics: &[String]) -> LagReading {
        let mut snapshot = LagSnapshot::default();
        for topic in topics {
            match self.measure_topic(topic, &mut snapshot).await {
                Ok(()) => {}
                Err(BrokerError::Topic { topic, reason }) => {
                    warn!(topic = %topic, reason = %reason, "skipping topic");
                }
                Err(e) => {
                    warn!(error = %e, operation = "measure_lag", "broker unavailable; treating lag as 0");
                    return LagReading::Unavailable(MeasurementError(e));
                }
            }
        }
        debug!(lag = snapshot.aggregate(), "lag measured");
        LagReading::Measured(snapshot)
    }

    async fn measure_topic(
        &self,
        topic: &str,
        snapshot: &mut LagSnapshot,
    ) -> Result<(), BrokerError> {
        let partitions = self.source.partitions(topic).await?;
        if partitions.is_empty() {
            debug!(topic = %topic, "topic has no partitions yet");
            return Ok(());
        }
        // Record only after every partition answered, so a skipped topic
        // contributes nothing rather than a partial sum.
        let mut offsets = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let end = self.source.end_offset(topic, partition).await?;
            let committed = self
                .source
                .committed_offset(topic, partition)
                .await?
                .unwrap_or(0);
            offsets.push((partition, PartitionOffsets { end, committed }));
        }
        for (partition, o) in offsets {
            snapshot.record(topic, partition, o);
        }
        Ok(())
    }
}
