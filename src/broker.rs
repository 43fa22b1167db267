//! Read-only view of broker offsets.

use async_trait::async_trait;

use crate::error::BrokerError;

#[async_trait]
pub trait OffsetSource: Send + Sync {
    /// Partition ids of `topic`; empty when the topic does not exist yet.
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError>;

    /// Log end offset (high watermark) of one partition.
    async fn end_offset(&self, topic: &str, partition: i32) -> Result<i64, BrokerError>;

    /// Offset committed by the configured consumer group, if any.
    async fn committed_offset(&self, topic: &str, partition: i32)
    -> Result<Option<i64>, BrokerError>;
}
