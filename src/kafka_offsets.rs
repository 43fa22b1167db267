// Kafka-backed OffsetSource via rdkafka. librdkafka calls block, so each one
// runs on the blocking pool.

use crate::broker::OffsetSource;
use crate::config::KafkaConfig;
use crate::error::BrokerError;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;

pub struct KafkaOffsets {
    consumer: Arc<BaseConsumer>,
    timeout: Duration,
}

impl KafkaOffsets {
    /// Creates the client; no connection is made until the first request.
    /// The consumer never subscribes, so it never joins or rebalances the group.
    pub fn connect(config: &KafkaConfig) -> anyhow::Result<Self> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .create()?;
        Ok(Self {
            consumer: Arc::new(consumer),
            timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, BrokerError>
    where
        F: FnOnce(&BaseConsumer, Duration) -> Result<T, BrokerError> + Send + 'static,
        T: Send + 'static,
    {
        let consumer = self.consumer.clone();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || f(&consumer, timeout))
            .await
            .map_err(|e| BrokerError::Task(e.to_string()))?
    }
}

#[async_trait]
impl OffsetSource for KafkaOffsets {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError> {
        let topic = topic.to_string();
        self.blocking(move |consumer, timeout| {
            let metadata = consumer
                .fetch_metadata(Some(topic.as_str()), timeout)
                .map_err(|e| classify(&topic, e))?;
            // A topic that does not exist yet comes back with no partitions.
            Ok(metadata
                .topics()
                .iter()
                .filter(|t| t.name() == topic)
                .flat_map(|t| t.partitions().iter().map(|p| p.id()))
                .collect())
        })
        .await
    }

    async fn end_offset(&self, topic: &str, partition: i32) -> Result<i64, BrokerError> {
        let topic = topic.to_string();
        self.blocking(move |consumer, timeout| {
            let (_low, high) = consumer
                .fetch_watermarks(&topic, partition, timeout)
                .map_err(|e| classify(&topic, e))?;
            Ok(high)
        })
        .await
    }

    async fn committed_offset(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>, BrokerError> {
        let topic = topic.to_string();
        self.blocking(move |consumer, timeout| {
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition(&topic, partition);
            let committed = consumer
                .committed_offsets(tpl, timeout)
                .map_err(|e| classify(&topic, e))?;
            let offset = committed
                .find_partition(&topic, partition)
                .map(|elem| elem.offset());
            Ok(match offset {
                Some(Offset::Offset(o)) => Some(o),
                _ => None,
            })
        })
        .await
    }
}

fn classify(topic: &str, e: KafkaError) -> BrokerError {
    if is_connectivity(e.rdkafka_error_code()) {
        BrokerError::Unreachable(e.to_string())
    } else {
        BrokerError::Topic {
            topic: topic.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Error codes that mean the broker itself could not be reached.
fn is_connectivity(code: Option<RDKafkaErrorCode>) -> bool {
    matches!(
        code,
        Some(
            RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::Resolve
        )
    )
}
