use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};

use super::BrokerError;

/// A message detached from the consumer that delivered it
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
}

/// Consumer side of the broker, bound to one topic and one group
///
/// Used by a single loop; polls are never issued concurrently.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Wait for the next message; `None` when nothing was delivered
    async fn poll(&self) -> Result<Option<InboundMessage>, BrokerError>;

    /// Mark `message` as processed for the group
    fn commit(&self, message: &InboundMessage) -> Result<(), BrokerError>;

    /// Seek back so the next poll returns `message` again
    fn rewind(&self, message: &InboundMessage) -> Result<(), BrokerError>;

    /// Release the connection; called exactly once when the loop ends
    fn close(&self);
}

#[derive(Clone, Debug)]
pub struct ConsumerSettings {
    pub bootstrap_servers: String,
    pub topic: String,
    pub group_id: String,
}

pub struct KafkaEventSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaEventSource {
    const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn subscribe(settings: &ConsumerSettings) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.bootstrap_servers)
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("allow.auto.create.topics", "true")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "30000")
            .create()?;

        consumer.subscribe(&[&settings.topic])?;

        tracing::info!(
            topic = %settings.topic,
            group_id = %settings.group_id,
            bootstrap_servers = %settings.bootstrap_servers,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: settings.topic.clone(),
        })
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn poll(&self) -> Result<Option<InboundMessage>, BrokerError> {
        let message = self.consumer.recv().await?;

        Ok(Some(InboundMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(|p| p.to_vec()),
        }))
    }

    fn commit(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        // The committed offset is the next one to read.
        let mut partitions = TopicPartitionList::new();
        partitions.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )?;
        self.consumer.commit(&partitions, CommitMode::Sync)?;
        Ok(())
    }

    fn rewind(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        self.consumer.seek(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset),
            Self::SEEK_TIMEOUT,
        )?;
        Ok(())
    }

    fn close(&self) {
        self.consumer.unsubscribe();
        tracing::info!(topic = %self.topic, "Kafka consumer closed");
    }
}
