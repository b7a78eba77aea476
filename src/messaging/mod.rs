// ============================================================================
// Messaging
// ============================================================================
//
// Everything that talks to the broker:
// - admin     - Kafka admin client (metadata probe, topic creation)
// - probe     - blocking readiness check with bounded retry
// - topics    - idempotent "ensure topic exists"
// - producer  - best-effort event publication
// - source    - consumer side of the broker (poll / commit / rewind)
// - consumer  - the background consumption loop
//
// ============================================================================

mod admin;
mod consumer;
mod probe;
mod producer;
mod source;
mod topics;

#[cfg(test)]
pub(crate) mod testing;

pub use admin::KafkaAdmin;
pub use consumer::{ConsumptionLoop, LoopConfig, LoopState};
pub use probe::{wait_for_broker, BrokerProbe, ProbeConfig, ProbeOutcome};
pub use producer::{EventProducer, KafkaSink, MessageSink, PublishOutcome};
pub use source::{ConsumerSettings, EventSource, InboundMessage, KafkaEventSource};
pub use topics::{ensure_topic, TopicAdmin, TopicOutcome, TopicSpec};

use rdkafka::error::KafkaError;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("topic already exists: {0}")]
    TopicAlreadyExists(String),

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}
