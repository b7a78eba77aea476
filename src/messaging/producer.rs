use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use uuid::Uuid;

use super::BrokerError;
use crate::events::{encode, EventPayload};
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

/// Raw send of a keyed UTF-8 payload to a topic
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, topic: &str, key: &str, payload: &str) -> Result<(), BrokerError>;
}

pub struct KafkaSink {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaSink {
    pub fn new(bootstrap_servers: &str, send_timeout: Duration) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", send_timeout.as_millis().to_string())
            .create()?;

        Ok(Self {
            producer,
            send_timeout,
        })
    }
}

#[async_trait]
impl MessageSink for KafkaSink {
    async fn send(&self, topic: &str, key: &str, payload: &str) -> Result<(), BrokerError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map_err(|(e, _)| BrokerError::Kafka(e))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// Logged and dropped; the caller's local write stands
    Failed,
}

/// Shared, best-effort event publisher
///
/// Built once at startup and handed to every write-path service. Failures
/// never reach the caller.
pub struct EventProducer {
    sink: Arc<dyn MessageSink>,
    circuit_breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
}

impl EventProducer {
    pub fn new(sink: Arc<dyn MessageSink>, metrics: Arc<Metrics>) -> Self {
        Self::with_circuit_breaker(sink, metrics, CircuitBreakerConfig::default())
    }

    pub fn with_circuit_breaker(
        sink: Arc<dyn MessageSink>,
        metrics: Arc<Metrics>,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            sink,
            circuit_breaker: CircuitBreaker::new(config),
            metrics,
        }
    }

    pub async fn publish<E: EventPayload>(&self, topic: &str, event: &E) -> PublishOutcome {
        let result = self.try_publish(topic, event).await;

        let state = self.circuit_breaker.state().await;
        self.metrics.circuit_breaker_state.set(match state {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        });

        match result {
            Ok(key) => {
                tracing::info!(
                    topic = %topic,
                    key = %key,
                    event_type = E::EVENT_TYPE,
                    event_id = %event.event_id(),
                    "Published to Kafka"
                );
                self.metrics.events_published.with_label_values(&[topic, "ok"]).inc();
                PublishOutcome::Published
            }
            Err(e) => {
                tracing::error!(
                    topic = %topic,
                    event_type = E::EVENT_TYPE,
                    event_id = %event.event_id(),
                    circuit = state.as_str(),
                    error = %e,
                    "Error publishing Kafka message"
                );
                self.metrics.events_published.with_label_values(&[topic, "error"]).inc();
                PublishOutcome::Failed
            }
        }
    }

    async fn try_publish<E: EventPayload>(
        &self,
        topic: &str,
        event: &E,
    ) -> Result<String, CircuitBreakerError<BrokerError>> {
        let payload = encode(event)
            .map_err(|e| CircuitBreakerError::OperationFailed(BrokerError::Serialization(e)))?;
        // Opaque key, no partitioning intent.
        let key = Uuid::new_v4().to_string();

        self.circuit_breaker
            .call(self.sink.send(topic, &key, &payload))
            .await?;
        Ok(key)
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state().await
    }
}
