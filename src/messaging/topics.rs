use std::sync::Arc;

use async_trait::async_trait;

use super::BrokerError;
use crate::metrics::Metrics;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

impl TopicSpec {
    /// Single partition, replication factor one
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 1,
            replication_factor: 1,
        }
    }
}

#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// True when metadata lists the topic by exact name without an error
    async fn topic_exists(&self, name: &str) -> Result<bool, BrokerError>;

    /// Create the topic; `BrokerError::TopicAlreadyExists` when it is there
    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), BrokerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicOutcome {
    AlreadyExists,
    Created,
    /// Another instance created it between our metadata check and create call
    CreatedConcurrently,
    /// Left for the broker to auto-create on first use
    Failed(String),
}

impl TopicOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicOutcome::AlreadyExists => "already_exists",
            TopicOutcome::Created => "created",
            TopicOutcome::CreatedConcurrently => "created_concurrently",
            TopicOutcome::Failed(_) => "failed",
        }
    }
}

/// Make sure `spec.name` exists; never fails the caller
pub async fn ensure_topic(admin: &dyn TopicAdmin, spec: &TopicSpec, metrics: &Arc<Metrics>) -> TopicOutcome {
    let outcome = provision(admin, spec).await;

    match &outcome {
        TopicOutcome::AlreadyExists => {
            tracing::info!(topic = %spec.name, "✅ Kafka topic already exists");
        }
        TopicOutcome::Created => {
            tracing::info!(
                topic = %spec.name,
                partitions = spec.partitions,
                replication_factor = spec.replication_factor,
                "Kafka topic created"
            );
        }
        TopicOutcome::CreatedConcurrently => {
            tracing::info!(topic = %spec.name, "Kafka topic was created concurrently");
        }
        TopicOutcome::Failed(reason) => {
            tracing::warn!(
                topic = %spec.name,
                reason = %reason,
                "Failed to provision Kafka topic, relying on broker auto-create"
            );
        }
    }

    metrics
        .topic_provisioning
        .with_label_values(&[outcome.as_str()])
        .inc();
    outcome
}

async fn provision(admin: &dyn TopicAdmin, spec: &TopicSpec) -> TopicOutcome {
    match admin.topic_exists(&spec.name).await {
        Ok(true) => return TopicOutcome::AlreadyExists,
        Ok(false) => {}
        Err(e) => return TopicOutcome::Failed(e.to_string()),
    }

    match admin.create_topic(spec).await {
        Ok(()) => TopicOutcome::Created,
        Err(BrokerError::TopicAlreadyExists(_)) => TopicOutcome::CreatedConcurrently,
        Err(e) => TopicOutcome::Failed(e.to_string()),
    }
}
