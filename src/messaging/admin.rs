use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::metadata::Metadata;
use rdkafka::types::RDKafkaErrorCode;

use super::{BrokerError, BrokerProbe, TopicAdmin, TopicSpec};

/// Kafka admin operations against one bootstrap address
///
/// A fresh admin client is created per call; these run a handful of times at
/// startup only.
#[derive(Clone, Debug)]
pub struct KafkaAdmin {
    bootstrap_servers: String,
    request_timeout: Duration,
}

impl KafkaAdmin {
    pub fn new(bootstrap_servers: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            request_timeout,
        }
    }

    fn client(bootstrap_servers: &str, timeout: Duration) -> Result<AdminClient<DefaultClientContext>, BrokerError> {
        let client = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("request.timeout.ms", timeout.as_millis().to_string())
            .create()?;
        Ok(client)
    }

    /// Metadata fetch is a blocking librdkafka call
    async fn metadata(&self, timeout: Duration) -> Result<Metadata, BrokerError> {
        let bootstrap_servers = self.bootstrap_servers.clone();

        tokio::task::spawn_blocking(move || {
            let admin = Self::client(&bootstrap_servers, timeout)?;
            let metadata = admin.inner().fetch_metadata(None, timeout)?;
            Ok(metadata)
        })
        .await
        .map_err(|e| BrokerError::Unavailable(format!("metadata task failed: {}", e)))?
    }
}

#[async_trait]
impl BrokerProbe for KafkaAdmin {
    async fn fetch_metadata(&self, timeout: Duration) -> Result<usize, BrokerError> {
        let metadata = self.metadata(timeout).await?;
        let brokers = metadata.brokers().len();
        if brokers == 0 {
            return Err(BrokerError::Unavailable("no brokers in cluster metadata".to_string()));
        }
        Ok(brokers)
    }
}

#[async_trait]
impl TopicAdmin for KafkaAdmin {
    async fn topic_exists(&self, name: &str) -> Result<bool, BrokerError> {
        let metadata = self.metadata(self.request_timeout).await?;
        Ok(metadata
            .topics()
            .iter()
            .any(|topic| topic.name() == name && topic.error().is_none()))
    }

    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), BrokerError> {
        let admin = Self::client(&self.bootstrap_servers, self.request_timeout)?;
        let new_topic = NewTopic::new(
            &spec.name,
            spec.partitions,
            TopicReplication::Fixed(spec.replication_factor),
        );
        let options = AdminOptions::new().operation_timeout(Some(self.request_timeout));

        let results = admin.create_topics([&new_topic], &options).await?;
        for result in results {
            match result {
                Ok(_) => {}
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Err(BrokerError::TopicAlreadyExists(name));
                }
                Err((name, code)) => {
                    return Err(BrokerError::Unavailable(format!(
                        "create topic '{}' failed: {}",
                        name, code
                    )));
                }
            }
        }
        Ok(())
    }
}
