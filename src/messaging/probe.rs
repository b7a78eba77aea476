use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::BrokerError;
use crate::metrics::Metrics;
use crate::utils::{retry_with_backoff, RetryConfig, RetryResult};

/// Lightweight reachability check against the broker
#[async_trait]
pub trait BrokerProbe: Send + Sync {
    /// Fetch cluster metadata, returning the number of brokers seen
    async fn fetch_metadata(&self, timeout: Duration) -> Result<usize, BrokerError>;
}

#[derive(Clone, Debug)]
pub struct ProbeConfig {
    pub max_attempts: u32,
    pub delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(3),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    /// Every attempt failed; startup carries on regardless
    Exhausted,
    Cancelled,
}

/// Block until the broker answers a metadata request, or attempts run out
pub async fn wait_for_broker(
    probe: &dyn BrokerProbe,
    config: &ProbeConfig,
    metrics: &Arc<Metrics>,
    shutdown: &mut watch::Receiver<bool>,
) -> ProbeOutcome {
    let retry = RetryConfig::fixed(config.max_attempts, config.delay);

    let attempts = retry_with_backoff(retry, |attempt| async move {
        let result = probe.fetch_metadata(config.attempt_timeout).await;
        let label = if result.is_ok() { "ok" } else { "error" };
        metrics.broker_probe_attempts.with_label_values(&[label]).inc();

        if let Err(ref e) = result {
            tracing::warn!(
                attempt = attempt,
                max_attempts = config.max_attempts,
                error = %e,
                "Broker not ready yet"
            );
        }
        result
    });

    tokio::select! {
        biased;
        _ = shutdown.wait_for(|stopped| *stopped) => ProbeOutcome::Cancelled,
        result = attempts => match result {
            RetryResult::Success(brokers) => {
                tracing::info!(brokers = brokers, "✅ Broker is available");
                ProbeOutcome::Ready
            }
            RetryResult::Failed(e) => {
                tracing::error!(
                    max_attempts = config.max_attempts,
                    error = %e,
                    "Broker failed to become available, continuing without it"
                );
                ProbeOutcome::Exhausted
            }
        },
    }
}
