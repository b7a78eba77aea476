use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Broker readiness probing and topic provisioning
// - Event publishing and the producer circuit breaker
// - Event consumption, projection latency and offset commits
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for one service instance
pub struct Metrics {
    registry: Registry,

    // Startup
    pub broker_probe_attempts: IntCounterVec,
    pub topic_provisioning: IntCounterVec,

    // Producer
    pub events_published: IntCounterVec,
    pub circuit_breaker_state: IntGauge,

    // Consumer
    pub events_consumed: IntCounterVec,
    pub event_processing_duration: HistogramVec,
    pub offsets_committed: IntCounterVec,
    pub poll_errors: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let broker_probe_attempts = IntCounterVec::new(
            Opts::new("broker_probe_attempts_total", "Broker metadata probe attempts"),
            &["result"],
        )?;
        registry.register(Box::new(broker_probe_attempts.clone()))?;

        let topic_provisioning = IntCounterVec::new(
            Opts::new("topic_provisioning_total", "Topic provisioning outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(topic_provisioning.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new("events_published_total", "Events handed to the broker"),
            &["topic", "result"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Producer circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let events_consumed = IntCounterVec::new(
            Opts::new("events_consumed_total", "Consumed events by processing outcome"),
            &["topic", "outcome"],
        )?;
        registry.register(Box::new(events_consumed.clone()))?;

        let event_processing_duration = HistogramVec::new(
            HistogramOpts::new("event_processing_duration_seconds", "Decode and projection duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["topic"],
        )?;
        registry.register(Box::new(event_processing_duration.clone()))?;

        let offsets_committed = IntCounterVec::new(
            Opts::new("offsets_committed_total", "Offsets committed for the consumer group"),
            &["topic"],
        )?;
        registry.register(Box::new(offsets_committed.clone()))?;

        let poll_errors = IntCounterVec::new(
            Opts::new("poll_errors_total", "Transport errors while polling"),
            &["topic"],
        )?;
        registry.register(Box::new(poll_errors.clone()))?;

        Ok(Self {
            registry,
            broker_probe_attempts,
            topic_provisioning,
            events_published,
            circuit_breaker_state,
            events_consumed,
            event_processing_duration,
            offsets_committed,
            poll_errors,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record one processed message
    pub fn record_consumed(&self, topic: &str, outcome: &str, duration_secs: f64) {
        self.events_consumed.with_label_values(&[topic, outcome]).inc();
        self.event_processing_duration
            .with_label_values(&[topic])
            .observe(duration_secs);
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
