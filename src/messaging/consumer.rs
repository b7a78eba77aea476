use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::{wait_for_broker, BrokerError, BrokerProbe, EventSource, InboundMessage, ProbeConfig, ProbeOutcome};
use crate::events::{decode, EventPayload};
use crate::health::{HealthReporter, HealthStatus, CONSUMER_COMPONENT};
use crate::metrics::Metrics;
use crate::projection::Projector;

// ============================================================================
// Background Consumption Loop
// ============================================================================
//
// INIT -> WAIT_APP_STARTED -> WAIT_BROKER -> SUBSCRIBED -> {POLL <-> PROCESS} -> CLOSED
//
// One message is in flight at a time. An offset is committed only after the
// projection for that message returned; anything left uncommitted is rewound
// so the next poll sees it again.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct LoopConfig {
    pub topic: String,
    pub group_id: String,
    /// Pause between the start signal and the broker probe
    pub settle_delay: Duration,
    /// Pause between a successful projection and its commit; zero disables it
    pub commit_throttle: Duration,
    /// Pause before re-polling after a rewind, a poll error or a failed subscribe
    pub redelivery_delay: Duration,
    pub probe: ProbeConfig,
}

impl LoopConfig {
    pub fn new(topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group_id: group_id.into(),
            settle_delay: Duration::from_secs(2),
            commit_throttle: Duration::from_secs(1),
            redelivery_delay: Duration::from_secs(1),
            probe: ProbeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    WaitAppStarted,
    WaitBroker,
    Subscribed,
    Closed,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Init => "init",
            LoopState::WaitAppStarted => "wait_app_started",
            LoopState::WaitBroker => "wait_broker",
            LoopState::Subscribed => "subscribed",
            LoopState::Closed => "closed",
        }
    }
}

/// What to do with a message once processing finished
enum Disposition {
    Commit,
    /// Nothing to do and nothing to commit
    Ignore,
    /// Leave uncommitted and seek back to it
    Redeliver,
}

/// Releases the consumer however the loop ends
struct CloseOnDrop<'a, S: EventSource>(&'a S);

impl<S: EventSource> Drop for CloseOnDrop<'_, S> {
    fn drop(&mut self) {
        self.0.close();
    }
}

pub struct ConsumptionLoop<P: Projector> {
    projector: P,
    config: LoopConfig,
    metrics: Arc<Metrics>,
    health: HealthReporter,
}

impl<P: Projector> ConsumptionLoop<P> {
    pub fn new(projector: P, config: LoopConfig, metrics: Arc<Metrics>, health: HealthReporter) -> Self {
        Self {
            projector,
            config,
            metrics,
            health,
        }
    }

    /// Run the whole lifecycle until `shutdown` flips to true
    ///
    /// `subscribe` is called once the broker probe finished; it is retried
    /// after `redelivery_delay` for as long as it fails.
    pub async fn run<S, F>(
        self,
        probe: Arc<dyn BrokerProbe>,
        mut subscribe: F,
        mut started: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) -> LoopState
    where
        S: EventSource,
        F: FnMut() -> Result<S, BrokerError> + Send,
    {
        self.enter(LoopState::Init).await;
        self.enter(LoopState::WaitAppStarted).await;

        let started_ok = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stopped| *stopped) => false,
            result = started.wait_for(|ready| *ready) => result.is_ok(),
        };
        if !started_ok || !pause(self.config.settle_delay, &mut shutdown).await {
            return self.stop().await;
        }

        self.enter(LoopState::WaitBroker).await;
        let outcome = wait_for_broker(probe.as_ref(), &self.config.probe, &self.metrics, &mut shutdown).await;
        if outcome == ProbeOutcome::Cancelled {
            return self.stop().await;
        }

        let source = loop {
            match subscribe() {
                Ok(source) => break source,
                Err(e) => {
                    tracing::error!(
                        topic = %self.config.topic,
                        group_id = %self.config.group_id,
                        error = %e,
                        "Failed to subscribe, retrying"
                    );
                    self.health
                        .report(CONSUMER_COMPONENT, HealthStatus::Unhealthy(e.to_string()), None)
                        .await;
                    if !pause(self.config.redelivery_delay, &mut shutdown).await {
                        return self.stop().await;
                    }
                }
            }
        };

        self.enter(LoopState::Subscribed).await;
        self.consume(&source, &mut shutdown).await;
        self.stop().await
    }

    /// Poll and process until shutdown; closes `source` on the way out
    pub async fn consume<S: EventSource>(&self, source: &S, shutdown: &mut watch::Receiver<bool>) {
        let _guard = CloseOnDrop(source);
        let topic = self.config.topic.as_str();
        let mut degraded = false;

        loop {
            let polled = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stopped| *stopped) => return,
                polled = source.poll() => polled,
            };

            let message = match polled {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(topic = %topic, error = %e, "Error polling Kafka");
                    self.metrics.poll_errors.with_label_values(&[topic]).inc();
                    if !degraded {
                        degraded = true;
                        self.health
                            .report(CONSUMER_COMPONENT, HealthStatus::Degraded(e.to_string()), None)
                            .await;
                    }
                    if !pause(self.config.redelivery_delay, shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            if degraded {
                degraded = false;
                self.health.report(CONSUMER_COMPONENT, HealthStatus::Healthy, None).await;
            }

            match self.process(&message).await {
                Disposition::Ignore => {}
                Disposition::Redeliver => {
                    if !self.rewind(source, &message, shutdown).await {
                        return;
                    }
                    if !pause(self.config.redelivery_delay, shutdown).await {
                        return;
                    }
                }
                Disposition::Commit => {
                    if !pause(self.config.commit_throttle, shutdown).await {
                        tracing::info!(
                            topic = %topic,
                            offset = message.offset,
                            "Shutdown before commit, message will be redelivered"
                        );
                        return;
                    }
                    self.commit(source, &message);
                }
            }
        }
    }

    async fn process(&self, message: &InboundMessage) -> Disposition {
        let topic = self.config.topic.as_str();
        let started = Instant::now();

        let Some(payload) = message.payload.as_deref() else {
            tracing::warn!(topic = %topic, offset = message.offset, "Received empty message");
            self.metrics.record_consumed(topic, "empty", started.elapsed().as_secs_f64());
            return Disposition::Ignore;
        };

        let event: P::Event = match decode(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    topic = %topic,
                    offset = message.offset,
                    event_type = <P::Event as EventPayload>::EVENT_TYPE,
                    error = %e,
                    "Failed to decode message, leaving it uncommitted"
                );
                self.metrics.record_consumed(topic, "decode_failed", started.elapsed().as_secs_f64());
                return Disposition::Redeliver;
            }
        };

        tracing::debug!(
            topic = %topic,
            offset = message.offset,
            event_id = %event.event_id(),
            created_at = %event.created_at(),
            "Processing event"
        );

        match self.projector.project(&event).await {
            Ok(projection) => {
                self.metrics
                    .record_consumed(topic, projection.as_str(), started.elapsed().as_secs_f64());
                Disposition::Commit
            }
            Err(e) => {
                tracing::error!(
                    topic = %topic,
                    offset = message.offset,
                    event_id = %event.event_id(),
                    error = %e,
                    "Failed to project event, leaving it uncommitted"
                );
                self.metrics.record_consumed(topic, "storage_failed", started.elapsed().as_secs_f64());
                Disposition::Redeliver
            }
        }
    }

    /// Seek back to `message`, retrying until it works; false on shutdown
    ///
    /// Nothing past `message` may be polled before the seek lands, or a later
    /// commit would skip it.
    async fn rewind<S: EventSource>(
        &self,
        source: &S,
        message: &InboundMessage,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            match source.rewind(message) {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(
                        topic = %self.config.topic,
                        offset = message.offset,
                        error = %e,
                        "Failed to rewind to uncommitted message, retrying"
                    );
                    if !pause(self.config.redelivery_delay, shutdown).await {
                        return false;
                    }
                }
            }
        }
    }

    fn commit<S: EventSource>(&self, source: &S, message: &InboundMessage) {
        let topic = self.config.topic.as_str();

        match source.commit(message) {
            Ok(()) => {
                self.metrics.offsets_committed.with_label_values(&[topic]).inc();
                tracing::debug!(
                    topic = %topic,
                    partition = message.partition,
                    offset = message.offset,
                    "Committed offset"
                );
            }
            Err(e) => {
                // Projection is idempotent, so a redelivery after restart is harmless.
                tracing::warn!(
                    topic = %topic,
                    offset = message.offset,
                    error = %e,
                    "Failed to commit offset"
                );
            }
        }
    }

    async fn enter(&self, state: LoopState) {
        tracing::info!(
            topic = %self.config.topic,
            group_id = %self.config.group_id,
            state = state.as_str(),
            "Consumption loop state changed"
        );

        let status = match state {
            LoopState::Subscribed => HealthStatus::Healthy,
            LoopState::Closed => HealthStatus::Unhealthy("consumer closed".to_string()),
            _ => HealthStatus::Degraded("consumer starting".to_string()),
        };
        self.health
            .report(CONSUMER_COMPONENT, status, Some(state.as_str().to_string()))
            .await;
    }

    async fn stop(&self) -> LoopState {
        self.enter(LoopState::Closed).await;
        LoopState::Closed
    }
}

/// Sleep for `duration`; false when shutdown was requested first
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if duration.is_zero() {
        return !*shutdown.borrow();
    }

    tokio::select! {
        biased;
        _ = shutdown.wait_for(|stopped| *stopped) => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::events::{OrderCreatedEvent, UserCreatedEvent, ORDER_CREATED_TOPIC, USER_CREATED_TOPIC};
    use crate::messaging::testing::{FakeProbe, MemorySession, MemoryTopic, RecordingSink};
    use crate::messaging::EventProducer;
    use crate::models::{CreateOrderRequest, CreateUserRequest, Order, User, UserReplica};
    use crate::services::{OrderService, UserService};
    use crate::projection::{OrderReplicaProjector, UserReplicaProjector};
    use crate::storage::{InMemoryStore, OrderServiceStore, StorageError, StorageResult, UserServiceStore};

    /// Order-service store whose replica calls fail while `failing` is set
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn failing() -> Self {
            Self {
                inner: InMemoryStore::new(),
                failing: AtomicBool::new(true),
            }
        }

        fn check(&self) -> StorageResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl OrderServiceStore for FlakyStore {
        async fn insert_order(&self, order: &Order) -> StorageResult<()> {
            self.inner.insert_order(order).await
        }

        async fn find_order(&self, id: Uuid) -> StorageResult<Option<Order>> {
            self.inner.find_order(id).await
        }

        async fn list_orders(&self) -> StorageResult<Vec<Order>> {
            self.inner.list_orders().await
        }

        async fn user_replica_exists(&self, name: &str, email: &str) -> StorageResult<bool> {
            self.check()?;
            self.inner.user_replica_exists(name, email).await
        }

        async fn insert_user_replica(&self, replica: &UserReplica) -> StorageResult<()> {
            self.check()?;
            self.inner.insert_user_replica(replica).await
        }

        async fn list_user_replicas(&self) -> StorageResult<Vec<UserReplica>> {
            self.inner.list_user_replicas().await
        }
    }

    /// Session whose seek fails while `stuck` is set
    struct StuckSession {
        inner: MemorySession,
        stuck: Arc<AtomicBool>,
        rewinds: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventSource for StuckSession {
        async fn poll(&self) -> Result<Option<InboundMessage>, BrokerError> {
            self.inner.poll().await
        }

        fn commit(&self, message: &InboundMessage) -> Result<(), BrokerError> {
            self.inner.commit(message)
        }

        fn rewind(&self, message: &InboundMessage) -> Result<(), BrokerError> {
            self.rewinds.fetch_add(1, Ordering::SeqCst);
            if self.stuck.load(Ordering::SeqCst) {
                return Err(BrokerError::Unavailable("seek timed out".to_string()));
            }
            self.inner.rewind(message)
        }

        fn close(&self) {
            self.inner.close();
        }
    }

    fn quick_config(topic: &str) -> LoopConfig {
        LoopConfig {
            settle_delay: Duration::ZERO,
            commit_throttle: Duration::ZERO,
            redelivery_delay: Duration::from_millis(5),
            probe: ProbeConfig {
                max_attempts: 5,
                delay: Duration::from_millis(1),
                attempt_timeout: Duration::from_millis(10),
            },
            ..LoopConfig::new(topic, "test-group")
        }
    }

    fn user_loop<S: OrderServiceStore + 'static>(
        store: Arc<S>,
        config: LoopConfig,
    ) -> ConsumptionLoop<UserReplicaProjector<S>> {
        ConsumptionLoop::new(
            UserReplicaProjector::new(store),
            config,
            Arc::new(Metrics::new().unwrap()),
            HealthReporter::detached(),
        )
    }

    async fn eventually(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_identical_event_twice_creates_one_replica() {
        let topic = MemoryTopic::new(USER_CREATED_TOPIC);
        let event = UserCreatedEvent::new(Uuid::new_v4(), "Alice", "alice@example.com");
        topic.push_event(&event);
        topic.push_event(&event);

        let store = Arc::new(InMemoryStore::new());
        let consumer = user_loop(store.clone(), quick_config(USER_CREATED_TOPIC));
        let (tx, mut shutdown) = watch::channel(false);
        let session = topic.session();
        let handle = tokio::spawn(async move { consumer.consume(&session, &mut shutdown).await });

        eventually(|| topic.committed() == 2).await;
        assert_eq!(store.list_user_replicas().await.unwrap().len(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(topic.closed_sessions(), 1);
    }

    #[tokio::test]
    async fn test_orphan_order_is_committed_and_next_is_processed() {
        let store = Arc::new(InMemoryStore::new());
        let user = User {
            id: Uuid::new_v4(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            created_at: Utc::now(),
        };
        store.insert_user(&user).await.unwrap();

        let topic = MemoryTopic::new(ORDER_CREATED_TOPIC);
        let orphan = OrderCreatedEvent::new(Uuid::new_v4(), Uuid::new_v4(), "Lamp", 1, 20.0);
        let valid = OrderCreatedEvent::new(Uuid::new_v4(), user.id, "Desk", 1, 150.0);
        topic.push_event(&orphan);
        topic.push_event(&valid);

        let consumer = ConsumptionLoop::new(
            OrderReplicaProjector::new(store.clone()),
            quick_config(ORDER_CREATED_TOPIC),
            Arc::new(Metrics::new().unwrap()),
            HealthReporter::detached(),
        );
        let (tx, mut shutdown) = watch::channel(false);
        let session = topic.session();
        let handle = tokio::spawn(async move { consumer.consume(&session, &mut shutdown).await });

        eventually(|| topic.committed() == 2).await;
        let replicas = store.list_order_replicas().await.unwrap();
        assert_eq!(replicas.len(), 1);
        assert_eq!(replicas[0].order_id, valid.order_id);
        assert_eq!(topic.deliveries_of(0), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_storage_failure_holds_offset_until_recovery() {
        let topic = MemoryTopic::new(USER_CREATED_TOPIC);
        topic.push_event(&UserCreatedEvent::new(Uuid::new_v4(), "Bob", "bob@example.com"));

        let store = Arc::new(FlakyStore::failing());
        let consumer = user_loop(store.clone(), quick_config(USER_CREATED_TOPIC));
        let (tx, mut shutdown) = watch::channel(false);
        let session = topic.session();
        let handle = tokio::spawn(async move { consumer.consume(&session, &mut shutdown).await });

        eventually(|| topic.deliveries_of(0) >= 3).await;
        assert_eq!(topic.committed(), 0);

        store.failing.store(false, Ordering::SeqCst);
        eventually(|| topic.committed() == 1).await;
        assert_eq!(store.list_user_replicas().await.unwrap().len(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_redelivers_uncommitted_message() {
        let topic = MemoryTopic::new(USER_CREATED_TOPIC);
        topic.push_event(&UserCreatedEvent::new(Uuid::new_v4(), "Bob", "bob@example.com"));
        let store = Arc::new(FlakyStore::failing());

        let first = user_loop(store.clone(), quick_config(USER_CREATED_TOPIC));
        let (tx, mut shutdown) = watch::channel(false);
        let session = topic.session();
        let handle = tokio::spawn(async move { first.consume(&session, &mut shutdown).await });
        eventually(|| topic.deliveries_of(0) >= 1).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(topic.committed(), 0);

        store.failing.store(false, Ordering::SeqCst);
        let second = user_loop(store.clone(), quick_config(USER_CREATED_TOPIC));
        let (tx, mut shutdown) = watch::channel(false);
        let session = topic.session();
        let handle = tokio::spawn(async move { second.consume(&session, &mut shutdown).await });
        eventually(|| topic.committed() == 1).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(topic.deliveries_of(0) >= 2);
        assert_eq!(store.list_user_replicas().await.unwrap().len(), 1);
        assert_eq!(topic.closed_sessions(), 2);
    }

    #[tokio::test]
    async fn test_poison_message_is_redelivered_and_blocks_later_commits() {
        let topic = MemoryTopic::new(USER_CREATED_TOPIC);
        topic.push(b"{not json");
        topic.push_event(&UserCreatedEvent::new(Uuid::new_v4(), "Carol", "carol@example.com"));

        let store = Arc::new(InMemoryStore::new());
        let consumer = user_loop(store.clone(), quick_config(USER_CREATED_TOPIC));
        let (tx, mut shutdown) = watch::channel(false);
        let session = topic.session();
        let handle = tokio::spawn(async move { consumer.consume(&session, &mut shutdown).await });

        eventually(|| topic.deliveries_of(0) >= 3).await;
        assert_eq!(topic.committed(), 0);
        assert_eq!(topic.deliveries_of(1), 0);
        assert!(store.list_user_replicas().await.unwrap().is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_message_is_passed_over() {
        let topic = MemoryTopic::new(USER_CREATED_TOPIC);
        topic.push_empty();
        topic.push_event(&UserCreatedEvent::new(Uuid::new_v4(), "Dan", "dan@example.com"));

        let store = Arc::new(InMemoryStore::new());
        let consumer = user_loop(store.clone(), quick_config(USER_CREATED_TOPIC));
        let (tx, mut shutdown) = watch::channel(false);
        let session = topic.session();
        let handle = tokio::spawn(async move { consumer.consume(&session, &mut shutdown).await });

        eventually(|| topic.committed() == 2).await;
        assert_eq!(topic.deliveries_of(0), 1);
        assert_eq!(store.list_user_replicas().await.unwrap().len(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_during_throttle_leaves_message_uncommitted() {
        let topic = MemoryTopic::new(USER_CREATED_TOPIC);
        topic.push_event(&UserCreatedEvent::new(Uuid::new_v4(), "Eve", "eve@example.com"));

        let store = Arc::new(InMemoryStore::new());
        let config = LoopConfig {
            commit_throttle: Duration::from_secs(3600),
            ..quick_config(USER_CREATED_TOPIC)
        };
        let consumer = user_loop(store.clone(), config);
        let (tx, mut shutdown) = watch::channel(false);
        let session = topic.session();
        let handle = tokio::spawn(async move { consumer.consume(&session, &mut shutdown).await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.list_user_replicas().await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("replica never written");

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(topic.committed(), 0);
        assert_eq!(topic.closed_sessions(), 1);
    }

    #[tokio::test]
    async fn test_full_lifecycle_waits_for_start_signal() {
        let topic = MemoryTopic::new(USER_CREATED_TOPIC);
        topic.push_event(&UserCreatedEvent::new(Uuid::new_v4(), "Alice", "alice@example.com"));

        let store = Arc::new(InMemoryStore::new());
        let consumer = user_loop(store.clone(), quick_config(USER_CREATED_TOPIC));
        let probe = Arc::new(FakeProbe::failing_first(2));
        let (started_tx, started) = watch::channel(false);
        let (tx, shutdown) = watch::channel(false);

        let source_topic = topic.clone();
        let handle = tokio::spawn(consumer.run(
            probe.clone(),
            move || Ok(source_topic.session()),
            started,
            shutdown,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.calls(), 0);
        assert_eq!(topic.deliveries_of(0), 0);

        started_tx.send(true).unwrap();
        eventually(|| topic.committed() == 1).await;
        assert_eq!(probe.calls(), 3);

        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), LoopState::Closed);
        assert_eq!(topic.closed_sessions(), 1);
        assert_eq!(store.list_user_replicas().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_is_retried_until_it_succeeds() {
        let topic = MemoryTopic::new(USER_CREATED_TOPIC);
        topic.push_event(&UserCreatedEvent::new(Uuid::new_v4(), "Alice", "alice@example.com"));

        let consumer = user_loop(Arc::new(InMemoryStore::new()), quick_config(USER_CREATED_TOPIC));
        let (_started_tx, started) = watch::channel(true);
        let (tx, shutdown) = watch::channel(false);

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let source_topic = topic.clone();
        let subscribe = move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BrokerError::Unavailable("group coordinator not available".to_string()))
            } else {
                Ok(source_topic.session())
            }
        };

        let handle = tokio::spawn(consumer.run(Arc::new(FakeProbe::ready()), subscribe, started, shutdown));

        eventually(|| topic.committed() == 1).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), LoopState::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_never_subscribes() {
        let consumer = user_loop(Arc::new(InMemoryStore::new()), quick_config(USER_CREATED_TOPIC));
        let (_started_tx, started) = watch::channel(false);
        let (tx, shutdown) = watch::channel(false);
        tx.send(true).unwrap();

        let probe = Arc::new(FakeProbe::ready());
        let subscribed = Arc::new(AtomicBool::new(false));
        let flag = subscribed.clone();
        let state = consumer
            .run(
                probe.clone(),
                move || {
                    flag.store(true, Ordering::SeqCst);
                    Ok(MemoryTopic::new(USER_CREATED_TOPIC).session())
                },
                started,
                shutdown,
            )
            .await;

        assert_eq!(state, LoopState::Closed);
        assert_eq!(probe.calls(), 0);
        assert!(!subscribed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_rewind_holds_later_messages_back() {
        let topic = MemoryTopic::new(USER_CREATED_TOPIC);
        topic.push_event(&UserCreatedEvent::new(Uuid::new_v4(), "Bob", "bob@example.com"));
        topic.push_event(&UserCreatedEvent::new(Uuid::new_v4(), "Carol", "carol@example.com"));

        let store = Arc::new(FlakyStore::failing());
        let consumer = user_loop(store.clone(), quick_config(USER_CREATED_TOPIC));
        let stuck = Arc::new(AtomicBool::new(true));
        let rewinds = Arc::new(AtomicUsize::new(0));
        let session = StuckSession {
            inner: topic.session(),
            stuck: stuck.clone(),
            rewinds: rewinds.clone(),
        };
        let (tx, mut shutdown) = watch::channel(false);
        let handle = tokio::spawn(async move { consumer.consume(&session, &mut shutdown).await });

        eventually(|| rewinds.load(Ordering::SeqCst) >= 3).await;
        assert_eq!(topic.committed(), 0);
        assert_eq!(topic.deliveries_of(1), 0);

        store.failing.store(false, Ordering::SeqCst);
        stuck.store(false, Ordering::SeqCst);
        eventually(|| topic.committed() == 2).await;

        let replicas = store.list_user_replicas().await.unwrap();
        let names: Vec<&str> = replicas.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Bob", "Carol"]);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_created_user_reaches_order_service_replicas() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = Arc::new(Metrics::new().unwrap());
        let producer = Arc::new(EventProducer::new(sink.clone(), metrics.clone()));
        let users = UserService::new(Arc::new(InMemoryStore::new()), producer.clone());

        let alice = users
            .create(CreateUserRequest {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
            })
            .await
            .unwrap();

        let topic = MemoryTopic::new(USER_CREATED_TOPIC);
        for message in sink.sent() {
            assert_eq!(message.topic, USER_CREATED_TOPIC);
            topic.push(message.payload.as_bytes());
        }

        let order_store = Arc::new(InMemoryStore::new());
        let orders = OrderService::new(order_store.clone(), producer);
        let consumer = user_loop(order_store, quick_config(USER_CREATED_TOPIC));
        let (tx, mut shutdown) = watch::channel(false);
        let session = topic.session();
        let handle = tokio::spawn(async move { consumer.consume(&session, &mut shutdown).await });

        eventually(|| topic.committed() == 1).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let replicas = orders.replicated_users().await.unwrap();
        assert_eq!(replicas.len(), 1);
        assert_eq!(replicas[0].user_id, alice.id);
        assert_eq!(replicas[0].name, "Alice");
        assert_eq!(replicas[0].email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_created_order_reaches_user_service_replicas() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = Arc::new(Metrics::new().unwrap());
        let producer = Arc::new(EventProducer::new(sink.clone(), metrics.clone()));

        let user_store = Arc::new(InMemoryStore::new());
        let users = UserService::new(user_store.clone(), producer.clone());
        let alice = users
            .create(CreateUserRequest {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
            })
            .await
            .unwrap();

        let orders = OrderService::new(Arc::new(InMemoryStore::new()), producer);
        let order = orders
            .create(CreateOrderRequest {
                user_id: alice.id,
                product: "Desk".to_string(),
                quantity: 2,
                price: 149.5,
            })
            .await
            .unwrap();

        let topic = MemoryTopic::new(ORDER_CREATED_TOPIC);
        for message in sink.sent().iter().filter(|m| m.topic == ORDER_CREATED_TOPIC) {
            topic.push(message.payload.as_bytes());
        }

        let consumer = ConsumptionLoop::new(
            OrderReplicaProjector::new(user_store),
            quick_config(ORDER_CREATED_TOPIC),
            metrics,
            HealthReporter::detached(),
        );
        let (tx, mut shutdown) = watch::channel(false);
        let session = topic.session();
        let handle = tokio::spawn(async move { consumer.consume(&session, &mut shutdown).await });

        eventually(|| topic.committed() == 1).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let replicas = users.replicated_orders().await.unwrap();
        assert_eq!(replicas.len(), 1);
        assert_eq!(replicas[0].order_id, order.id);
        assert_eq!(replicas[0].user_id, alice.id);
        assert_eq!(replicas[0].quantity, 2);
    }
}
