//! In-process stand-ins for the broker, shared by tests across the crate.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{BrokerError, BrokerProbe, EventSource, InboundMessage, MessageSink, TopicAdmin, TopicSpec};
use crate::events::{encode, EventPayload};

/// Probe that fails a fixed number of times before answering
pub struct FakeProbe {
    fail_first: u32,
    calls: AtomicU32,
}

impl FakeProbe {
    pub fn ready() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(fail_first: u32) -> Self {
        Self {
            fail_first,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerProbe for FakeProbe {
    async fn fetch_metadata(&self, _timeout: Duration) -> Result<usize, BrokerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            Err(BrokerError::Unavailable("connection refused".to_string()))
        } else {
            Ok(1)
        }
    }
}

#[derive(Default)]
pub struct FakeAdmin {
    topics: Mutex<HashSet<String>>,
    racing: bool,
    unreachable: bool,
    create_calls: AtomicUsize,
}

impl FakeAdmin {
    /// Metadata never lists the topic, but creation reports it exists
    pub fn racing() -> Self {
        Self {
            racing: true,
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TopicAdmin for FakeAdmin {
    async fn topic_exists(&self, name: &str) -> Result<bool, BrokerError> {
        if self.unreachable {
            return Err(BrokerError::Unavailable("metadata request timed out".to_string()));
        }
        if self.racing {
            return Ok(false);
        }
        Ok(self.topics.lock().unwrap().contains(name))
    }

    async fn create_topic(&self, spec: &TopicSpec) -> Result<(), BrokerError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.racing || !self.topics.lock().unwrap().insert(spec.name.clone()) {
            return Err(BrokerError::TopicAlreadyExists(spec.name.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub topic: String,
    pub key: String,
    pub payload: String,
}

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<SentMessage>>,
    failing: bool,
    attempts: AtomicUsize,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, topic: &str, key: &str, payload: &str) -> Result<(), BrokerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(BrokerError::Unavailable("broker down".to_string()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }
}

#[derive(Default)]
struct TopicLog {
    messages: Vec<Option<Vec<u8>>>,
    committed: i64,
    deliveries: Vec<i64>,
    closed: usize,
}

/// Single-partition topic with one consumer group's committed offset
#[derive(Clone)]
pub struct MemoryTopic {
    name: String,
    log: Arc<Mutex<TopicLog>>,
}

impl MemoryTopic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log: Arc::new(Mutex::new(TopicLog::default())),
        }
    }

    pub fn push(&self, payload: &[u8]) {
        self.log.lock().unwrap().messages.push(Some(payload.to_vec()));
    }

    pub fn push_event<E: EventPayload>(&self, event: &E) {
        self.push(encode(event).unwrap().as_bytes());
    }

    /// A record without a value
    pub fn push_empty(&self) {
        self.log.lock().unwrap().messages.push(None);
    }

    /// Next offset the group will read after a restart
    pub fn committed(&self) -> i64 {
        self.log.lock().unwrap().committed
    }

    /// How many times `offset` was handed to a consumer
    pub fn deliveries_of(&self, offset: i64) -> usize {
        let log = self.log.lock().unwrap();
        log.deliveries.iter().filter(|o| **o == offset).count()
    }

    pub fn closed_sessions(&self) -> usize {
        self.log.lock().unwrap().closed
    }

    /// A fresh consumer positioned at the committed offset
    pub fn session(&self) -> MemorySession {
        let committed = self.committed();
        MemorySession {
            topic: self.clone(),
            position: Mutex::new(committed),
        }
    }
}

pub struct MemorySession {
    topic: MemoryTopic,
    position: Mutex<i64>,
}

#[async_trait]
impl EventSource for MemorySession {
    async fn poll(&self) -> Result<Option<InboundMessage>, BrokerError> {
        let delivered = {
            let mut log = self.topic.log.lock().unwrap();
            let mut position = self.position.lock().unwrap();
            let next = *position;

            match log.messages.get(next as usize).cloned() {
                Some(payload) => {
                    *position += 1;
                    log.deliveries.push(next);
                    Some(InboundMessage {
                        topic: self.topic.name.clone(),
                        partition: 0,
                        offset: next,
                        key: Some(format!("key-{}", next)),
                        payload,
                    })
                }
                None => None,
            }
        };

        if delivered.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(delivered)
    }

    fn commit(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        let mut log = self.topic.log.lock().unwrap();
        log.committed = log.committed.max(message.offset + 1);
        Ok(())
    }

    fn rewind(&self, message: &InboundMessage) -> Result<(), BrokerError> {
        *self.position.lock().unwrap() = message.offset;
        Ok(())
    }

    fn close(&self) {
        self.topic.log.lock().unwrap().closed += 1;
    }
}
