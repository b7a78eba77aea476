use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use kameo::reply::{Reply, ReplyError};
use kameo::Actor;
use serde::Serialize;

use super::{overall_status, ComponentHealth, HealthStatus};
use crate::messaging::EventProducer;
use crate::utils::CircuitState;

// ============================================================================
// Health Monitor Actor
// ============================================================================
//
// Collects component health reported by the consumption loop and startup
// code, and polls the producer's circuit breaker for the broker component.
//
// ============================================================================

pub const BROKER_COMPONENT: &str = "broker";
pub const CONSUMER_COMPONENT: &str = "consumer";
pub const STORAGE_COMPONENT: &str = "storage";

const BROKER_CHECK_INTERVAL: Duration = Duration::from_secs(10);

pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

pub struct GetSystemHealth;

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub service: String,
    pub overall_status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

impl Reply for SystemHealth {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

pub struct HealthMonitorActor {
    service: String,
    components: HashMap<String, ComponentHealth>,
    producer: Option<Arc<EventProducer>>,
}

impl HealthMonitorActor {
    pub fn new(service: impl Into<String>, producer: Option<Arc<EventProducer>>) -> Self {
        Self {
            service: service.into(),
            components: HashMap::new(),
            producer,
        }
    }
}

fn broker_status(state: CircuitState) -> HealthStatus {
    match state {
        CircuitState::Closed => HealthStatus::Healthy,
        CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
        CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(service = %state.service, "HealthMonitorActor started");

        if let Some(producer) = state.producer.clone() {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(BROKER_CHECK_INTERVAL);
                loop {
                    interval.tick().await;

                    let status = broker_status(producer.circuit_state().await);
                    let sent = actor_ref
                        .tell(UpdateHealth {
                            component: BROKER_COMPONENT.to_string(),
                            status,
                            details: None,
                        })
                        .send()
                        .await;
                    if sent.is_err() {
                        break;
                    }
                }
            });
        }

        Ok(state)
    }
}

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        tracing::debug!(
            component = %msg.component,
            status = ?msg.status,
            "Updated component health"
        );

        let health = ComponentHealth {
            name: msg.component.clone(),
            status: msg.status,
            last_check: Utc::now(),
            details: msg.details,
        };
        self.components.insert(msg.component, health);
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let mut components: Vec<ComponentHealth> = self.components.values().cloned().collect();
        components.sort_by(|a, b| a.name.cmp(&b.name));

        SystemHealth {
            service: self.service.clone(),
            overall_status: overall_status(&components),
            components,
            check_time: Utc::now(),
        }
    }
}

/// Cheap handle for reporting health from anywhere; a no-op when detached
#[derive(Clone, Default)]
pub struct HealthReporter {
    monitor: Option<ActorRef<HealthMonitorActor>>,
}

impl HealthReporter {
    pub fn new(monitor: ActorRef<HealthMonitorActor>) -> Self {
        Self {
            monitor: Some(monitor),
        }
    }

    pub fn detached() -> Self {
        Self::default()
    }

    pub async fn report(&self, component: &str, status: HealthStatus, details: Option<String>) {
        let Some(monitor) = &self.monitor else {
            return;
        };

        let update = UpdateHealth {
            component: component.to_string(),
            status,
            details,
        };
        if let Err(e) = monitor.tell(update).send().await {
            tracing::warn!(component = %component, error = %e, "Failed to report health");
        }
    }

    pub async fn snapshot(&self) -> Option<SystemHealth> {
        let monitor = self.monitor.as_ref()?;
        monitor.ask(GetSystemHealth).send().await.ok()
    }
}
