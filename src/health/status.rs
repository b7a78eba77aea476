use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health status of a component
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

/// Health information for a component
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    #[serde(flatten)]
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Worst status wins; degraded components do not make the system unhealthy
pub fn overall_status<'a>(components: impl IntoIterator<Item = &'a ComponentHealth>) -> HealthStatus {
    let mut degraded = false;
    let mut unhealthy = Vec::new();

    for health in components {
        match &health.status {
            HealthStatus::Unhealthy(reason) => unhealthy.push(format!("{}: {}", health.name, reason)),
            HealthStatus::Degraded(_) => degraded = true,
            HealthStatus::Healthy => {}
        }
    }

    if !unhealthy.is_empty() {
        unhealthy.sort();
        HealthStatus::Unhealthy(unhealthy.join(", "))
    } else if degraded {
        HealthStatus::Degraded("Some components degraded".to_string())
    } else {
        HealthStatus::Healthy
    }
}
