// ============================================================================
// Health
// ============================================================================
//
// - status  - component health types and aggregation
// - monitor - actor holding the latest health of every component
//
// ============================================================================

mod monitor;
mod status;

pub use monitor::{
    HealthMonitorActor, HealthReporter, SystemHealth, BROKER_COMPONENT, CONSUMER_COMPONENT,
    STORAGE_COMPONENT,
};
pub use status::{overall_status, ComponentHealth, HealthStatus};
