use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::health::HealthReporter;
use crate::metrics::Metrics;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

async fn health_handler(health: web::Data<HealthReporter>) -> HttpResponse {
    match health.snapshot().await {
        Some(system) if system.overall_status.is_unhealthy() => {
            HttpResponse::ServiceUnavailable().json(system)
        }
        Some(system) => HttpResponse::Ok().json(system),
        None => HttpResponse::Ok().json(json!({ "overall_status": { "status": "healthy" } })),
    }
}

async fn metrics_handler(metrics: web::Data<Arc<Metrics>>) -> HttpResponse {
    match metrics.render() {
        Ok(buffer) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}
