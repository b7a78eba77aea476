// ============================================================================
// HTTP surface
// ============================================================================
//
// - users  - user service routes under /api/users
// - orders - order service routes under /api/order
// - ops    - /health and /metrics, mounted by both roles
//
// ============================================================================

mod ops;
mod orders;
mod users;

pub use ops::configure as configure_ops;
pub use orders::configure as configure_orders;
pub use users::configure as configure_users;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::services::ServiceError;

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) | ServiceError::Duplicate(_) => StatusCode::BAD_REQUEST,
            ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ServiceError::Storage(e) => {
                tracing::error!(error = %e, "Storage error while handling request");
                HttpResponse::InternalServerError().json(json!({ "error": "An unexpected error occurred" }))
            }
            other => {
                tracing::warn!(error = %other, "Request rejected");
                HttpResponse::build(self.status_code()).json(json!({ "error": other.to_string() }))
            }
        }
    }
}
