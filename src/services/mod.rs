// ============================================================================
// Write-path services
// ============================================================================
//
// Persist locally first, then hand the creation event to the shared producer.
// A failed publish never undoes the local write.
//
// ============================================================================

mod order_service;
mod user_service;

pub use order_service::OrderService;
pub use user_service::UserService;

use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
