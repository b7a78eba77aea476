// ============================================================================
// Storage
// ============================================================================
//
// Narrow persistence interfaces, one per service role. Each role owns its
// source-of-truth table and holds replicas of the other role's entities.
//
// Backends:
// - memory/   - process-local tables (default, no DATABASE_URL)
// - postgres/ - sqlx connection pool
//
// ============================================================================

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Order, OrderReplica, User, UserReplica};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage of the user service: owns users, replicates orders
#[async_trait]
pub trait UserServiceStore: Send + Sync {
    async fn insert_user(&self, user: &User) -> StorageResult<()>;

    async fn find_user(&self, id: Uuid) -> StorageResult<Option<User>>;

    /// Lookup by email, compared case-insensitively
    async fn find_user_by_email(&self, email: &str) -> StorageResult<Option<User>>;

    async fn user_exists(&self, id: Uuid) -> StorageResult<bool>;

    async fn list_users(&self) -> StorageResult<Vec<User>>;

    async fn order_replica_exists(&self, order_id: Uuid) -> StorageResult<bool>;

    async fn insert_order_replica(&self, replica: &OrderReplica) -> StorageResult<()>;

    async fn list_order_replicas(&self) -> StorageResult<Vec<OrderReplica>>;
}

/// Storage of the order service: owns orders, replicates users
#[async_trait]
pub trait OrderServiceStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> StorageResult<()>;

    async fn find_order(&self, id: Uuid) -> StorageResult<Option<Order>>;

    async fn list_orders(&self) -> StorageResult<Vec<Order>>;

    /// Exact match on both name and email
    async fn user_replica_exists(&self, name: &str, email: &str) -> StorageResult<bool>;

    async fn insert_user_replica(&self, replica: &UserReplica) -> StorageResult<()>;

    async fn list_user_replicas(&self) -> StorageResult<Vec<UserReplica>>;
}
