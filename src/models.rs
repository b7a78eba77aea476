use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{OrderCreatedEvent, UserCreatedEvent};

// ============================================================================
// Source-of-truth records
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product: String,
    pub quantity: i32,
    pub price: f64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Replicas
// Local copies of the other service's entities. Only the consumption loop
// creates them; nothing updates or deletes them.
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserReplica {
    pub id: Uuid,
    /// Identifier of the user in the user service
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<&UserCreatedEvent> for UserReplica {
    fn from(event: &UserCreatedEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: event.user_id,
            name: event.name.clone(),
            email: event.email.clone(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderReplica {
    pub id: Uuid,
    /// Identifier of the order in the order service
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub product: String,
    pub quantity: i32,
    pub price: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&OrderCreatedEvent> for OrderReplica {
    fn from(event: &OrderCreatedEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: event.order_id,
            user_id: event.user_id,
            product: event.product.clone(),
            quantity: event.quantity,
            price: event.price,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Write-path requests
// ============================================================================

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub user_id: Uuid,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub quantity: i32,
    #[serde(default)]
    pub price: f64,
}
