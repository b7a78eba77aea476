use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::events::{EventPayload, OrderCreatedEvent};
use crate::messaging::EventProducer;
use crate::models::{CreateOrderRequest, Order, UserReplica};
use crate::storage::OrderServiceStore;

pub struct OrderService {
    store: Arc<dyn OrderServiceStore>,
    producer: Arc<EventProducer>,
    topic: String,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderServiceStore>, producer: Arc<EventProducer>) -> Self {
        Self::with_topic(store, producer, OrderCreatedEvent::TOPIC)
    }

    pub fn with_topic(
        store: Arc<dyn OrderServiceStore>,
        producer: Arc<EventProducer>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            producer,
            topic: topic.into(),
        }
    }

    /// The user is not checked against the replica; any non-nil id is accepted
    pub async fn create(&self, request: CreateOrderRequest) -> ServiceResult<Order> {
        if request.user_id.is_nil() {
            return Err(ServiceError::Validation("UserId is required".to_string()));
        }

        let order = Order {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            product: request.product,
            quantity: request.quantity,
            price: request.price,
            created_at: Utc::now(),
        };
        self.store.insert_order(&order).await?;
        tracing::info!(order_id = %order.id, user_id = %order.user_id, "Order created");

        let event = OrderCreatedEvent::new(
            order.id,
            order.user_id,
            order.product.clone(),
            order.quantity,
            order.price,
        );
        self.producer.publish(&self.topic, &event).await;

        Ok(order)
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Option<Order>> {
        tracing::debug!(order_id = %id, "Fetching order");
        Ok(self.store.find_order(id).await?)
    }

    pub async fn list(&self) -> ServiceResult<Vec<Order>> {
        Ok(self.store.list_orders().await?)
    }

    /// Users replicated from the user service
    pub async fn replicated_users(&self) -> ServiceResult<Vec<UserReplica>> {
        Ok(self.store.list_user_replicas().await?)
    }
}
