use std::sync::Arc;

use async_trait::async_trait;

use crate::events::{EventPayload, OrderCreatedEvent, UserCreatedEvent};
use crate::models::{OrderReplica, UserReplica};
use crate::storage::{OrderServiceStore, StorageResult, UserServiceStore};

// ============================================================================
// Idempotent Projection
// ============================================================================
//
// Turns a decoded event into a local replica, at most once per dedupe key.
// The check and the insert are two separate storage calls; a second consumer
// on the same group could race between them.
//
// ============================================================================

/// What a projection did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// A new replica was inserted
    Created,
    /// A replica with the same dedupe key already exists
    Skipped,
    /// A precondition is missing; the event is dropped for good
    Deferred,
}

impl Projection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Projection::Created => "created",
            Projection::Skipped => "skipped",
            Projection::Deferred => "deferred",
        }
    }
}

#[async_trait]
pub trait Projector: Send + Sync + 'static {
    type Event: EventPayload;

    async fn project(&self, event: &Self::Event) -> StorageResult<Projection>;
}

/// Projects `UserCreated` into the order service's user replicas
pub struct UserReplicaProjector<S: ?Sized> {
    store: Arc<S>,
}

impl<S: OrderServiceStore + ?Sized> UserReplicaProjector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: OrderServiceStore + ?Sized + 'static> Projector for UserReplicaProjector<S> {
    type Event = UserCreatedEvent;

    async fn project(&self, event: &UserCreatedEvent) -> StorageResult<Projection> {
        // Deduped on (name, email), not on the source user id.
        if self.store.user_replica_exists(&event.name, &event.email).await? {
            tracing::info!(
                user_id = %event.user_id,
                "User already replicated, skipping"
            );
            return Ok(Projection::Skipped);
        }

        let replica = UserReplica::from(event);
        self.store.insert_user_replica(&replica).await?;

        tracing::info!(
            user_id = %event.user_id,
            name = %event.name,
            "User replica created"
        );
        Ok(Projection::Created)
    }
}

/// Projects `OrderCreated` into the user service's order replicas
pub struct OrderReplicaProjector<S: ?Sized> {
    store: Arc<S>,
}

impl<S: UserServiceStore + ?Sized> OrderReplicaProjector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: UserServiceStore + ?Sized + 'static> Projector for OrderReplicaProjector<S> {
    type Event = OrderCreatedEvent;

    async fn project(&self, event: &OrderCreatedEvent) -> StorageResult<Projection> {
        if !self.store.user_exists(event.user_id).await? {
            // Not retried: the event is committed and never seen again.
            tracing::warn!(
                order_id = %event.order_id,
                user_id = %event.user_id,
                "Received order for unknown user, dropping"
            );
            return Ok(Projection::Deferred);
        }

        if self.store.order_replica_exists(event.order_id).await? {
            tracing::info!(
                order_id = %event.order_id,
                "Order already replicated, skipping"
            );
            return Ok(Projection::Skipped);
        }

        let replica = OrderReplica::from(event);
        self.store.insert_order_replica(&replica).await?;

        tracing::info!(
            order_id = %event.order_id,
            user_id = %event.user_id,
            product = %event.product,
            quantity = event.quantity,
            "Order replica created"
        );
        Ok(Projection::Created)
    }
}
