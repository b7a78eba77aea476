use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OrderServiceStore, StorageResult, UserServiceStore};
use crate::models::{Order, OrderReplica, User, UserReplica};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    orders: Vec<Order>,
    user_replicas: Vec<UserReplica>,
    order_replicas: Vec<OrderReplica>,
}

/// Process-local storage; contents are lost on restart
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserServiceStore for InMemoryStore {
    async fn insert_user(&self, user: &User) -> StorageResult<()> {
        self.tables.write().await.users.push(user.clone());
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> StorageResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn user_exists(&self, id: Uuid) -> StorageResult<bool> {
        Ok(self.tables.read().await.users.iter().any(|u| u.id == id))
    }

    async fn list_users(&self) -> StorageResult<Vec<User>> {
        Ok(self.tables.read().await.users.clone())
    }

    async fn order_replica_exists(&self, order_id: Uuid) -> StorageResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.order_replicas.iter().any(|o| o.order_id == order_id))
    }

    async fn insert_order_replica(&self, replica: &OrderReplica) -> StorageResult<()> {
        self.tables.write().await.order_replicas.push(replica.clone());
        Ok(())
    }

    async fn list_order_replicas(&self) -> StorageResult<Vec<OrderReplica>> {
        Ok(self.tables.read().await.order_replicas.clone())
    }
}

#[async_trait]
impl OrderServiceStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> StorageResult<()> {
        self.tables.write().await.orders.push(order.clone());
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> StorageResult<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn list_orders(&self) -> StorageResult<Vec<Order>> {
        Ok(self.tables.read().await.orders.clone())
    }

    async fn user_replica_exists(&self, name: &str, email: &str) -> StorageResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .user_replicas
            .iter()
            .any(|u| u.name == name && u.email == email))
    }

    async fn insert_user_replica(&self, replica: &UserReplica) -> StorageResult<()> {
        self.tables.write().await.user_replicas.push(replica.clone());
        Ok(())
    }

    async fn list_user_replicas(&self) -> StorageResult<Vec<UserReplica>> {
        Ok(self.tables.read().await.user_replicas.clone())
    }
}
