use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use super::{OrderServiceStore, StorageResult, UserServiceStore};
use crate::models::{Order, OrderReplica, User, UserReplica};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS orders (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        product TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        price DOUBLE PRECISION NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS user_replicas (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS order_replicas (
        id UUID PRIMARY KEY,
        order_id UUID NOT NULL,
        user_id UUID NOT NULL,
        product TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        price DOUBLE PRECISION NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
];

/// PostgreSQL-backed storage for either role
///
/// Replica tables carry no uniqueness constraint on their dedupe keys; a
/// second consumer instance on the same group could insert duplicates.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        tracing::info!("Database schema ready");
        Ok(())
    }
}

#[async_trait]
impl UserServiceStore for PostgresStore {
    async fn insert_user(&self, user: &User) -> StorageResult<()> {
        sqlx::query("INSERT INTO users (id, name, email, created_at) VALUES ($1, $2, $3, $4)")
            .bind(user.id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(user.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> StorageResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, email, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, email, created_at FROM users WHERE lower(email) = lower($1) LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn user_exists(&self, id: Uuid) -> StorageResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn list_users(&self) -> StorageResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, name, email, created_at FROM users ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn order_replica_exists(&self, order_id: Uuid) -> StorageResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM order_replicas WHERE order_id = $1)",
        )
        .bind(order_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_order_replica(&self, replica: &OrderReplica) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO order_replicas (id, order_id, user_id, product, quantity, price, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(replica.id)
        .bind(replica.order_id)
        .bind(replica.user_id)
        .bind(&replica.product)
        .bind(replica.quantity)
        .bind(replica.price)
        .bind(replica.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_order_replicas(&self) -> StorageResult<Vec<OrderReplica>> {
        let replicas = sqlx::query_as::<_, OrderReplica>(
            "SELECT id, order_id, user_id, product, quantity, price, created_at
             FROM order_replicas ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(replicas)
    }
}

#[async_trait]
impl OrderServiceStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO orders (id, user_id, product, quantity, price, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(&order.product)
        .bind(order.quantity)
        .bind(order.price)
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> StorageResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            "SELECT id, user_id, product, quantity, price, created_at FROM orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn list_orders(&self) -> StorageResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT id, user_id, product, quantity, price, created_at FROM orders ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    async fn user_replica_exists(&self, name: &str, email: &str) -> StorageResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM user_replicas WHERE name = $1 AND email = $2)",
        )
        .bind(name)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_user_replica(&self, replica: &UserReplica) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO user_replicas (id, user_id, name, email, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(replica.id)
        .bind(replica.user_id)
        .bind(&replica.name)
        .bind(&replica.email)
        .bind(replica.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_user_replicas(&self) -> StorageResult<Vec<UserReplica>> {
        let replicas = sqlx::query_as::<_, UserReplica>(
            "SELECT id, user_id, name, email, created_at FROM user_replicas ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(replicas)
    }
}
