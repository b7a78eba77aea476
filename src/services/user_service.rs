use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::events::{EventPayload, UserCreatedEvent};
use crate::messaging::EventProducer;
use crate::models::{CreateUserRequest, OrderReplica, User};
use crate::storage::UserServiceStore;

const NAME_MIN_LEN: usize = 2;
const NAME_MAX_LEN: usize = 100;
const EMAIL_MAX_LEN: usize = 255;

pub struct UserService {
    store: Arc<dyn UserServiceStore>,
    producer: Arc<EventProducer>,
    topic: String,
}

impl UserService {
    pub fn new(store: Arc<dyn UserServiceStore>, producer: Arc<EventProducer>) -> Self {
        Self::with_topic(store, producer, UserCreatedEvent::TOPIC)
    }

    pub fn with_topic(
        store: Arc<dyn UserServiceStore>,
        producer: Arc<EventProducer>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            producer,
            topic: topic.into(),
        }
    }

    pub async fn create(&self, request: CreateUserRequest) -> ServiceResult<User> {
        let (name, email) = validate(&request)?;

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(ServiceError::Duplicate(format!(
                "User already exists with the Email '{}'",
                request.email
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            name,
            email,
            created_at: Utc::now(),
        };
        self.store.insert_user(&user).await?;
        tracing::info!(user_id = %user.id, "User created");

        let event = UserCreatedEvent::new(user.id, user.name.clone(), user.email.clone());
        self.producer.publish(&self.topic, &event).await;

        Ok(user)
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Option<User>> {
        tracing::debug!(user_id = %id, "Fetching user");
        Ok(self.store.find_user(id).await?)
    }

    pub async fn list(&self) -> ServiceResult<Vec<User>> {
        Ok(self.store.list_users().await?)
    }

    /// Orders replicated from the order service
    pub async fn replicated_orders(&self) -> ServiceResult<Vec<OrderReplica>> {
        Ok(self.store.list_order_replicas().await?)
    }
}

/// Returns the trimmed name and the trimmed, lower-cased email
fn validate(request: &CreateUserRequest) -> ServiceResult<(String, String)> {
    let name = request.name.trim();
    let email = request.email.trim().to_lowercase();

    if name.is_empty() || email.is_empty() {
        return Err(ServiceError::Validation(format!(
            "Name '{}' and Email '{}' are required",
            request.name, request.email
        )));
    }

    let name_len = name.chars().count();
    if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&name_len) {
        return Err(ServiceError::Validation(format!(
            "Name must be between {} and {} characters",
            NAME_MIN_LEN, NAME_MAX_LEN
        )));
    }

    if email.len() > EMAIL_MAX_LEN || !looks_like_email(&email) {
        return Err(ServiceError::Validation(format!("Email '{}' is not valid", request.email)));
    }

    Ok((name.to_string(), email))
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.contains(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}
