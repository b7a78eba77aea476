use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ============================================================================
// Domain Events
// ============================================================================
//
// Creation events exchanged between the two services. Each event type is
// bound to the topic it travels on and knows its wire field names, so that
// decoding can match keys case-insensitively.
//
// ============================================================================

pub const USER_CREATED_TOPIC: &str = "user-created";
pub const ORDER_CREATED_TOPIC: &str = "order-created";

/// An event that can travel over the broker as a UTF-8 JSON record
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Topic the event is produced to by default
    const TOPIC: &'static str;

    /// Name used in logs and metrics labels
    const EVENT_TYPE: &'static str;

    /// Canonical wire field names, used to normalize key casing on decode
    const FIELDS: &'static [&'static str];

    fn event_id(&self) -> Uuid;

    fn created_at(&self) -> DateTime<Utc>;
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserCreatedEvent {
    pub event_id: Uuid,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
}

impl UserCreatedEvent {
    pub fn new(user_id: Uuid, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            created_at: Utc::now(),
            user_id,
            name: name.into(),
            email: email.into(),
        }
    }
}

impl EventPayload for UserCreatedEvent {
    const TOPIC: &'static str = USER_CREATED_TOPIC;
    const EVENT_TYPE: &'static str = "UserCreated";
    const FIELDS: &'static [&'static str] = &["eventId", "createdAt", "userId", "name", "email"];

    fn event_id(&self) -> Uuid {
        self.event_id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    pub event_id: Uuid,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub product: String,
    pub quantity: i32,
    pub price: f64,
}

impl OrderCreatedEvent {
    pub fn new(
        order_id: Uuid,
        user_id: Uuid,
        product: impl Into<String>,
        quantity: i32,
        price: f64,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            created_at: Utc::now(),
            order_id,
            user_id,
            product: product.into(),
            quantity,
            price,
        }
    }
}

impl EventPayload for OrderCreatedEvent {
    const TOPIC: &'static str = ORDER_CREATED_TOPIC;
    const EVENT_TYPE: &'static str = "OrderCreated";
    const FIELDS: &'static [&'static str] = &[
        "eventId",
        "createdAt",
        "orderId",
        "userId",
        "product",
        "quantity",
        "price",
    ];

    fn event_id(&self) -> Uuid {
        self.event_id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

// ============================================================================
// Wire codec
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload does not match {event_type}: {source}")]
    Schema {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Serialize an event to its UTF-8 JSON wire form
pub fn encode<E: EventPayload>(event: &E) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

/// Decode a wire payload, matching field names case-insensitively
pub fn decode<E: EventPayload>(payload: &[u8]) -> Result<E, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    let value: Value = serde_json::from_str(text).map_err(DecodeError::InvalidJson)?;

    let Value::Object(fields) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let normalized: Map<String, Value> = fields
        .into_iter()
        .map(|(key, value)| (canonical_key::<E>(key), value))
        .collect();

    serde_json::from_value(Value::Object(normalized)).map_err(|source| DecodeError::Schema {
        event_type: E::EVENT_TYPE,
        source,
    })
}

fn canonical_key<E: EventPayload>(key: String) -> String {
    E::FIELDS
        .iter()
        .find(|field| field.eq_ignore_ascii_case(&key))
        .map(|field| field.to_string())
        .unwrap_or(key)
}
