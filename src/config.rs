use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::events::{ORDER_CREATED_TOPIC, USER_CREATED_TOPIC};
use crate::messaging::{LoopConfig, ProbeConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown service role '{0}', expected 'user-service' or 'order-service'")]
    UnknownRole(String),

    #[error("invalid value '{value}' for {key}")]
    InvalidNumber { key: &'static str, value: String },
}

/// Which side of the pipeline this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    User,
    Order,
}

impl ServiceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceRole::User => "user-service",
            ServiceRole::Order => "order-service",
        }
    }

    fn produce_topic(&self) -> &'static str {
        match self {
            ServiceRole::User => USER_CREATED_TOPIC,
            ServiceRole::Order => ORDER_CREATED_TOPIC,
        }
    }

    fn consume_topic(&self) -> &'static str {
        match self {
            ServiceRole::User => ORDER_CREATED_TOPIC,
            ServiceRole::Order => USER_CREATED_TOPIC,
        }
    }

    fn default_group_id(&self) -> &'static str {
        match self {
            ServiceRole::User => "user-service-group",
            ServiceRole::Order => "order-service-group",
        }
    }

    fn default_port(&self) -> u16 {
        match self {
            ServiceRole::User => 8080,
            ServiceRole::Order => 8081,
        }
    }
}

impl FromStr for ServiceRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "user-service" => Ok(ServiceRole::User),
            "order" | "order-service" => Ok(ServiceRole::Order),
            other => Err(ConfigError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub role: ServiceRole,
    pub bootstrap_servers: String,
    pub produce_topic: String,
    pub consume_topic: String,
    pub group_id: String,
    pub http_host: String,
    pub http_port: u16,
    /// In-memory storage when unset
    pub database_url: Option<String>,
    pub settle_delay: Duration,
    pub probe: ProbeConfig,
    pub commit_throttle: Duration,
    pub redelivery_delay: Duration,
}

impl Config {
    /// Load from the process environment and an optional `.env` file
    ///
    /// The role comes from the first CLI argument when given, otherwise from
    /// `SERVICE_ROLE`.
    pub fn from_env(role_arg: Option<String>) -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(role_arg, |key| env::var(key).ok())
    }

    fn from_lookup(
        role_arg: Option<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let role: ServiceRole = match role_arg.or_else(|| var("SERVICE_ROLE")) {
            Some(value) => value.parse()?,
            None => ServiceRole::User,
        };

        let millis = |key: &'static str, default: u64| -> Result<Duration, ConfigError> {
            parse_or(var(key), key, default).map(Duration::from_millis)
        };

        let probe = ProbeConfig {
            max_attempts: parse_or(var("BROKER_PROBE_ATTEMPTS"), "BROKER_PROBE_ATTEMPTS", 10)?,
            delay: millis("BROKER_PROBE_DELAY_MS", 3000)?,
            attempt_timeout: millis("BROKER_PROBE_TIMEOUT_MS", 5000)?,
        };

        Ok(Self {
            role,
            bootstrap_servers: var("KAFKA_BOOTSTRAP_SERVERS").unwrap_or_else(|| "localhost:9092".to_string()),
            produce_topic: var("KAFKA_TOPIC").unwrap_or_else(|| role.produce_topic().to_string()),
            consume_topic: var("KAFKA_CONSUME_TOPICS").unwrap_or_else(|| role.consume_topic().to_string()),
            group_id: var("KAFKA_GROUP_ID").unwrap_or_else(|| role.default_group_id().to_string()),
            http_host: var("HTTP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            http_port: parse_or(var("HTTP_PORT"), "HTTP_PORT", role.default_port())?,
            database_url: var("DATABASE_URL"),
            settle_delay: millis("STARTUP_SETTLE_MS", 2000)?,
            probe,
            commit_throttle: millis("COMMIT_THROTTLE_MS", 1000)?,
            redelivery_delay: millis("REDELIVERY_DELAY_MS", 1000)?,
        })
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            settle_delay: self.settle_delay,
            commit_throttle: self.commit_throttle,
            redelivery_delay: self.redelivery_delay,
            probe: self.probe.clone(),
            ..LoopConfig::new(self.consume_topic.clone(), self.group_id.clone())
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        None => Ok(default),
    }
}
