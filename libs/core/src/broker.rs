//! The `BrokerGateway` capability: an abstract collaborator. The real
//! broker SDK lives outside this repo's scope, so what's defined here is
//! only the trait boundary a production adapter (or the in-memory simulator
//! in `servicehub-broker`) must satisfy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::model::EntityType;

/// Typed failure surfaced by every gateway operation.
#[derive(Debug, Error, Clone)]
pub enum BrokerError {
    #[error("transient broker failure: {0}")]
    Transient(String),
    #[error("entity not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    /// Transient-looking failures are candidates for the gateway's own
    /// bounded internal retry; `NotFound`/`Unauthorized` never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::Transient(_) | BrokerError::Timeout(_) | BrokerError::QuotaExceeded(_)
        )
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySummary {
    pub name: String,
    pub active_count: i64,
    pub dlq_count: i64,
    pub topic_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeCounts {
    pub active: i64,
    pub dlq: i64,
    pub scheduled: i64,
    pub transfer: i64,
}

/// A message as observed on the broker, active-side or DLQ-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub broker_message_id: String,
    pub sequence_number: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at_utc: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub dead_lettered_at_utc: Option<OffsetDateTime>,
    pub dead_letter_reason: Option<String>,
    pub dead_letter_error_description: Option<String>,
    pub delivery_count: i64,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub application_properties: serde_json::Map<String, serde_json::Value>,
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub scheduled_enqueue_time_utc: Option<OffsetDateTime>,
}

/// Abstract capability scoped to one credentialed namespace.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn list_queues(&self) -> BrokerResult<Vec<EntitySummary>>;
    async fn list_topics(&self) -> BrokerResult<Vec<String>>;
    async fn list_subscriptions(&self, topic: &str) -> BrokerResult<Vec<EntitySummary>>;

    async fn peek(
        &self,
        entity: &str,
        entity_type: EntityType,
        from_sequence: Option<i64>,
        max: usize,
    ) -> BrokerResult<Vec<Message>>;

    async fn peek_dlq(
        &self,
        entity: &str,
        entity_type: EntityType,
        from_sequence: Option<i64>,
        max: usize,
    ) -> BrokerResult<Vec<Message>>;

    async fn send(
        &self,
        entity: &str,
        entity_type: EntityType,
        message: Message,
    ) -> BrokerResult<()>;

    /// Testing aid: forces up to `count` (<= 10) messages onto `entity`'s DLQ.
    async fn dead_letter(
        &self,
        entity: &str,
        entity_type: EntityType,
        count: u8,
        reason: &str,
        error_description: Option<&str>,
    ) -> BrokerResult<()>;

    async fn runtime_counts(
        &self,
        entity: &str,
        entity_type: EntityType,
    ) -> BrokerResult<RuntimeCounts>;
}
