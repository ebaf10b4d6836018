//! A deterministic, in-process `BrokerGateway` used for tests, demos, and
//! the CLI's offline mode. No network calls; entity and topic topology is
//! seeded up front by whoever constructs the gateway.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use servicehub_core::{
    BrokerError, BrokerGateway, BrokerResult, EntitySummary, EntityType, Message, RuntimeCounts,
};
use time::OffsetDateTime;

#[derive(Default)]
struct EntityState {
    active: VecDeque<Message>,
    dlq: VecDeque<Message>,
    topic_name: Option<String>,
}

fn entity_key(entity_type: EntityType, entity: &str) -> (EntityType, String) {
    (entity_type, entity.to_string())
}

/// Seeded, in-memory `BrokerGateway`. Thread-safe; cheap to clone (an `Arc`
/// wrapper is expected at the call site, the way the real adapter would be).
pub struct SimulatedBrokerGateway {
    entities: DashMap<(EntityType, String), EntityState>,
    topics: DashMap<String, Vec<String>>,
    next_sequence: AtomicI64,
}

impl SimulatedBrokerGateway {
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            topics: DashMap::new(),
            next_sequence: AtomicI64::new(1),
        }
    }

    pub fn register_queue(&self, name: &str) {
        self.entities
            .entry(entity_key(EntityType::Queue, name))
            .or_default();
    }

    pub fn register_topic(&self, name: &str) {
        self.topics.entry(name.to_string()).or_default();
    }

    pub fn register_subscription(&self, topic: &str, subscription: &str) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push(subscription.to_string());
        let mut state = self
            .entities
            .entry(entity_key(EntityType::Subscription, subscription))
            .or_default();
        state.topic_name = Some(topic.to_string());
    }

    fn next_sequence(&self) -> i64 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Test/demo seeding helper: enqueues an active message without going
    /// through `send`'s public contract checks.
    pub fn seed_active(&self, entity: &str, entity_type: EntityType, mut message: Message) {
        message.sequence_number = self.next_sequence();
        self.entities
            .entry(entity_key(entity_type, entity))
            .or_default()
            .active
            .push_back(message);
    }
}

impl Default for SimulatedBrokerGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn synthetic_message(sequence_number: i64) -> Message {
    let mut rng = rand::thread_rng();
    Message {
        broker_message_id: format!("sim-{sequence_number}-{:08x}", rng.gen::<u32>()),
        sequence_number,
        enqueued_at_utc: OffsetDateTime::now_utc(),
        dead_lettered_at_utc: None,
        dead_letter_reason: None,
        dead_letter_error_description: None,
        delivery_count: 1,
        content_type: Some("application/json".into()),
        body: br#"{"simulated":true}"#.to_vec(),
        application_properties: serde_json::Map::new(),
        correlation_id: None,
        session_id: None,
        scheduled_enqueue_time_utc: None,
    }
}

#[async_trait]
impl BrokerGateway for SimulatedBrokerGateway {
    async fn list_queues(&self) -> BrokerResult<Vec<EntitySummary>> {
        Ok(self
            .entities
            .iter()
            .filter(|entry| entry.key().0 == EntityType::Queue)
            .map(|entry| EntitySummary {
                name: entry.key().1.clone(),
                active_count: entry.value().active.len() as i64,
                dlq_count: entry.value().dlq.len() as i64,
                topic_name: None,
            })
            .collect())
    }

    async fn list_topics(&self) -> BrokerResult<Vec<String>> {
        Ok(self.topics.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn list_subscriptions(&self, topic: &str) -> BrokerResult<Vec<EntitySummary>> {
        let subscriptions = self
            .topics
            .get(topic)
            .ok_or_else(|| BrokerError::NotFound(format!("topic {topic} not found")))?
            .clone();
        Ok(subscriptions
            .into_iter()
            .map(|name| {
                let key = entity_key(EntityType::Subscription, &name);
                let (active, dlq) = self
                    .entities
                    .get(&key)
                    .map(|s| (s.active.len() as i64, s.dlq.len() as i64))
                    .unwrap_or((0, 0));
                EntitySummary {
                    name,
                    active_count: active,
                    dlq_count: dlq,
                    topic_name: Some(topic.to_string()),
                }
            })
            .collect())
    }

    async fn peek(
        &self,
        entity: &str,
        entity_type: EntityType,
        from_sequence: Option<i64>,
        max: usize,
    ) -> BrokerResult<Vec<Message>> {
        let key = entity_key(entity_type, entity);
        let state = self
            .entities
            .get(&key)
            .ok_or_else(|| BrokerError::NotFound(format!("entity {entity} not found")))?;
        let floor = from_sequence.unwrap_or(0);
        Ok(state
            .active
            .iter()
            .filter(|m| m.sequence_number > floor)
            .take(max)
            .cloned()
            .collect())
    }

    async fn peek_dlq(
        &self,
        entity: &str,
        entity_type: EntityType,
        from_sequence: Option<i64>,
        max: usize,
    ) -> BrokerResult<Vec<Message>> {
        let key = entity_key(entity_type, entity);
        let state = self
            .entities
            .get(&key)
            .ok_or_else(|| BrokerError::NotFound(format!("entity {entity} not found")))?;
        let floor = from_sequence.unwrap_or(0);
        Ok(state
            .dlq
            .iter()
            .filter(|m| m.sequence_number > floor)
            .take(max)
            .cloned()
            .collect())
    }

    async fn send(&self, entity: &str, entity_type: EntityType, mut message: Message) -> BrokerResult<()> {
        let key = entity_key(entity_type, entity);
        let mut state = self
            .entities
            .get_mut(&key)
            .ok_or_else(|| BrokerError::NotFound(format!("entity {entity} not found")))?;
        message.sequence_number = self.next_sequence();
        message.enqueued_at_utc = OffsetDateTime::now_utc();
        state.active.push_back(message);
        Ok(())
    }

    async fn dead_letter(
        &self,
        entity: &str,
        entity_type: EntityType,
        count: u8,
        reason: &str,
        error_description: Option<&str>,
    ) -> BrokerResult<()> {
        if count > 10 {
            return Err(BrokerError::Protocol(
                "dead_letter count must not exceed 10".into(),
            ));
        }
        let key = entity_key(entity_type, entity);
        let mut state = self
            .entities
            .get_mut(&key)
            .ok_or_else(|| BrokerError::NotFound(format!("entity {entity} not found")))?;

        for _ in 0..count {
            let mut message = state
                .active
                .pop_front()
                .unwrap_or_else(|| synthetic_message(self.next_sequence()));
            message.dead_lettered_at_utc = Some(OffsetDateTime::now_utc());
            message.dead_letter_reason = Some(reason.to_string());
            message.dead_letter_error_description = error_description.map(str::to_string);
            message.delivery_count += 1;
            state.dlq.push_back(message);
        }
        Ok(())
    }

    async fn runtime_counts(&self, entity: &str, entity_type: EntityType) -> BrokerResult<RuntimeCounts> {
        let key = entity_key(entity_type, entity);
        let state = self
            .entities
            .get(&key)
            .ok_or_else(|| BrokerError::NotFound(format!("entity {entity} not found")))?;
        Ok(RuntimeCounts {
            active: state.active.len() as i64,
            dlq: state.dlq.len() as i64,
            scheduled: 0,
            transfer: 0,
        })
    }
}
