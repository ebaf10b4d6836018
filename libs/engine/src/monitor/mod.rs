//! Enumerates DLQ-bearing entities, classifies and dedupes newly observed
//! dead letters, and hands matching entries to the rule engine.

mod scheduler;

use std::sync::Arc;

use servicehub_core::{
    body_hash, body_preview, classify, BrokerGateway, ClassifierInput, DlqHistoryEntry, DlqStatus,
    EntityType, Message, ServiceHubError,
};
use servicehub_store::DlqStore;
use time::OffsetDateTime;

pub use scheduler::{MonitorScheduler, SchedulerState};

use crate::replay::ReplayExecutor;
use crate::rules::RuleEngine;

const BODY_PREVIEW_MAX_CHARS: usize = 256;
/// Safety cap on pages fetched from one entity's DLQ per tick, so a runaway
/// backlog can never make a single tick run unbounded.
const MAX_PAGES_PER_ENTITY: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct MonitorTickReport {
    pub entities_scanned: usize,
    pub detected: usize,
    pub updated: usize,
    pub replays_triggered: usize,
    pub entity_failures: Vec<MonitorEntityFailure>,
}

/// One entity's scan failed; logged and skipped rather than aborting the
/// rest of the cycle.
#[derive(Debug, Clone)]
pub struct MonitorEntityFailure {
    pub entity_name: String,
    pub entity_type: EntityType,
    pub error: String,
}

pub struct DlqMonitor {
    namespace_id: String,
    gateway: Arc<dyn BrokerGateway>,
    dlq_store: Arc<dyn DlqStore>,
    rule_engine: Arc<RuleEngine>,
    replay_executor: Arc<ReplayExecutor>,
    page_size: usize,
}

impl DlqMonitor {
    pub fn new(
        namespace_id: impl Into<String>,
        gateway: Arc<dyn BrokerGateway>,
        dlq_store: Arc<dyn DlqStore>,
        rule_engine: Arc<RuleEngine>,
        replay_executor: Arc<ReplayExecutor>,
        page_size: usize,
    ) -> Self {
        Self {
            namespace_id: namespace_id.into(),
            gateway,
            dlq_store,
            rule_engine,
            replay_executor,
            page_size,
        }
    }

    /// Cancels any replay backoff sleeps this monitor's executor has in
    /// flight. Called by the scheduler on shutdown.
    pub fn shutdown_replays(&self) {
        self.replay_executor.shutdown();
    }

    pub async fn run_once(&self) -> Result<MonitorTickReport, ServiceHubError> {
        let mut report = MonitorTickReport::default();
        let mut new_entries = Vec::new();

        for queue in self
            .gateway
            .list_queues()
            .await
            .map_err(|err| ServiceHubError::ExternalService(err.to_string()))?
        {
            report.entities_scanned += 1;
            self.scan_entity_and_record(&queue.name, EntityType::Queue, None, &mut report, &mut new_entries)
                .await;
        }

        for topic in self
            .gateway
            .list_topics()
            .await
            .map_err(|err| ServiceHubError::ExternalService(err.to_string()))?
        {
            let subscriptions = match self.gateway.list_subscriptions(&topic).await {
                Ok(subscriptions) => subscriptions,
                Err(err) => {
                    tracing::warn!(namespace_id = %self.namespace_id, topic, %err, "listing subscriptions failed, skipping topic");
                    continue;
                }
            };
            for subscription in subscriptions {
                report.entities_scanned += 1;
                self.scan_entity_and_record(
                    &subscription.name,
                    EntityType::Subscription,
                    Some(topic.clone()),
                    &mut report,
                    &mut new_entries,
                )
                .await;
            }
        }

        if new_entries.is_empty() {
            return Ok(report);
        }

        let decisions = self.rule_engine.evaluate_batch(&new_entries).await?;
        for decision in decisions {
            if !decision.should_replay {
                if let Some(reason) = &decision.skip_reason {
                    tracing::info!(entry_id = decision.entry_id, rule_id = decision.rule_id, %reason, "auto-replay skipped");
                }
                continue;
            }
            report.replays_triggered += 1;
            let executor = self.replay_executor.clone();
            let replayed_by = format!("rule:{}", decision.rule_id);
            tokio::spawn(async move {
                if let Err(err) = executor
                    .execute(decision.entry_id, &decision.action, &replayed_by, "rule-auto-replay")
                    .await
                {
                    tracing::warn!(entry_id = decision.entry_id, %err, "auto-replay failed to execute");
                }
            });
        }

        Ok(report)
    }

    /// Scans one entity, logging and recording (rather than propagating) a
    /// failure so one unreachable entity never aborts the rest of the cycle.
    async fn scan_entity_and_record(
        &self,
        entity_name: &str,
        entity_type: EntityType,
        topic_name: Option<String>,
        report: &mut MonitorTickReport,
        new_entries: &mut Vec<DlqHistoryEntry>,
    ) {
        if let Err(err) = self
            .scan_entity(entity_name, entity_type, topic_name, report, new_entries)
            .await
        {
            tracing::warn!(namespace_id = %self.namespace_id, entity_name, ?entity_type, %err, "entity scan failed, skipping");
            report.entity_failures.push(MonitorEntityFailure {
                entity_name: entity_name.to_string(),
                entity_type,
                error: err.to_string(),
            });
        }
    }

    async fn scan_entity(
        &self,
        entity_name: &str,
        entity_type: EntityType,
        topic_name: Option<String>,
        report: &mut MonitorTickReport,
        new_entries: &mut Vec<DlqHistoryEntry>,
    ) -> Result<(), ServiceHubError> {
        let mut from_sequence: Option<i64> = None;

        for _ in 0..MAX_PAGES_PER_ENTITY {
            let page = self
                .gateway
                .peek_dlq(entity_name, entity_type, from_sequence, self.page_size)
                .await
                .map_err(|err| ServiceHubError::ExternalService(err.to_string()))?;
            if page.is_empty() {
                break;
            }
            from_sequence = page.last().map(|m| m.sequence_number);

            for message in page {
                let candidate = self.build_candidate(entity_name, entity_type, topic_name.clone(), message);
                let upserted = self.dlq_store.upsert_by_dedup_key(candidate).await?;
                if upserted.created {
                    report.detected += 1;
                    new_entries.push(upserted.entry);
                } else {
                    report.updated += 1;
                }
            }
        }
        Ok(())
    }

    fn build_candidate(
        &self,
        entity_name: &str,
        entity_type: EntityType,
        topic_name: Option<String>,
        message: Message,
    ) -> DlqHistoryEntry {
        let (category, confidence) = classify(&ClassifierInput {
            dead_letter_reason: message.dead_letter_reason.as_deref(),
            dead_letter_error_description: message.dead_letter_error_description.as_deref(),
            delivery_count: message.delivery_count,
            max_delivery_count: None,
            ttl_expired: false,
        });

        DlqHistoryEntry {
            id: 0,
            broker_message_id: message.broker_message_id,
            sequence_number: message.sequence_number,
            body_hash: body_hash(&message.body),
            namespace_id: self.namespace_id.clone(),
            entity_name: entity_name.to_string(),
            entity_type,
            topic_name,
            enqueued_at_utc: message.enqueued_at_utc,
            dead_lettered_at_utc: message.dead_lettered_at_utc.unwrap_or_else(OffsetDateTime::now_utc),
            detected_at_utc: OffsetDateTime::now_utc(),
            dead_letter_reason: message.dead_letter_reason,
            dead_letter_error_description: message.dead_letter_error_description,
            delivery_count: message.delivery_count,
            content_type: message.content_type,
            size_bytes: message.body.len() as i64,
            body_preview: body_preview(&message.body, BODY_PREVIEW_MAX_CHARS),
            application_properties: message
                .application_properties
                .into_iter()
                .collect(),
            failure_category: category,
            category_confidence: confidence,
            status: DlqStatus::Active,
            replayed_at: None,
            replay_success: None,
            archived_at: None,
            user_notes: None,
            correlation_id: message.correlation_id,
            session_id: message.session_id,
        }
    }
}
