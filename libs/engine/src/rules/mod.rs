//! Rule matching, dry-run testing, and auto-replay rate limiting.

mod matcher;
mod rate_limiter;

use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use servicehub_core::{
    DlqHistoryEntry, DlqStatus, ReplayOutcome, Rule, RuleAction, RuleCondition, RuleOperator, ServiceHubError,
};
use servicehub_store::RuleStore;
use time::OffsetDateTime;

use crate::replay::ReplayExecutor;

pub use rate_limiter::ReplayRateLimiter;

const MAX_SAMPLE_MATCHES: usize = 20;

/// Outcome of one entry's attempted replay during a bulk replay-all run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReplayOutcome {
    pub entry_id: i64,
    pub outcome: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReplayResult {
    pub matched: usize,
    pub replayed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<BulkReplayOutcome>,
}

/// Decision for one newly detected entry, handed off to the replay executor.
#[derive(Debug, Clone)]
pub struct RuleMatchDecision {
    pub entry_id: i64,
    pub rule_id: i64,
    pub action: RuleAction,
    pub should_replay: bool,
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RuleTestResult {
    pub tested: usize,
    pub matched: usize,
    pub sample_matches: Vec<i64>,
}

fn compile_conditions(conditions: &[RuleCondition]) -> Result<Vec<Option<Regex>>, String> {
    conditions
        .iter()
        .map(|condition| {
            if condition.operator == RuleOperator::Regex {
                RegexBuilder::new(&condition.value)
                    .case_insensitive(!condition.case_sensitive)
                    .build()
                    .map(Some)
                    .map_err(|err| format!("invalid regex in condition: {err}"))
            } else {
                Ok(None)
            }
        })
        .collect()
}

pub struct RuleEngine {
    rule_store: Arc<dyn RuleStore>,
    rate_limiter: ReplayRateLimiter,
}

impl RuleEngine {
    pub fn new(rule_store: Arc<dyn RuleStore>) -> Self {
        Self {
            rule_store,
            rate_limiter: ReplayRateLimiter::new(),
        }
    }

    /// Evaluates every enabled, valid rule against every entry and decides,
    /// for matching entries whose rule auto-replays, whether the rule's
    /// hourly budget still allows it. The first matching rule (by id order)
    /// wins for a given entry; later rules are not consulted.
    pub async fn evaluate_batch(
        &self,
        entries: &[DlqHistoryEntry],
    ) -> Result<Vec<RuleMatchDecision>, ServiceHubError> {
        let mut rules = self.rule_store.list().await?;
        rules.sort_by_key(|r| r.id);

        let mut decisions = Vec::new();
        let now = OffsetDateTime::now_utc();

        for entry in entries {
            for rule in &rules {
                if !rule.enabled || rule.disabled_reason.is_some() {
                    continue;
                }
                let compiled = match compile_conditions(&rule.conditions) {
                    Ok(compiled) => compiled,
                    Err(reason) => {
                        tracing::warn!(rule_id = rule.id, %reason, "disabling rule with invalid condition");
                        let mut disabled = rule.clone();
                        disabled.disabled_reason = Some(reason);
                        let _ = self.rule_store.put(disabled).await;
                        continue;
                    }
                };
                let matched = match matcher::evaluate_all(entry, &rule.conditions, &compiled) {
                    Ok(matched) => matched,
                    Err(reason) => {
                        tracing::debug!(rule_id = rule.id, entry_id = entry.id, %reason, "condition never matches, treating as non-match");
                        false
                    }
                };
                if !matched {
                    continue;
                }

                self.rule_store.record_match(rule.id, None).await?;

                let should_replay = rule.action.auto_replay
                    && self
                        .rate_limiter
                        .try_acquire(rule.id, rule.max_replays_per_hour, now);
                let skip_reason = if rule.action.auto_replay && !should_replay {
                    Some(format!(
                        "rule {} exceeded its {} replay/hour budget",
                        rule.id, rule.max_replays_per_hour
                    ))
                } else {
                    None
                };

                decisions.push(RuleMatchDecision {
                    entry_id: entry.id,
                    rule_id: rule.id,
                    action: rule.action.clone(),
                    should_replay,
                    skip_reason,
                });
                break;
            }
        }
        Ok(decisions)
    }

    /// Replays every `Active` entry in `candidates` that matches `rule_id`'s
    /// conditions, subject to the rule's own hourly replay budget. Unlike
    /// `evaluate_batch`, this is driven by an explicit operator request for
    /// one rule rather than the first-match-wins tick sweep.
    pub async fn replay_all(
        &self,
        rule_id: i64,
        candidates: &[DlqHistoryEntry],
        replay_executor: &ReplayExecutor,
        replayed_by: &str,
    ) -> Result<BulkReplayResult, ServiceHubError> {
        let rule = self.rule_store.get(rule_id).await?;
        let compiled = compile_conditions(&rule.conditions).map_err(ServiceHubError::Validation)?;
        let now = OffsetDateTime::now_utc();
        let mut result = BulkReplayResult::default();

        for entry in candidates {
            if entry.status != DlqStatus::Active {
                continue;
            }
            let matched = matcher::evaluate_all(entry, &rule.conditions, &compiled).unwrap_or(false);
            if !matched {
                continue;
            }
            result.matched += 1;

            if !self.rate_limiter.try_acquire(rule.id, rule.max_replays_per_hour, now) {
                result.skipped += 1;
                result.results.push(BulkReplayOutcome {
                    entry_id: entry.id,
                    outcome: "skipped".into(),
                    reason: Some(format!(
                        "rule {} exceeded its {} replay/hour budget",
                        rule.id, rule.max_replays_per_hour
                    )),
                });
                continue;
            }

            match replay_executor.execute(entry.id, &rule.action, replayed_by, "bulk-replay").await {
                Ok(ReplayOutcome::Success) => {
                    result.replayed += 1;
                    result.results.push(BulkReplayOutcome {
                        entry_id: entry.id,
                        outcome: "replayed".into(),
                        reason: None,
                    });
                }
                Ok(ReplayOutcome::Failed) => {
                    result.failed += 1;
                    result.results.push(BulkReplayOutcome {
                        entry_id: entry.id,
                        outcome: "failed".into(),
                        reason: None,
                    });
                }
                Err(err) => {
                    result.failed += 1;
                    result.results.push(BulkReplayOutcome {
                        entry_id: entry.id,
                        outcome: "failed".into(),
                        reason: Some(err.to_string()),
                    });
                }
            }
        }
        Ok(result)
    }

    /// Dry-run: evaluates `rule` (which may not be persisted yet) against a
    /// sample without recording matches or touching the rate limiter.
    pub fn test_rule(&self, rule: &Rule, candidates: &[DlqHistoryEntry]) -> Result<RuleTestResult, ServiceHubError> {
        let compiled = compile_conditions(&rule.conditions).map_err(ServiceHubError::Validation)?;
        let mut matched_ids = Vec::new();
        for entry in candidates {
            let matched = matcher::evaluate_all(entry, &rule.conditions, &compiled).unwrap_or(false);
            if matched {
                matched_ids.push(entry.id);
            }
        }
        Ok(RuleTestResult {
            tested: candidates.len(),
            matched: matched_ids.len(),
            sample_matches: matched_ids.into_iter().take(MAX_SAMPLE_MATCHES).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servicehub_core::{DlqStatus, EntityType, FailureCategory, RuleConditionField};
    use servicehub_store::InMemoryRuleStore;
    use std::collections::BTreeMap;

    fn entry(id: i64, delivery_count: i64) -> DlqHistoryEntry {
        DlqHistoryEntry {
            id,
            broker_message_id: format!("m{id}"),
            sequence_number: id,
            body_hash: "h".into(),
            namespace_id: "ns1".into(),
            entity_name: "orders-q".into(),
            entity_type: EntityType::Queue,
            topic_name: None,
            enqueued_at_utc: OffsetDateTime::now_utc(),
            dead_lettered_at_utc: OffsetDateTime::now_utc(),
            detected_at_utc: OffsetDateTime::now_utc(),
            dead_letter_reason: Some("MaxDeliveryCountExceeded".into()),
            dead_letter_error_description: None,
            delivery_count,
            content_type: None,
            size_bytes: 10,
            body_preview: "p".into(),
            application_properties: BTreeMap::new(),
            failure_category: FailureCategory::MaxDelivery,
            category_confidence: 0.99,
            status: DlqStatus::Active,
            replayed_at: None,
            replay_success: None,
            archived_at: None,
            user_notes: None,
            correlation_id: None,
            session_id: None,
        }
    }

    fn sample_rule(max_per_hour: u32) -> Rule {
        Rule {
            id: 0,
            name: "retry-max-delivery".into(),
            description: None,
            enabled: true,
            conditions: vec![RuleCondition {
                field: RuleConditionField::FailureCategory,
                operator: RuleOperator::Equals,
                value: "MaxDelivery".into(),
                case_sensitive: false,
                property_key: None,
            }],
            action: RuleAction {
                auto_replay: true,
                delay_seconds: 5,
                max_retries: 1,
                exponential_backoff: false,
                target_entity: None,
            },
            max_replays_per_hour: max_per_hour,
            match_count: 0,
            success_count: 0,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
            disabled_reason: None,
        }
    }

    #[tokio::test]
    async fn rate_limit_caps_replays_and_skips_the_rest() {
        let rule_store = Arc::new(InMemoryRuleStore::new());
        rule_store.put(sample_rule(2)).await.unwrap();
        let engine = RuleEngine::new(rule_store);

        let entries = vec![entry(1, 10), entry(2, 10), entry(3, 10)];
        let decisions = engine.evaluate_batch(&entries).await.unwrap();

        assert_eq!(decisions.len(), 3);
        let replayed = decisions.iter().filter(|d| d.should_replay).count();
        let skipped = decisions.iter().filter(|d| !d.should_replay).count();
        assert_eq!(replayed, 2);
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn invalid_regex_condition_disables_the_rule() {
        let rule_store = Arc::new(InMemoryRuleStore::new());
        let mut rule = sample_rule(10);
        rule.conditions = vec![RuleCondition {
            field: RuleConditionField::DeadLetterReason,
            operator: RuleOperator::Regex,
            value: "(unclosed".into(),
            case_sensitive: false,
            property_key: None,
        }];
        let saved = rule_store.put(rule).await.unwrap();
        let engine = RuleEngine::new(rule_store.clone());

        let decisions = engine.evaluate_batch(&[entry(1, 10)]).await.unwrap();
        assert!(decisions.is_empty());
        let reloaded = rule_store.get(saved.id).await.unwrap();
        assert!(reloaded.disabled_reason.is_some());
    }

    #[tokio::test]
    async fn a_malformed_stored_condition_is_a_non_match_not_a_batch_failure() {
        let rule_store = Arc::new(InMemoryRuleStore::new());
        let mut bad_rule = sample_rule(10);
        bad_rule.conditions = vec![RuleCondition {
            field: RuleConditionField::EntityName,
            operator: RuleOperator::GreaterThan,
            value: "5".into(),
            case_sensitive: false,
            property_key: None,
        }];
        rule_store.put(bad_rule).await.unwrap();
        let mut good_rule = sample_rule(10);
        good_rule.conditions = vec![RuleCondition {
            field: RuleConditionField::FailureCategory,
            operator: RuleOperator::Equals,
            value: "MaxDelivery".into(),
            case_sensitive: false,
            property_key: None,
        }];
        rule_store.put(good_rule).await.unwrap();
        let engine = RuleEngine::new(rule_store);

        let decisions = engine.evaluate_batch(&[entry(1, 10), entry(2, 10)]).await.unwrap();
        assert_eq!(decisions.len(), 2);
    }

    #[tokio::test]
    async fn replay_all_only_touches_active_entries_matching_the_rule() {
        use servicehub_broker::SimulatedBrokerGateway;
        use servicehub_store::InMemoryDlqStore;

        let rule_store = Arc::new(InMemoryRuleStore::new());
        let mut rule = sample_rule(10);
        rule.action.delay_seconds = 0;
        let saved = rule_store.put(rule).await.unwrap();
        let engine = RuleEngine::new(rule_store);

        let gateway = Arc::new(SimulatedBrokerGateway::new());
        gateway.register_queue("orders-q");
        gateway
            .dead_letter("orders-q", EntityType::Queue, 1, "MaxDeliveryCountExceeded", None)
            .await
            .unwrap();
        let dlq_message = gateway.peek_dlq("orders-q", EntityType::Queue, None, 1).await.unwrap().remove(0);

        let dlq_store = Arc::new(InMemoryDlqStore::new());
        let mut candidate = entry(1, 10);
        candidate.broker_message_id = dlq_message.broker_message_id.clone();
        candidate.sequence_number = dlq_message.sequence_number;
        let created = dlq_store.upsert_by_dedup_key(candidate).await.unwrap();
        let mut archived = entry(2, 10);
        archived.status = DlqStatus::Archived;
        let created_archived = dlq_store.upsert_by_dedup_key(archived).await.unwrap();

        let replay_executor = crate::replay::ReplayExecutor::new(gateway, dlq_store.clone());
        let candidates = vec![created.entry.clone(), created_archived.entry.clone()];
        let result = engine
            .replay_all(saved.id, &candidates, &replay_executor, "manual:replay-all")
            .await
            .unwrap();

        assert_eq!(result.matched, 1);
        assert_eq!(result.replayed, 1);
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].entry_id, created.entry.id);
    }

    #[tokio::test]
    async fn test_rule_is_a_dry_run_with_no_side_effects() {
        let rule_store = Arc::new(InMemoryRuleStore::new());
        let engine = RuleEngine::new(rule_store.clone());
        let rule = sample_rule(10);

        let candidates: Vec<DlqHistoryEntry> = (1..=100).map(|i| entry(i, 10)).collect();
        let result = engine.test_rule(&rule, &candidates).unwrap();
        assert_eq!(result.tested, 100);
        assert_eq!(result.matched, 100);
        assert_eq!(result.sample_matches.len(), 20);
        assert!(rule_store.list().await.unwrap().is_empty());
    }
}
