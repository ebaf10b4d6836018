//! The persisted data model: namespaces, DLQ history entries, replay history,
//! and rule definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A broker tenant addressable by one credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub id: String,
    pub name: String,
    pub display_label: String,
    pub credential_ref: String,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
    pub last_connection_test_succeeded: Option<bool>,
}

/// Queue vs. subscription-under-topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    Queue,
    Subscription,
}

/// The classifier's failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCategory {
    Transient,
    MaxDelivery,
    Expired,
    DataQuality,
    Authorization,
    ProcessingError,
    ResourceNotFound,
    QuotaExceeded,
    Unknown,
}

/// Lifecycle status of a DLQ history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DlqStatus {
    Active,
    Replayed,
    Archived,
    Discarded,
    ReplayFailed,
}

/// The tuple that uniquely identifies one broker message as observed by this
/// system.
///
/// `topicName` participates deliberately (see DESIGN.md), so that two
/// subscriptions under the same topic never collide on the same
/// `brokerMessageId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub namespace_id: String,
    pub entity_name: String,
    pub entity_type: EntityType,
    pub topic_name: Option<String>,
    pub broker_message_id: String,
    pub sequence_number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqHistoryEntry {
    pub id: i64,
    pub broker_message_id: String,
    pub sequence_number: i64,
    pub body_hash: String,
    pub namespace_id: String,
    pub entity_name: String,
    pub entity_type: EntityType,
    pub topic_name: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at_utc: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub dead_lettered_at_utc: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub detected_at_utc: OffsetDateTime,
    pub dead_letter_reason: Option<String>,
    pub dead_letter_error_description: Option<String>,
    pub delivery_count: i64,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub body_preview: String,
    #[serde(default)]
    pub application_properties: BTreeMap<String, serde_json::Value>,
    pub failure_category: FailureCategory,
    pub category_confidence: f64,
    pub status: DlqStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub replayed_at: Option<OffsetDateTime>,
    pub replay_success: Option<bool>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub archived_at: Option<OffsetDateTime>,
    pub user_notes: Option<String>,
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
}

impl DlqHistoryEntry {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            namespace_id: self.namespace_id.clone(),
            entity_name: self.entity_name.clone(),
            entity_type: self.entity_type,
            topic_name: self.topic_name.clone(),
            broker_message_id: self.broker_message_id.clone(),
            sequence_number: self.sequence_number,
        }
    }

    /// Statuses from which no further transition is allowed, except the
    /// `Replayed <-> Archived` pair reserved for operator notes.
    pub fn is_final(&self) -> bool {
        matches!(
            self.status,
            DlqStatus::Replayed | DlqStatus::Archived | DlqStatus::Discarded
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayOutcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayHistoryEntry {
    pub id: i64,
    pub dlq_entry_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub replayed_at: OffsetDateTime,
    pub replayed_by: String,
    pub strategy: String,
    pub replayed_to_entity: String,
    pub outcome_status: ReplayOutcome,
    pub new_dead_letter_reason: Option<String>,
    pub error_details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleConditionField {
    DeadLetterReason,
    DeadLetterErrorDescription,
    FailureCategory,
    EntityName,
    DeliveryCount,
    ContentType,
    TopicName,
    CorrelationId,
    ApplicationProperty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOperator {
    Contains,
    NotContains,
    Equals,
    NotEquals,
    StartsWith,
    EndsWith,
    Regex,
    GreaterThan,
    LessThan,
    In,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub field: RuleConditionField,
    pub operator: RuleOperator,
    pub value: String,
    #[serde(default)]
    pub case_sensitive: bool,
    pub property_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleAction {
    pub auto_replay: bool,
    pub delay_seconds: u64,
    pub max_retries: u32,
    pub exponential_backoff: bool,
    pub target_entity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub conditions: Vec<RuleCondition>,
    pub action: RuleAction,
    pub max_replays_per_hour: u32,
    pub match_count: u64,
    pub success_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Set when the rule failed load-time validation (e.g. a bad regex);
    /// the rule is treated as disabled until the operator fixes it.
    pub disabled_reason: Option<String>,
}

impl Rule {
    pub fn historical_success_rate(&self) -> f64 {
        if self.match_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.match_count as f64
        }
    }
}

/// Derived timeline view, reconstructed from a `DlqHistoryEntry` and its
/// `ReplayHistoryEntry` rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TimelineEvent {
    Enqueued {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    DeadLettered {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    Detected {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    ReplayedSuccess {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    ReplayedFailed {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    StatusChanged {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    Archived {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
}

impl TimelineEvent {
    pub fn at(&self) -> OffsetDateTime {
        match self {
            TimelineEvent::Enqueued { at }
            | TimelineEvent::DeadLettered { at }
            | TimelineEvent::Detected { at }
            | TimelineEvent::ReplayedSuccess { at }
            | TimelineEvent::ReplayedFailed { at }
            | TimelineEvent::StatusChanged { at }
            | TimelineEvent::Archived { at } => *at,
        }
    }

    /// Stable tiebreak order for events sharing a timestamp.
    fn rank(&self) -> u8 {
        match self {
            TimelineEvent::Enqueued { .. } => 0,
            TimelineEvent::DeadLettered { .. } => 1,
            TimelineEvent::Detected { .. } => 2,
            TimelineEvent::ReplayedFailed { .. } => 3,
            TimelineEvent::ReplayedSuccess { .. } => 4,
            TimelineEvent::StatusChanged { .. } => 5,
            TimelineEvent::Archived { .. } => 6,
        }
    }
}

/// Builds the deterministic timeline for one entry.
pub fn build_timeline(
    entry: &DlqHistoryEntry,
    replays: &[ReplayHistoryEntry],
) -> Vec<TimelineEvent> {
    let mut events = vec![
        TimelineEvent::Enqueued {
            at: entry.enqueued_at_utc,
        },
        TimelineEvent::DeadLettered {
            at: entry.dead_lettered_at_utc,
        },
        TimelineEvent::Detected {
            at: entry.detected_at_utc,
        },
    ];
    for replay in replays {
        events.push(match replay.outcome_status {
            ReplayOutcome::Success => TimelineEvent::ReplayedSuccess {
                at: replay.replayed_at,
            },
            ReplayOutcome::Failed => TimelineEvent::ReplayedFailed {
                at: replay.replayed_at,
            },
        });
    }
    if let Some(archived_at) = entry.archived_at {
        events.push(TimelineEvent::Archived { at: archived_at });
    }
    events.sort_by(|a, b| a.at().cmp(&b.at()).then(a.rank().cmp(&b.rank())));
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(seconds: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(seconds).unwrap()
    }

    fn sample_entry() -> DlqHistoryEntry {
        DlqHistoryEntry {
            id: 1,
            broker_message_id: "m1".into(),
            sequence_number: 101,
            body_hash: "deadbeef".into(),
            namespace_id: "ns1".into(),
            entity_name: "q1".into(),
            entity_type: EntityType::Queue,
            topic_name: None,
            enqueued_at_utc: ts(0),
            dead_lettered_at_utc: ts(1),
            detected_at_utc: ts(2),
            dead_letter_reason: Some("MaxDeliveryCountExceeded".into()),
            dead_letter_error_description: None,
            delivery_count: 10,
            content_type: None,
            size_bytes: 128,
            body_preview: "preview".into(),
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

    #[test]
    fn timeline_is_nondecreasing_and_ordered() {
        let entry = sample_entry();
        let replays = vec![
            ReplayHistoryEntry {
                id: 1,
                dlq_entry_id: 1,
                replayed_at: ts(3),
                replayed_by: "manual".into(),
                strategy: "resend".into(),
                replayed_to_entity: "q1".into(),
                outcome_status: ReplayOutcome::Failed,
                new_dead_letter_reason: None,
                error_details: Some("boom".into()),
            },
            ReplayHistoryEntry {
                id: 2,
                dlq_entry_id: 1,
                replayed_at: ts(4),
                replayed_by: "manual".into(),
                strategy: "resend".into(),
                replayed_to_entity: "q1".into(),
                outcome_status: ReplayOutcome::Success,
                new_dead_letter_reason: None,
                error_details: None,
            },
        ];
        let timeline = build_timeline(&entry, &replays);
        let timestamps: Vec<i64> = timeline.iter().map(|e| e.at().unix_timestamp()).collect();
        assert_eq!(timestamps, vec![0, 1, 2, 3, 4]);
        assert!(matches!(timeline[0], TimelineEvent::Enqueued { .. }));
        assert!(matches!(timeline[3], TimelineEvent::ReplayedFailed { .. }));
        assert!(matches!(timeline[4], TimelineEvent::ReplayedSuccess { .. }));
    }

    #[test]
    fn dedup_key_includes_topic_name() {
        let mut a = sample_entry();
        a.entity_type = EntityType::Subscription;
        a.topic_name = Some("topic-a".into());
        let mut b = a.clone();
        b.topic_name = Some("topic-b".into());
        assert_ne!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn final_statuses_block_further_transition() {
        let mut entry = sample_entry();
        entry.status = DlqStatus::Replayed;
        assert!(entry.is_final());
        entry.status = DlqStatus::ReplayFailed;
        assert!(!entry.is_final());
    }
}
