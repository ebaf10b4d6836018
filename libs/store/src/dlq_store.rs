//! Deduplicating, persisted store for DLQ history and replay history.
//!
//! An `RwLock<HashMap<..>>` guards the live state, with an optional JSON
//! snapshot written after every mutation so a restarted process picks up
//! where it left off.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use servicehub_core::{
    build_timeline, DedupKey, DlqHistoryEntry, DlqStatus, FailureCategory, ReplayHistoryEntry,
    ServiceHubError, TimelineEvent,
};
use time::OffsetDateTime;

#[derive(Debug, Clone, Default)]
pub struct DlqFilter {
    pub namespace_id: Option<String>,
    pub entity_name: Option<String>,
    pub status: Option<DlqStatus>,
    pub failure_category: Option<FailureCategory>,
    pub search: Option<String>,
    pub min_delivery_count: Option<i64>,
    /// Inclusive range over `detectedAtUtc`, `(from, to)`.
    pub date_range: Option<(OffsetDateTime, OffsetDateTime)>,
    pub page: u32,
    pub page_size: u32,
}

impl DlqFilter {
    fn matches(&self, entry: &DlqHistoryEntry) -> bool {
        if let Some(ns) = &self.namespace_id {
            if &entry.namespace_id != ns {
                return false;
            }
        }
        if let Some(name) = &self.entity_name {
            if &entry.entity_name != name {
                return false;
            }
        }
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(category) = self.failure_category {
            if entry.failure_category != category {
                return false;
            }
        }
        if let Some(min_delivery_count) = self.min_delivery_count {
            if entry.delivery_count < min_delivery_count {
                return false;
            }
        }
        if let Some((from, to)) = self.date_range {
            if entry.detected_at_utc < from || entry.detected_at_utc > to {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let haystack = format!(
                "{} {} {}",
                entry.body_preview,
                entry.dead_letter_reason.as_deref().unwrap_or_default(),
                entry
                    .dead_letter_error_description
                    .as_deref()
                    .unwrap_or_default(),
            )
            .to_lowercase();
            if !haystack.contains(&needle) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct DlqPage {
    pub items: Vec<DlqHistoryEntry>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DailyCount {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub new: u64,
    pub resolved: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DlqAggregate {
    pub total: u64,
    pub by_status: HashMap<String, u64>,
    pub by_category: HashMap<String, u64>,
    pub by_entity: HashMap<String, u64>,
    pub daily: Vec<DailyCount>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub oldest: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub newest: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct UpsertResult {
    pub created: bool,
    pub entry: DlqHistoryEntry,
}

#[async_trait]
pub trait DlqStore: Send + Sync {
    async fn upsert_by_dedup_key(&self, candidate: DlqHistoryEntry) -> Result<UpsertResult, ServiceHubError>;
    async fn get(&self, id: i64) -> Result<DlqHistoryEntry, ServiceHubError>;
    async fn set_status(
        &self,
        id: i64,
        status: DlqStatus,
        user_notes: Option<String>,
    ) -> Result<DlqHistoryEntry, ServiceHubError>;
    async fn append_replay(
        &self,
        entry_id: i64,
        replay: ReplayHistoryEntry,
        resulting_status: DlqStatus,
    ) -> Result<(), ServiceHubError>;
    async fn list_by_filter(&self, filter: &DlqFilter) -> Result<DlqPage, ServiceHubError>;
    async fn aggregate(&self, namespace_id: Option<&str>) -> Result<DlqAggregate, ServiceHubError>;
    async fn timeline(&self, id: i64) -> Result<Vec<TimelineEvent>, ServiceHubError>;
    async fn replays_for(&self, id: i64) -> Result<Vec<ReplayHistoryEntry>, ServiceHubError>;
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    entries: Vec<DlqHistoryEntry>,
    replays: Vec<ReplayHistoryEntry>,
    next_entry_id: i64,
    next_replay_id: i64,
}

struct State {
    entries: HashMap<i64, DlqHistoryEntry>,
    replays: HashMap<i64, Vec<ReplayHistoryEntry>>,
    dedup_index: HashMap<DedupKey, i64>,
}

pub struct InMemoryDlqStore {
    state: RwLock<State>,
    next_entry_id: AtomicI64,
    next_replay_id: AtomicI64,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryDlqStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                entries: HashMap::new(),
                replays: HashMap::new(),
                dedup_index: HashMap::new(),
            }),
            next_entry_id: AtomicI64::new(1),
            next_replay_id: AtomicI64::new(1),
            snapshot_path: None,
        }
    }

    pub fn with_snapshot_path(path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: Some(path.into()),
            ..Self::new()
        }
    }

    /// Loads a previously persisted snapshot, or starts empty if the file
    /// does not exist yet.
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ServiceHubError> {
        let path = path.into();
        let store = Self::with_snapshot_path(path.clone());
        if !path.exists() {
            return Ok(store);
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|err| ServiceHubError::Internal(format!("read dlq snapshot: {err}")))?;
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .map_err(|err| ServiceHubError::Internal(format!("parse dlq snapshot: {err}")))?;

        let mut state = store.state.write().expect("dlq store lock poisoned");
        for entry in snapshot.entries {
            state.dedup_index.insert(entry.dedup_key(), entry.id);
            state.entries.insert(entry.id, entry);
        }
        for replay in snapshot.replays {
            state.replays.entry(replay.dlq_entry_id).or_default().push(replay);
        }
        drop(state);
        store.next_entry_id.store(snapshot.next_entry_id.max(1), Ordering::SeqCst);
        store.next_replay_id.store(snapshot.next_replay_id.max(1), Ordering::SeqCst);
        Ok(store)
    }

    fn persist(&self, state: &State) -> Result<(), ServiceHubError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = Snapshot {
            entries: state.entries.values().cloned().collect(),
            replays: state.replays.values().flatten().cloned().collect(),
            next_entry_id: self.next_entry_id.load(Ordering::SeqCst),
            next_replay_id: self.next_replay_id.load(Ordering::SeqCst),
        };
        write_snapshot(path, &snapshot)
    }
}

impl Default for InMemoryDlqStore {
    fn default() -> Self {
        Self::new()
    }
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), ServiceHubError> {
    let raw = serde_json::to_vec_pretty(snapshot)
        .map_err(|err| ServiceHubError::Internal(format!("serialize dlq snapshot: {err}")))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| ServiceHubError::Internal(format!("create snapshot dir: {err}")))?;
    }
    std::fs::write(path, raw)
        .map_err(|err| ServiceHubError::Internal(format!("write dlq snapshot: {err}")))
}

#[async_trait]
impl DlqStore for InMemoryDlqStore {
    async fn upsert_by_dedup_key(&self, mut candidate: DlqHistoryEntry) -> Result<UpsertResult, ServiceHubError> {
        let key = candidate.dedup_key();
        let mut state = self.state.write().expect("dlq store lock poisoned");

        if let Some(&existing_id) = state.dedup_index.get(&key) {
            let existing = state.entries.get_mut(&existing_id).expect("dedup index out of sync");
            existing.delivery_count = existing.delivery_count.max(candidate.delivery_count);
            existing.dead_letter_reason = candidate.dead_letter_reason.take().or(existing.dead_letter_reason.take());
            existing.dead_letter_error_description = candidate
                .dead_letter_error_description
                .take()
                .or(existing.dead_letter_error_description.take());
            let merged = existing.clone();
            self.persist(&state)?;
            return Ok(UpsertResult {
                created: false,
                entry: merged,
            });
        }

        let id = self.next_entry_id.fetch_add(1, Ordering::SeqCst);
        candidate.id = id;
        state.dedup_index.insert(key, id);
        state.entries.insert(id, candidate.clone());
        self.persist(&state)?;
        Ok(UpsertResult {
            created: true,
            entry: candidate,
        })
    }

    async fn get(&self, id: i64) -> Result<DlqHistoryEntry, ServiceHubError> {
        self.state
            .read()
            .expect("dlq store lock poisoned")
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceHubError::NotFound(format!("dlq entry {id} not found")))
    }

    async fn set_status(
        &self,
        id: i64,
        status: DlqStatus,
        user_notes: Option<String>,
    ) -> Result<DlqHistoryEntry, ServiceHubError> {
        let mut state = self.state.write().expect("dlq store lock poisoned");
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or_else(|| ServiceHubError::NotFound(format!("dlq entry {id} not found")))?;

        let allowed = !entry.is_final()
            || matches!(
                (entry.status, status),
                (DlqStatus::Replayed, DlqStatus::Archived) | (DlqStatus::Archived, DlqStatus::Replayed)
            );
        if !allowed {
            return Err(ServiceHubError::BusinessRule(format!(
                "dlq entry {id} is in a terminal status ({:?}) and cannot transition to {:?}",
                entry.status, status
            )));
        }

        entry.status = status;
        if status == DlqStatus::Archived {
            entry.archived_at = Some(time::OffsetDateTime::now_utc());
        }
        if let Some(notes) = user_notes {
            entry.user_notes = Some(notes);
        }
        let updated = entry.clone();
        self.persist(&state)?;
        Ok(updated)
    }

    async fn append_replay(
        &self,
        entry_id: i64,
        replay: ReplayHistoryEntry,
        resulting_status: DlqStatus,
    ) -> Result<(), ServiceHubError> {
        let mut state = self.state.write().expect("dlq store lock poisoned");
        {
            let entry = state
                .entries
                .get_mut(&entry_id)
                .ok_or_else(|| ServiceHubError::NotFound(format!("dlq entry {entry_id} not found")))?;
            entry.status = resulting_status;
            entry.replayed_at = Some(replay.replayed_at);
            entry.replay_success = Some(matches!(
                replay.outcome_status,
                servicehub_core::ReplayOutcome::Success
            ));
        }
        let mut replay = replay;
        replay.id = self.next_replay_id.fetch_add(1, Ordering::SeqCst);
        state.replays.entry(entry_id).or_default().push(replay);
        self.persist(&state)
    }

    async fn list_by_filter(&self, filter: &DlqFilter) -> Result<DlqPage, ServiceHubError> {
        let state = self.state.read().expect("dlq store lock poisoned");
        let mut matched: Vec<DlqHistoryEntry> = state
            .entries
            .values()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.detected_at_utc.cmp(&a.detected_at_utc).then(b.id.cmp(&a.id)));

        let total = matched.len();
        let page_size = filter.page_size.max(1) as usize;
        let page = filter.page.max(1) as usize;
        let start = (page - 1) * page_size;
        let items = matched.into_iter().skip(start).take(page_size).collect();
        Ok(DlqPage {
            items,
            total,
            page: filter.page.max(1),
            page_size: filter.page_size.max(1),
        })
    }

    async fn aggregate(&self, namespace_id: Option<&str>) -> Result<DlqAggregate, ServiceHubError> {
        let state = self.state.read().expect("dlq store lock poisoned");
        let mut agg = DlqAggregate::default();
        let mut daily: BTreeMap<String, (u64, u64)> = BTreeMap::new();

        for entry in state.entries.values() {
            if let Some(ns) = namespace_id {
                if entry.namespace_id != ns {
                    continue;
                }
            }
            agg.total += 1;
            *agg.by_status.entry(format!("{:?}", entry.status)).or_insert(0) += 1;
            *agg
                .by_category
                .entry(format!("{:?}", entry.failure_category))
                .or_insert(0) += 1;
            *agg.by_entity.entry(entry.entity_name.clone()).or_insert(0) += 1;

            agg.oldest = Some(agg.oldest.map_or(entry.detected_at_utc, |oldest| oldest.min(entry.detected_at_utc)));
            agg.newest = Some(agg.newest.map_or(entry.detected_at_utc, |newest| newest.max(entry.detected_at_utc)));

            let detected_date = entry.detected_at_utc.date().to_string();
            daily.entry(detected_date).or_default().0 += 1;

            let resolved_at = entry.replayed_at.or(entry.archived_at);
            if entry.status != DlqStatus::Active {
                if let Some(resolved_at) = resolved_at {
                    daily.entry(resolved_at.date().to_string()).or_default().1 += 1;
                }
            }
        }

        agg.daily = daily
            .into_iter()
            .map(|(date, (new, resolved))| DailyCount { date, new, resolved })
            .collect();
        Ok(agg)
    }

    async fn timeline(&self, id: i64) -> Result<Vec<TimelineEvent>, ServiceHubError> {
        let state = self.state.read().expect("dlq store lock poisoned");
        let entry = state
            .entries
            .get(&id)
            .ok_or_else(|| ServiceHubError::NotFound(format!("dlq entry {id} not found")))?;
        let replays = state.replays.get(&id).cloned().unwrap_or_default();
        Ok(build_timeline(entry, &replays))
    }

    async fn replays_for(&self, id: i64) -> Result<Vec<ReplayHistoryEntry>, ServiceHubError> {
        Ok(self
            .state
            .read()
            .expect("dlq store lock poisoned")
            .replays
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servicehub_core::EntityType;
    use std::collections::BTreeMap;
    use time::OffsetDateTime;

    fn ts(seconds: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(seconds).unwrap()
    }

    fn sample(broker_message_id: &str, delivery_count: i64) -> DlqHistoryEntry {
        DlqHistoryEntry {
            id: 0,
            broker_message_id: broker_message_id.into(),
            sequence_number: 1,
            body_hash: "hash".into(),
            namespace_id: "ns1".into(),
            entity_name: "orders-q".into(),
            entity_type: EntityType::Queue,
            topic_name: None,
            enqueued_at_utc: ts(0),
            dead_lettered_at_utc: ts(1),
            detected_at_utc: ts(2),
            dead_letter_reason: Some("MaxDeliveryCountExceeded".into()),
            dead_letter_error_description: None,
            delivery_count,
            content_type: None,
            size_bytes: 64,
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

    #[tokio::test]
    async fn second_upsert_with_same_dedup_key_is_not_a_new_row() {
        let store = InMemoryDlqStore::new();
        let first = store.upsert_by_dedup_key(sample("m1", 5)).await.unwrap();
        assert!(first.created);
        let second = store.upsert_by_dedup_key(sample("m1", 7)).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.entry.delivery_count, 7);
        assert_eq!(second.entry.id, first.entry.id);

        let page = store
            .list_by_filter(&DlqFilter {
                page: 1,
                page_size: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn terminal_status_blocks_transition_except_replayed_archived_pair() {
        let store = InMemoryDlqStore::new();
        let created = store.upsert_by_dedup_key(sample("m1", 1)).await.unwrap();
        store
            .set_status(created.entry.id, DlqStatus::Discarded, None)
            .await
            .unwrap();
        let err = store
            .set_status(created.entry.id, DlqStatus::Active, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BUSINESS_RULE");
    }

    #[tokio::test]
    async fn replayed_and_archived_can_toggle() {
        let store = InMemoryDlqStore::new();
        let created = store.upsert_by_dedup_key(sample("m1", 1)).await.unwrap();
        store
            .set_status(created.entry.id, DlqStatus::Replayed, None)
            .await
            .unwrap();
        let archived = store
            .set_status(created.entry.id, DlqStatus::Archived, None)
            .await
            .unwrap();
        assert_eq!(archived.status, DlqStatus::Archived);
    }

    #[tokio::test]
    async fn list_filters_by_min_delivery_count_and_date_range() {
        let store = InMemoryDlqStore::new();
        let mut low = sample("m1", 1);
        low.detected_at_utc = ts(100);
        let mut high = sample("m2", 9);
        high.detected_at_utc = ts(200);
        store.upsert_by_dedup_key(low).await.unwrap();
        store.upsert_by_dedup_key(high).await.unwrap();

        let page = store
            .list_by_filter(&DlqFilter {
                min_delivery_count: Some(5),
                page: 1,
                page_size: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].broker_message_id, "m2");

        let page = store
            .list_by_filter(&DlqFilter {
                date_range: Some((ts(0), ts(150))),
                page: 1,
                page_size: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].broker_message_id, "m1");
    }

    #[tokio::test]
    async fn aggregate_reports_by_entity_daily_and_span() {
        let store = InMemoryDlqStore::new();
        let mut first = sample("m1", 1);
        first.detected_at_utc = ts(0);
        let mut second = sample("m2", 2);
        second.entity_name = "payments-q".into();
        second.detected_at_utc = ts(86_400);
        store.upsert_by_dedup_key(first).await.unwrap();
        let created_second = store.upsert_by_dedup_key(second).await.unwrap();
        store
            .set_status(created_second.entry.id, DlqStatus::Discarded, None)
            .await
            .unwrap();

        let agg = store.aggregate(None).await.unwrap();
        assert_eq!(agg.total, 2);
        assert_eq!(agg.by_entity.get("orders-q"), Some(&1));
        assert_eq!(agg.by_entity.get("payments-q"), Some(&1));
        assert_eq!(agg.daily.len(), 2);
        assert_eq!(agg.oldest, Some(ts(0)));
        assert_eq!(agg.newest, Some(ts(86_400)));
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.json");
        {
            let store = InMemoryDlqStore::with_snapshot_path(&path);
            store.upsert_by_dedup_key(sample("m1", 1)).await.unwrap();
        }
        let reloaded = InMemoryDlqStore::load_from_path(&path).unwrap();
        let page = reloaded
            .list_by_filter(&DlqFilter {
                page: 1,
                page_size: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }
}
