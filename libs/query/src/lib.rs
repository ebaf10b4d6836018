//! Read-only view over the DLQ store: filtered listing, per-entry timelines,
//! and summary aggregates for the namespace dashboard.

use std::sync::Arc;

use servicehub_core::{DlqHistoryEntry, ReplayHistoryEntry, ServiceHubError, TimelineEvent};
use servicehub_store::{DlqAggregate, DlqFilter, DlqPage, DlqStore};

pub struct DlqQueryService {
    store: Arc<dyn DlqStore>,
}

impl DlqQueryService {
    pub fn new(store: Arc<dyn DlqStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self, filter: DlqFilter) -> Result<DlqPage, ServiceHubError> {
        self.store.list_by_filter(&filter).await
    }

    pub async fn get(&self, id: i64) -> Result<DlqHistoryEntry, ServiceHubError> {
        self.store.get(id).await
    }

    pub async fn timeline(&self, id: i64) -> Result<Vec<TimelineEvent>, ServiceHubError> {
        self.store.timeline(id).await
    }

    pub async fn replays(&self, id: i64) -> Result<Vec<ReplayHistoryEntry>, ServiceHubError> {
        self.store.replays_for(id).await
    }

    pub async fn summary(&self, namespace_id: Option<&str>) -> Result<DlqAggregate, ServiceHubError> {
        self.store.aggregate(namespace_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servicehub_core::{DlqStatus, EntityType, FailureCategory};
    use servicehub_store::InMemoryDlqStore;
    use std::collections::BTreeMap;
    use time::OffsetDateTime;

    fn entry(namespace_id: &str, broker_message_id: &str) -> DlqHistoryEntry {
        DlqHistoryEntry {
            id: 0,
            broker_message_id: broker_message_id.into(),
            sequence_number: 1,
            body_hash: "h".into(),
            namespace_id: namespace_id.into(),
            entity_name: "orders-q".into(),
            entity_type: EntityType::Queue,
            topic_name: None,
            enqueued_at_utc: OffsetDateTime::now_utc(),
            dead_lettered_at_utc: OffsetDateTime::now_utc(),
            detected_at_utc: OffsetDateTime::now_utc(),
            dead_letter_reason: Some("Expired".into()),
            dead_letter_error_description: None,
            delivery_count: 1,
            content_type: None,
            size_bytes: 1,
            body_preview: "p".into(),
            application_properties: BTreeMap::new(),
            failure_category: FailureCategory::Expired,
            category_confidence: 0.9,
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
    async fn summary_scopes_counts_to_one_namespace() {
        let store = Arc::new(InMemoryDlqStore::new());
        store.upsert_by_dedup_key(entry("ns1", "m1")).await.unwrap();
        store.upsert_by_dedup_key(entry("ns2", "m2")).await.unwrap();

        let service = DlqQueryService::new(store);
        let summary = service.summary(Some("ns1")).await.unwrap();
        assert_eq!(summary.total, 1);
    }

    #[tokio::test]
    async fn list_paginates_and_reports_total_across_pages() {
        let store = Arc::new(InMemoryDlqStore::new());
        for i in 0..5 {
            store
                .upsert_by_dedup_key(entry("ns1", &format!("m{i}")))
                .await
                .unwrap();
        }
        let service = DlqQueryService::new(store);
        let page = service
            .list(DlqFilter {
                namespace_id: Some("ns1".into()),
                page: 1,
                page_size: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 5);
    }
}
