//! Persisted rule definitions, same `RwLock<HashMap>` plus JSON-snapshot
//! shape as [`crate::dlq_store`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use servicehub_core::{Rule, ServiceHubError};

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Rule>, ServiceHubError>;
    async fn get(&self, id: i64) -> Result<Rule, ServiceHubError>;
    async fn put(&self, rule: Rule) -> Result<Rule, ServiceHubError>;
    async fn delete(&self, id: i64) -> Result<(), ServiceHubError>;
    async fn record_match(&self, id: i64, succeeded: Option<bool>) -> Result<(), ServiceHubError>;
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    rules: Vec<Rule>,
    next_id: i64,
}

pub struct InMemoryRuleStore {
    rules: RwLock<HashMap<i64, Rule>>,
    next_id: AtomicI64,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            snapshot_path: None,
        }
    }

    pub fn with_snapshot_path(path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: Some(path.into()),
            ..Self::new()
        }
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ServiceHubError> {
        let path = path.into();
        let store = Self::with_snapshot_path(path.clone());
        if !path.exists() {
            return Ok(store);
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|err| ServiceHubError::Internal(format!("read rule snapshot: {err}")))?;
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .map_err(|err| ServiceHubError::Internal(format!("parse rule snapshot: {err}")))?;
        let mut rules = store.rules.write().expect("rule store lock poisoned");
        for rule in snapshot.rules {
            rules.insert(rule.id, rule);
        }
        drop(rules);
        store.next_id.store(snapshot.next_id.max(1), Ordering::SeqCst);
        Ok(store)
    }

    fn persist(&self, rules: &HashMap<i64, Rule>) -> Result<(), ServiceHubError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = Snapshot {
            rules: rules.values().cloned().collect(),
            next_id: self.next_id.load(Ordering::SeqCst),
        };
        write_snapshot(path, &snapshot)
    }
}

impl Default for InMemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), ServiceHubError> {
    let raw = serde_json::to_vec_pretty(snapshot)
        .map_err(|err| ServiceHubError::Internal(format!("serialize rule snapshot: {err}")))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| ServiceHubError::Internal(format!("create snapshot dir: {err}")))?;
    }
    std::fs::write(path, raw)
        .map_err(|err| ServiceHubError::Internal(format!("write rule snapshot: {err}")))
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn list(&self) -> Result<Vec<Rule>, ServiceHubError> {
        let mut rules: Vec<Rule> = self
            .rules
            .read()
            .expect("rule store lock poisoned")
            .values()
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn get(&self, id: i64) -> Result<Rule, ServiceHubError> {
        self.rules
            .read()
            .expect("rule store lock poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceHubError::NotFound(format!("rule {id} not found")))
    }

    async fn put(&self, mut rule: Rule) -> Result<Rule, ServiceHubError> {
        let mut rules = self.rules.write().expect("rule store lock poisoned");
        if rule.id == 0 {
            rule.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        }
        rules.insert(rule.id, rule.clone());
        self.persist(&rules)?;
        Ok(rule)
    }

    async fn delete(&self, id: i64) -> Result<(), ServiceHubError> {
        let mut rules = self.rules.write().expect("rule store lock poisoned");
        rules
            .remove(&id)
            .ok_or_else(|| ServiceHubError::NotFound(format!("rule {id} not found")))?;
        self.persist(&rules)
    }

    async fn record_match(&self, id: i64, succeeded: Option<bool>) -> Result<(), ServiceHubError> {
        let mut rules = self.rules.write().expect("rule store lock poisoned");
        let rule = rules
            .get_mut(&id)
            .ok_or_else(|| ServiceHubError::NotFound(format!("rule {id} not found")))?;
        rule.match_count += 1;
        if succeeded == Some(true) {
            rule.success_count += 1;
        }
        self.persist(&rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servicehub_core::RuleAction;
    use time::OffsetDateTime;

    fn sample_rule() -> Rule {
        Rule {
            id: 0,
            name: "retry-transient".into(),
            description: None,
            enabled: true,
            conditions: vec![],
            action: RuleAction {
                auto_replay: true,
                delay_seconds: 30,
                max_retries: 3,
                exponential_backoff: true,
                target_entity: None,
            },
            max_replays_per_hour: 10,
            match_count: 0,
            success_count: 0,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
            disabled_reason: None,
        }
    }

    #[tokio::test]
    async fn put_assigns_an_id_and_list_returns_it_sorted() {
        let store = InMemoryRuleStore::new();
        let saved = store.put(sample_rule()).await.unwrap();
        assert!(saved.id > 0);
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn record_match_accumulates_counts() {
        let store = InMemoryRuleStore::new();
        let saved = store.put(sample_rule()).await.unwrap();
        store.record_match(saved.id, Some(true)).await.unwrap();
        store.record_match(saved.id, Some(false)).await.unwrap();
        let rule = store.get(saved.id).await.unwrap();
        assert_eq!(rule.match_count, 2);
        assert_eq!(rule.success_count, 1);
    }

    #[tokio::test]
    async fn delete_missing_rule_is_not_found() {
        let store = InMemoryRuleStore::new();
        let err = store.delete(999).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
