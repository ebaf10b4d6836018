//! Executes a single replay: reconstruct the original message from the
//! broker's DLQ, resend it, and record the outcome atomically.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use servicehub_core::{
    BrokerGateway, DlqStatus, Message, ReplayHistoryEntry, ReplayOutcome, RuleAction, ServiceHubError,
};
use servicehub_store::DlqStore;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

pub struct ReplayExecutor {
    gateway: Arc<dyn BrokerGateway>,
    store: Arc<dyn DlqStore>,
    cancel: CancellationToken,
}

impl ReplayExecutor {
    pub fn new(gateway: Arc<dyn BrokerGateway>, store: Arc<dyn DlqStore>) -> Self {
        Self {
            gateway,
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancels any in-flight or future replay's delay/backoff sleeps. Used
    /// by the scheduler on shutdown so a stop request doesn't leave replays
    /// sleeping through the grace period.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Sleeps `duration`, returning early with `Timeout` if cancelled first.
    async fn sleep_or_cancel(&self, duration: StdDuration) -> Result<(), ServiceHubError> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(ServiceHubError::Timeout("replay cancelled during backoff".into())),
        }
    }

    /// Replays `entry_id` under `action`. No-op (returns `Ok` without
    /// touching the broker) if the entry is not `Active`, so a replay
    /// queued twice for the same entry only ever fires once.
    pub async fn execute(
        &self,
        entry_id: i64,
        action: &RuleAction,
        replayed_by: &str,
        strategy: &str,
    ) -> Result<ReplayOutcome, ServiceHubError> {
        let entry = self.store.get(entry_id).await?;
        if entry.status != DlqStatus::Active {
            return Ok(ReplayOutcome::Success);
        }

        if action.delay_seconds > 0 {
            self.sleep_or_cancel(StdDuration::from_secs(action.delay_seconds)).await?;
        }

        let target_entity = action.target_entity.clone().unwrap_or_else(|| entry.entity_name.clone());

        let mut attempt = 0u32;
        let mut last_error = String::new();
        loop {
            attempt += 1;
            let outcome = self
                .gateway
                .peek_dlq(&entry.entity_name, entry.entity_type, Some(entry.sequence_number - 1), 1)
                .await
                .map_err(|err| ServiceHubError::ExternalService(err.to_string()))
                .and_then(|messages| {
                    messages
                        .into_iter()
                        .find(|m| m.broker_message_id == entry.broker_message_id)
                        .ok_or_else(|| ServiceHubError::NotFound(format!("message {} no longer on the broker DLQ", entry.broker_message_id)))
                });

            let send_result = match outcome {
                Ok(message) => self.resend(&target_entity, &entry, message).await,
                Err(err) => Err(err),
            };

            match send_result {
                Ok(()) => {
                    self.store
                        .append_replay(
                            entry_id,
                            ReplayHistoryEntry {
                                id: 0,
                                dlq_entry_id: entry_id,
                                replayed_at: OffsetDateTime::now_utc(),
                                replayed_by: replayed_by.to_string(),
                                strategy: strategy.to_string(),
                                replayed_to_entity: target_entity,
                                outcome_status: ReplayOutcome::Success,
                                new_dead_letter_reason: None,
                                error_details: None,
                            },
                            DlqStatus::Replayed,
                        )
                        .await?;
                    return Ok(ReplayOutcome::Success);
                }
                Err(err) => {
                    last_error = err.to_string();
                    if attempt > action.max_retries {
                        break;
                    }
                    let backoff = if action.exponential_backoff {
                        StdDuration::from_secs(action.delay_seconds * 2u64.saturating_pow(attempt - 1))
                    } else {
                        StdDuration::from_secs(action.delay_seconds)
                    };
                    self.sleep_or_cancel(backoff).await?;
                }
            }
        }

        self.store
            .append_replay(
                entry_id,
                ReplayHistoryEntry {
                    id: 0,
                    dlq_entry_id: entry_id,
                    replayed_at: OffsetDateTime::now_utc(),
                    replayed_by: replayed_by.to_string(),
                    strategy: strategy.to_string(),
                    replayed_to_entity: target_entity,
                    outcome_status: ReplayOutcome::Failed,
                    new_dead_letter_reason: None,
                    error_details: Some(last_error),
                },
                DlqStatus::ReplayFailed,
            )
            .await?;
        Ok(ReplayOutcome::Failed)
    }

    async fn resend(
        &self,
        target_entity: &str,
        entry: &servicehub_core::DlqHistoryEntry,
        message: Message,
    ) -> Result<(), ServiceHubError> {
        self.gateway
            .send(target_entity, entry.entity_type, message)
            .await
            .map_err(|err| ServiceHubError::ExternalService(err.to_string()))
    }
}
