//! Persistence layer: DLQ history, replay history, rule definitions, and
//! encrypted namespace credentials.

mod credentials;
mod dlq_store;
mod rule_store;

pub use credentials::{BrokerCredential, CredentialStore, EncryptionKey, InMemoryCredentialStore};
pub use dlq_store::{DlqAggregate, DlqFilter, DlqPage, DlqStore, InMemoryDlqStore, UpsertResult};
pub use rule_store::{InMemoryRuleStore, RuleStore};
