//! Core data model, error kinds, and the `BrokerGateway`/`Classifier`
//! contracts shared by every ServiceHub crate.

pub mod broker;
pub mod classifier;
pub mod error;
pub mod hash;
pub mod model;

pub use broker::{BrokerError, BrokerGateway, BrokerResult, EntitySummary, Message, RuntimeCounts};
pub use classifier::{classify, ClassifierInput};
pub use error::{ProblemDetails, Result, ServiceHubError};
pub use hash::{body_hash, body_preview};
pub use model::{
    build_timeline, DedupKey, DlqHistoryEntry, DlqStatus, EntityType, FailureCategory, Namespace,
    ReplayHistoryEntry, ReplayOutcome, Rule, RuleAction, RuleCondition, RuleConditionField,
    RuleOperator, TimelineEvent,
};
