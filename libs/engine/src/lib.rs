//! DLQ Intelligence: detection and classification, rule matching with
//! rate-limited auto-replay, and the replay executor itself.

pub mod monitor;
pub mod replay;
pub mod rules;

pub use monitor::{DlqMonitor, MonitorScheduler, MonitorTickReport, SchedulerState};
pub use replay::ReplayExecutor;
pub use rules::{
    BulkReplayOutcome, BulkReplayResult, ReplayRateLimiter, RuleEngine, RuleMatchDecision, RuleTestResult,
};
