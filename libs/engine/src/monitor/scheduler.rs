//! Fixed-tick fan-out across namespaces with bounded parallelism, per-namespace
//! no-overlap, a per-tick deadline, and cooperative cancellation.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{DlqMonitor, MonitorTickReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl SchedulerState {
    fn from_code(code: u8) -> Self {
        match code {
            0 => SchedulerState::Starting,
            1 => SchedulerState::Running,
            2 => SchedulerState::Stopping,
            _ => SchedulerState::Stopped,
        }
    }

    fn code(self) -> u8 {
        match self {
            SchedulerState::Starting => 0,
            SchedulerState::Running => 1,
            SchedulerState::Stopping => 2,
            SchedulerState::Stopped => 3,
        }
    }
}

pub struct MonitorScheduler {
    monitors: Vec<(String, Arc<DlqMonitor>)>,
    tick_interval: StdDuration,
    tick_deadline: StdDuration,
    semaphore: Arc<Semaphore>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    in_flight: Arc<DashMap<String, ()>>,
}

impl MonitorScheduler {
    pub fn new(
        monitors: Vec<(String, Arc<DlqMonitor>)>,
        tick_interval: StdDuration,
        tick_deadline: StdDuration,
        max_parallel: usize,
    ) -> Self {
        Self {
            monitors,
            tick_interval,
            tick_deadline,
            semaphore: Arc::new(Semaphore::new(max_parallel.max(1))),
            state: Arc::new(AtomicU8::new(SchedulerState::Starting.code())),
            cancel: CancellationToken::new(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_code(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state.code(), Ordering::SeqCst);
    }

    /// Runs tick after tick until cancelled. Intended to be driven by
    /// `tokio::spawn(scheduler.run())`.
    pub async fn run(self: Arc<Self>) {
        self.set_state(SchedulerState::Running);
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.fire_tick().await,
            }
        }
        self.set_state(SchedulerState::Stopped);
    }

    /// Runs exactly one tick outside of the `run` loop; used by callers that
    /// want to drive ticking on their own schedule (e.g. a dynamically
    /// changing namespace set).
    pub async fn tick_once(&self) {
        self.fire_tick().await;
    }

    async fn fire_tick(&self) {
        let mut handles = Vec::with_capacity(self.monitors.len());
        for (namespace_id, monitor) in &self.monitors {
            if self.in_flight.contains_key(namespace_id) {
                tracing::debug!(namespace_id, "skipping tick, previous tick still in flight");
                continue;
            }
            let namespace_id = namespace_id.clone();
            let monitor = monitor.clone();
            let semaphore = self.semaphore.clone();
            let in_flight = self.in_flight.clone();
            let deadline = self.tick_deadline;

            in_flight.insert(namespace_id.clone(), ());
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let outcome = tokio::time::timeout(deadline, monitor.run_once()).await;
                in_flight.remove(&namespace_id);
                match outcome {
                    Ok(Ok(report)) => log_report(&namespace_id, &report),
                    Ok(Err(err)) => tracing::warn!(namespace_id, %err, "monitor tick failed"),
                    Err(_) => tracing::warn!(namespace_id, "monitor tick exceeded its deadline"),
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Requests a stop and waits up to `grace` for the run loop to settle
    /// into `Stopped`.
    pub async fn stop(&self, grace: StdDuration) {
        self.set_state(SchedulerState::Stopping);
        self.cancel.cancel();
        for (_, monitor) in &self.monitors {
            monitor.shutdown_replays();
        }
        let deadline = tokio::time::Instant::now() + grace;
        while self.state() != SchedulerState::Stopped && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    }
}

fn log_report(namespace_id: &str, report: &MonitorTickReport) {
    tracing::info!(
        namespace_id,
        entities_scanned = report.entities_scanned,
        detected = report.detected,
        updated = report.updated,
        replays_triggered = report.replays_triggered,
        entity_failures = report.entity_failures.len(),
        "monitor tick complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::ReplayExecutor;
    use crate::rules::RuleEngine;
    use servicehub_broker::SimulatedBrokerGateway;
    use servicehub_core::EntityType;
    use servicehub_store::{InMemoryDlqStore, InMemoryRuleStore};

    fn one_namespace_monitor() -> (Arc<SimulatedBrokerGateway>, Arc<DlqMonitor>) {
        let gateway = Arc::new(SimulatedBrokerGateway::new());
        gateway.register_queue("orders-q");
        let dlq_store = Arc::new(InMemoryDlqStore::new());
        let rule_engine = Arc::new(RuleEngine::new(Arc::new(InMemoryRuleStore::new())));
        let replay_executor = Arc::new(ReplayExecutor::new(gateway.clone(), dlq_store.clone()));
        let monitor = Arc::new(DlqMonitor::new(
            "ns1",
            gateway.clone(),
            dlq_store,
            rule_engine,
            replay_executor,
            20,
        ));
        (gateway, monitor)
    }

    #[tokio::test]
    async fn starts_running_and_settles_to_stopped_after_stop() {
        let (gateway, monitor) = one_namespace_monitor();
        gateway
            .dead_letter("orders-q", EntityType::Queue, 1, "Expired", None)
            .await
            .unwrap();

        let scheduler = Arc::new(MonitorScheduler::new(
            vec![("ns1".to_string(), monitor)],
            StdDuration::from_millis(20),
            StdDuration::from_secs(5),
            2,
        ));
        let handle = tokio::spawn(scheduler.clone().run());
        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);

        scheduler.stop(StdDuration::from_secs(1)).await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn a_slow_tick_does_not_overlap_with_the_next_one() {
        let (_gateway, monitor) = one_namespace_monitor();
        let scheduler = Arc::new(MonitorScheduler::new(
            vec![("ns1".to_string(), monitor)],
            StdDuration::from_millis(5),
            StdDuration::from_secs(5),
            4,
        ));
        scheduler.fire_tick().await;
        assert!(scheduler.in_flight.is_empty());
    }
}
