mod config;
mod http;
mod state;

use std::sync::Arc;

use servicehub_engine::MonitorScheduler;
use servicehub_store::{EncryptionKey, InMemoryCredentialStore, InMemoryDlqStore, InMemoryRuleStore};
use servicehub_telemetry::{init_telemetry, TelemetryConfig};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig::from_env("servicehub-server", env!("CARGO_PKG_VERSION")))?;

    let config = ServerConfig::load()?;
    let encryption_key = EncryptionKey::from_env()?;
    let credential_store = Arc::new(InMemoryCredentialStore::new(encryption_key));

    let dlq_store = Arc::new(match &config.dlq_snapshot_path {
        Some(path) => InMemoryDlqStore::load_from_path(path.clone())?,
        None => InMemoryDlqStore::new(),
    });
    let rule_store = Arc::new(match &config.rule_snapshot_path {
        Some(path) => InMemoryRuleStore::load_from_path(path.clone())?,
        None => InMemoryRuleStore::new(),
    });

    let state = Arc::new(AppState::new(config.clone(), credential_store, dlq_store, rule_store));

    tokio::spawn(run_monitor_loop(state.clone()));

    let router = http::build_router(state.clone()).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(bind_addr = %config.bind_addr, "servicehub listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Drives the DLQ monitor for every currently registered namespace on a
/// fixed interval. Namespaces can be registered or removed at any time, so a
/// fresh `MonitorScheduler` snapshot is built each tick instead of a single
/// long-lived one.
async fn run_monitor_loop(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(state.config.tick_interval);
    loop {
        ticker.tick().await;
        let monitors: Vec<(String, Arc<servicehub_engine::DlqMonitor>)> = state
            .namespaces
            .iter()
            .filter(|entry| entry.namespace.active)
            .map(|entry| (entry.namespace.id.clone(), entry.monitor.clone()))
            .collect();
        if monitors.is_empty() {
            continue;
        }
        let scheduler = MonitorScheduler::new(
            monitors,
            state.config.tick_interval,
            state.config.tick_deadline,
            state.config.max_parallel_namespaces,
        );
        scheduler.tick_once().await;
    }
}
