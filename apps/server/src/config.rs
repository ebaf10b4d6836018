use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Server configuration, loaded from the environment the way
/// `GatewayConfig::load()` does it: defaults for everything optional,
/// hard failure on anything malformed.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub tick_interval: Duration,
    pub tick_deadline: Duration,
    pub max_parallel_namespaces: usize,
    pub dlq_page_size: usize,
    pub dlq_snapshot_path: Option<PathBuf>,
    pub rule_snapshot_path: Option<PathBuf>,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        let bind_addr = env_or("SERVICEHUB_BIND_ADDR", "0.0.0.0:8080")
            .parse()
            .context("SERVICEHUB_BIND_ADDR must be a valid socket address")?;
        let tick_interval_secs: u64 = env_or("SERVICEHUB_TICK_INTERVAL_SECS", "30")
            .parse()
            .context("SERVICEHUB_TICK_INTERVAL_SECS must be a non-negative integer")?;
        let tick_deadline_secs: u64 = env_or("SERVICEHUB_TICK_DEADLINE_SECS", "20")
            .parse()
            .context("SERVICEHUB_TICK_DEADLINE_SECS must be a non-negative integer")?;
        let max_parallel_namespaces: usize = env_or("SERVICEHUB_MAX_PARALLEL_NAMESPACES", "4")
            .parse()
            .context("SERVICEHUB_MAX_PARALLEL_NAMESPACES must be a positive integer")?;
        let dlq_page_size: usize = env_or("SERVICEHUB_DLQ_PAGE_SIZE", "50")
            .parse()
            .context("SERVICEHUB_DLQ_PAGE_SIZE must be a positive integer")?;
        let dlq_snapshot_path = std::env::var("SERVICEHUB_DLQ_SNAPSHOT_PATH").ok().map(PathBuf::from);
        let rule_snapshot_path = std::env::var("SERVICEHUB_RULE_SNAPSHOT_PATH").ok().map(PathBuf::from);

        Ok(Self {
            bind_addr,
            tick_interval: Duration::from_secs(tick_interval_secs),
            tick_deadline: Duration::from_secs(tick_deadline_secs),
            max_parallel_namespaces,
            dlq_page_size,
            dlq_snapshot_path,
            rule_snapshot_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_bind_to_all_interfaces_on_8080() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("SERVICEHUB_BIND_ADDR");
        let cfg = ServerConfig::load().unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
    }

    #[test]
    fn rejects_a_malformed_bind_addr() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("SERVICEHUB_BIND_ADDR", "not-an-address");
        let result = ServerConfig::load();
        std::env::remove_var("SERVICEHUB_BIND_ADDR");
        assert!(result.is_err());
    }
}
