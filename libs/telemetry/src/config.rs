use std::env;

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub json_logs: bool,
    /// Whether an external OTLP collector is configured. This crate does not
    /// ship the OTel exporter wiring itself; when set, callers can plug in
    /// their own exporter layer around `init_telemetry`'s subscriber.
    pub otel_enabled: bool,
    pub otel_endpoint: String,
}

impl TelemetryConfig {
    pub fn from_env(default_service_name: &str, default_service_version: &str) -> Self {
        let service_name =
            env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| default_service_name.to_string());
        let service_version = env::var("OTEL_SERVICE_VERSION")
            .unwrap_or_else(|_| default_service_version.to_string());
        let environment = env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "dev".into());
        let json_logs = env::var("LOG_FORMAT")
            .map(|v| !matches!(v.to_lowercase().as_str(), "text" | "pretty" | "plain"))
            .unwrap_or(true);
        let otel_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_default();
        let otel_enabled = env::var("ENABLE_OTEL")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
            && !otel_endpoint.trim().is_empty();

        Self {
            service_name,
            service_version,
            environment,
            json_logs,
            otel_enabled,
            otel_endpoint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn defaults_disabled() {
        let _guard = env_lock().lock().unwrap();
        std::env::remove_var("ENABLE_OTEL");
        std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        let cfg = TelemetryConfig::from_env("test-service", "0.0.1");
        assert!(!cfg.otel_enabled);
        assert!(cfg.json_logs);
    }

    #[test]
    fn enabled_when_flag_and_endpoint_present() {
        let _guard = env_lock().lock().unwrap();
        std::env::set_var("ENABLE_OTEL", "true");
        std::env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317");
        std::env::set_var("LOG_FORMAT", "text");
        let cfg = TelemetryConfig::from_env("svc", "1.2.3");
        assert!(cfg.otel_enabled);
        assert!(!cfg.json_logs);
        std::env::remove_var("ENABLE_OTEL");
        std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        std::env::remove_var("LOG_FORMAT");
    }
}
