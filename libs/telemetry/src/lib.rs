//! Lightweight facade around tracing + metrics setup, shared by the server
//! and CLI binaries.

mod config;
mod context;
mod metrics;
mod tracing_init;

pub use config::TelemetryConfig;
pub use context::{correlation_id, TelemetryLabels};
pub use metrics::{record_counter, record_gauge, record_histogram};
pub use tracing_init::{init_telemetry, telemetry_enabled};

#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr, $labels:expr) => {{
        $crate::record_counter($name, $value, $labels)
    }};
}

#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr, $labels:expr) => {{
        $crate::record_gauge($name, $value, $labels)
    }};
}
