use crate::context::TelemetryLabels;

fn label_pairs(labels: &TelemetryLabels) -> Vec<metrics::Label> {
    labels
        .tags()
        .into_iter()
        .map(|(k, v)| metrics::Label::new(k, v))
        .collect()
}

pub fn record_counter(name: &'static str, value: u64, labels: &TelemetryLabels) {
    metrics::counter!(name, label_pairs(labels)).increment(value);
}

pub fn record_gauge(name: &'static str, value: f64, labels: &TelemetryLabels) {
    metrics::gauge!(name, label_pairs(labels)).set(value);
}

pub fn record_histogram(name: &'static str, value: f64, labels: &TelemetryLabels) {
    metrics::histogram!(name, label_pairs(labels)).record(value);
}
