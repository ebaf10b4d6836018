//! Pure, deterministic classification of dead-lettered messages.
//!
//! `classify` takes no collaborators and performs no I/O, so replay
//! re-classification is guaranteed stable across processes.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::FailureCategory;

/// Inputs the classifier considers. All fields are plain data — no store or
/// gateway handle — so the function stays pure.
#[derive(Debug, Clone, Default)]
pub struct ClassifierInput<'a> {
    pub dead_letter_reason: Option<&'a str>,
    pub dead_letter_error_description: Option<&'a str>,
    pub delivery_count: i64,
    pub max_delivery_count: Option<i64>,
    pub ttl_expired: bool,
}

static AUTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)unauthori[sz]ed|forbidden|401|403").unwrap());
static QUOTA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)quota|throttle|429|size.*exceed").unwrap());
static NOT_FOUND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)not\s*found|404").unwrap());
static DATA_QUALITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)json|schema|deserial|parse|validation").unwrap());
static TRANSIENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)timeout|connection|transient|5\d\d").unwrap());

fn haystack<'a>(input: &ClassifierInput<'a>) -> String {
    let mut parts = Vec::new();
    if let Some(reason) = input.dead_letter_reason {
        parts.push(reason);
    }
    if let Some(desc) = input.dead_letter_error_description {
        parts.push(desc);
    }
    parts.join(" ")
}

/// Classifies one dead-lettered message, applying an ordered precedence
/// cascade (first match wins).
pub fn classify(input: &ClassifierInput<'_>) -> (FailureCategory, f64) {
    let reason = input.dead_letter_reason.unwrap_or_default();

    let max_delivery_exceeded = reason.contains("MaxDeliveryCountExceeded")
        || input
            .max_delivery_count
            .is_some_and(|max| input.delivery_count >= max);
    if max_delivery_exceeded {
        return (FailureCategory::MaxDelivery, 0.99);
    }

    if input.ttl_expired || reason.contains("TTLExpired") || reason.contains("Expired") {
        return (FailureCategory::Expired, 0.99);
    }

    let text = haystack(input);
    if AUTH_RE.is_match(&text) {
        return (FailureCategory::Authorization, 0.95);
    }
    if QUOTA_RE.is_match(&text) {
        return (FailureCategory::QuotaExceeded, 0.90);
    }
    if NOT_FOUND_RE.is_match(&text) {
        return (FailureCategory::ResourceNotFound, 0.85);
    }
    if DATA_QUALITY_RE.is_match(&text) {
        return (FailureCategory::DataQuality, 0.80);
    }
    if TRANSIENT_RE.is_match(&text) {
        return (FailureCategory::Transient, 0.70);
    }

    if input.dead_letter_reason.is_some() {
        (FailureCategory::ProcessingError, 0.50)
    } else {
        (FailureCategory::Unknown, 0.10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_delivery_exceeded_by_reason_token() {
        let input = ClassifierInput {
            dead_letter_reason: Some("MaxDeliveryCountExceeded"),
            delivery_count: 10,
            ..Default::default()
        };
        assert_eq!(classify(&input), (FailureCategory::MaxDelivery, 0.99));
    }

    #[test]
    fn max_delivery_exceeded_by_count_comparison() {
        let input = ClassifierInput {
            dead_letter_reason: Some("whatever"),
            delivery_count: 12,
            max_delivery_count: Some(10),
            ..Default::default()
        };
        assert_eq!(classify(&input), (FailureCategory::MaxDelivery, 0.99));
    }

    #[test]
    fn expired_takes_precedence_over_generic_processing_error() {
        let input = ClassifierInput {
            dead_letter_reason: Some("TTLExpired"),
            ..Default::default()
        };
        assert_eq!(classify(&input), (FailureCategory::Expired, 0.99));
    }

    #[test]
    fn authorization_detected_in_error_description() {
        let input = ClassifierInput {
            dead_letter_reason: Some("HandlerFailed"),
            dead_letter_error_description: Some("403 Forbidden from downstream"),
            ..Default::default()
        };
        assert_eq!(classify(&input), (FailureCategory::Authorization, 0.95));
    }

    #[test]
    fn quota_detected() {
        let input = ClassifierInput {
            dead_letter_reason: Some("rate limited: 429 too many requests"),
            ..Default::default()
        };
        assert_eq!(classify(&input), (FailureCategory::QuotaExceeded, 0.90));
    }

    #[test]
    fn data_quality_detected() {
        let input = ClassifierInput {
            dead_letter_reason: Some("JSON deserialization failed"),
            ..Default::default()
        };
        assert_eq!(classify(&input), (FailureCategory::DataQuality, 0.80));
    }

    #[test]
    fn transient_detected() {
        let input = ClassifierInput {
            dead_letter_reason: Some("connection timeout to handler"),
            ..Default::default()
        };
        assert_eq!(classify(&input), (FailureCategory::Transient, 0.70));
    }

    #[test]
    fn unmatched_reason_is_processing_error() {
        let input = ClassifierInput {
            dead_letter_reason: Some("SomeOtherIssue"),
            ..Default::default()
        };
        assert_eq!(classify(&input), (FailureCategory::ProcessingError, 0.50));
    }

    #[test]
    fn absent_reason_is_unknown() {
        let input = ClassifierInput::default();
        assert_eq!(classify(&input), (FailureCategory::Unknown, 0.10));
    }

    #[test]
    fn classify_is_pure_and_deterministic() {
        let input = ClassifierInput {
            dead_letter_reason: Some("connection timeout"),
            ..Default::default()
        };
        assert_eq!(classify(&input), classify(&input));
    }
}
