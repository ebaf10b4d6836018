//! Pure condition evaluation: no I/O, no rule storage, just
//! `(entry, condition) -> matched?`.

use regex::Regex;
use servicehub_core::{DlqHistoryEntry, RuleCondition, RuleConditionField, RuleOperator};

fn field_value(entry: &DlqHistoryEntry, field: RuleConditionField, property_key: Option<&str>) -> Option<String> {
    match field {
        RuleConditionField::DeadLetterReason => entry.dead_letter_reason.clone(),
        RuleConditionField::DeadLetterErrorDescription => entry.dead_letter_error_description.clone(),
        RuleConditionField::FailureCategory => Some(format!("{:?}", entry.failure_category)),
        RuleConditionField::EntityName => Some(entry.entity_name.clone()),
        RuleConditionField::DeliveryCount => Some(entry.delivery_count.to_string()),
        RuleConditionField::ContentType => entry.content_type.clone(),
        RuleConditionField::TopicName => entry.topic_name.clone(),
        RuleConditionField::CorrelationId => entry.correlation_id.clone(),
        RuleConditionField::ApplicationProperty => {
            let key = property_key?;
            entry.application_properties.get(key).map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        }
    }
}

fn normalize(value: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        value.to_string()
    } else {
        value.to_lowercase()
    }
}

/// Evaluates one condition against one entry. `compiled_regex` must be
/// `Some` when `condition.operator == Regex`; it is compiled once per rule
/// version by the engine, not per evaluation.
pub fn evaluate_condition(
    entry: &DlqHistoryEntry,
    condition: &RuleCondition,
    compiled_regex: Option<&Regex>,
) -> Result<bool, String> {
    if matches!(condition.operator, RuleOperator::GreaterThan | RuleOperator::LessThan)
        && condition.field != RuleConditionField::DeliveryCount
    {
        return Err("numeric operators only apply to the deliveryCount field".into());
    }
    if condition.field == RuleConditionField::ApplicationProperty && condition.property_key.is_none() {
        return Err("applicationProperty conditions require propertyKey".into());
    }

    let actual = field_value(entry, condition.field, condition.property_key.as_deref());

    match condition.operator {
        RuleOperator::GreaterThan | RuleOperator::LessThan => {
            let actual_n: i64 = actual.and_then(|v| v.parse().ok()).unwrap_or(i64::MIN);
            let expected_n: i64 = condition
                .value
                .parse()
                .map_err(|_| format!("condition value {:?} is not numeric", condition.value))?;
            Ok(if condition.operator == RuleOperator::GreaterThan {
                actual_n > expected_n
            } else {
                actual_n < expected_n
            })
        }
        RuleOperator::Regex => {
            let regex = compiled_regex.ok_or_else(|| "regex condition missing compiled pattern".to_string())?;
            Ok(actual.map(|a| regex.is_match(&a)).unwrap_or(false))
        }
        RuleOperator::In => {
            let Some(actual) = actual else { return Ok(false) };
            let actual = normalize(&actual, condition.case_sensitive);
            Ok(condition
                .value
                .split(',')
                .map(|item| normalize(item.trim(), condition.case_sensitive))
                .any(|item| item == actual))
        }
        _ => {
            let Some(actual) = actual else { return Ok(false) };
            let actual = normalize(&actual, condition.case_sensitive);
            let expected = normalize(&condition.value, condition.case_sensitive);
            Ok(match condition.operator {
                RuleOperator::Contains => actual.contains(&expected),
                RuleOperator::NotContains => !actual.contains(&expected),
                RuleOperator::Equals => actual == expected,
                RuleOperator::NotEquals => actual != expected,
                RuleOperator::StartsWith => actual.starts_with(&expected),
                RuleOperator::EndsWith => actual.ends_with(&expected),
                RuleOperator::GreaterThan | RuleOperator::LessThan | RuleOperator::Regex | RuleOperator::In => {
                    unreachable!("handled above")
                }
            })
        }
    }
}

/// A rule matches only when every one of its conditions matches.
pub fn evaluate_all(
    entry: &DlqHistoryEntry,
    conditions: &[RuleCondition],
    compiled_regexes: &[Option<Regex>],
) -> Result<bool, String> {
    for (condition, compiled) in conditions.iter().zip(compiled_regexes.iter()) {
        if !evaluate_condition(entry, condition, compiled.as_ref())? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use servicehub_core::{DlqStatus, EntityType, FailureCategory};
    use std::collections::BTreeMap;
    use time::OffsetDateTime;

    fn entry() -> DlqHistoryEntry {
        DlqHistoryEntry {
            id: 1,
            broker_message_id: "m1".into(),
            sequence_number: 1,
            body_hash: "h".into(),
            namespace_id: "ns1".into(),
            entity_name: "orders-q".into(),
            entity_type: EntityType::Queue,
            topic_name: None,
            enqueued_at_utc: OffsetDateTime::now_utc(),
            dead_lettered_at_utc: OffsetDateTime::now_utc(),
            detected_at_utc: OffsetDateTime::now_utc(),
            dead_letter_reason: Some("MaxDeliveryCountExceeded".into()),
            dead_letter_error_description: Some("Timed out calling downstream".into()),
            delivery_count: 12,
            content_type: Some("application/json".into()),
            size_bytes: 10,
            body_preview: "preview".into(),
            application_properties: BTreeMap::from([(
                "tenant".to_string(),
                serde_json::Value::String("acme".into()),
            )]),
            failure_category: FailureCategory::MaxDelivery,
            category_confidence: 0.99,
            status: DlqStatus::Active,
            replayed_at: None,
            replay_success: None,
            archived_at: None,
            user_notes: None,
            correlation_id: None,
            session_id: None,
        }
    }

    fn cond(field: RuleConditionField, operator: RuleOperator, value: &str) -> RuleCondition {
        RuleCondition {
            field,
            operator,
            value: value.to_string(),
            case_sensitive: false,
            property_key: None,
        }
    }

    #[test]
    fn delivery_count_greater_than_matches_numerically() {
        let c = cond(RuleConditionField::DeliveryCount, RuleOperator::GreaterThan, "5");
        assert!(evaluate_condition(&entry(), &c, None).unwrap());
    }

    #[test]
    fn greater_than_on_non_delivery_count_is_rejected() {
        let c = cond(RuleConditionField::EntityName, RuleOperator::GreaterThan, "5");
        assert!(evaluate_condition(&entry(), &c, None).is_err());
    }

    #[test]
    fn case_insensitive_contains_matches() {
        let c = cond(RuleConditionField::DeadLetterReason, RuleOperator::Contains, "maxdelivery");
        assert!(evaluate_condition(&entry(), &c, None).unwrap());
    }

    #[test]
    fn case_sensitive_contains_respects_case() {
        let mut c = cond(RuleConditionField::DeadLetterReason, RuleOperator::Contains, "maxdelivery");
        c.case_sensitive = true;
        assert!(!evaluate_condition(&entry(), &c, None).unwrap());
    }

    #[test]
    fn in_operator_splits_on_comma() {
        let c = cond(
            RuleConditionField::FailureCategory,
            RuleOperator::In,
            "Expired, MaxDelivery, Transient",
        );
        assert!(evaluate_condition(&entry(), &c, None).unwrap());
    }

    #[test]
    fn application_property_without_key_is_rejected() {
        let c = cond(RuleConditionField::ApplicationProperty, RuleOperator::Equals, "acme");
        assert!(evaluate_condition(&entry(), &c, None).is_err());
    }

    #[test]
    fn application_property_with_key_reads_the_map() {
        let mut c = cond(RuleConditionField::ApplicationProperty, RuleOperator::Equals, "acme");
        c.property_key = Some("tenant".into());
        assert!(evaluate_condition(&entry(), &c, None).unwrap());
    }

    #[test]
    fn regex_operator_uses_precompiled_pattern() {
        let c = cond(RuleConditionField::DeadLetterErrorDescription, RuleOperator::Regex, r"(?i)timed?\s*out");
        let regex = Regex::new(&c.value).unwrap();
        assert!(evaluate_condition(&entry(), &c, Some(&regex)).unwrap());
    }

    #[test]
    fn all_conditions_must_match() {
        let conditions = vec![
            cond(RuleConditionField::FailureCategory, RuleOperator::Equals, "MaxDelivery"),
            cond(RuleConditionField::EntityName, RuleOperator::Equals, "no-such-entity"),
        ];
        let compiled = vec![None, None];
        assert!(!evaluate_all(&entry(), &conditions, &compiled).unwrap());
    }
}
