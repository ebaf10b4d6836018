/// Correlation labels attached to a log line or metric emission.
#[derive(Debug, Clone)]
pub struct TelemetryLabels {
    pub namespace: String,
    pub entity: Option<String>,
    pub rule: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl TelemetryLabels {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entity: None,
            rule: None,
            extra: Vec::new(),
        }
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::with_capacity(3 + self.extra.len());
        tags.push(("namespace".into(), self.namespace.clone()));
        if let Some(entity) = &self.entity {
            tags.push(("entity".into(), entity.clone()));
        }
        if let Some(rule) = &self.rule {
            tags.push(("rule".into(), rule.clone()));
        }
        tags.extend(self.extra.iter().cloned());
        tags
    }
}

/// Generates a correlation id, or reuses one supplied via the
/// `X-Correlation-Id` header if the caller already has one.
pub fn correlation_id(supplied: Option<&str>) -> String {
    supplied
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_supplied_correlation_id() {
        assert_eq!(correlation_id(Some("abc-123")), "abc-123");
    }

    #[test]
    fn generates_when_absent() {
        let id = correlation_id(None);
        assert_eq!(id.len(), 36);
    }

    #[test]
    fn generates_when_blank() {
        let id = correlation_id(Some("   "));
        assert_eq!(id.len(), 36);
    }
}
