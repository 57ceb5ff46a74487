//! Rootly incident payload.

use serde_json::json;

use ah_common::{EnrichedAlert, Severity};

use crate::{FormatError, Payload};

pub fn format(enriched: &EnrichedAlert) -> Result<Payload, FormatError> {
    let alert = &enriched.alert;

    let tags: Vec<String> = alert
        .labels
        .iter()
        .map(|(key, value)| format!("{}:{}", key, value))
        .collect();

    let description = alert
        .annotations
        .get("description")
        .or_else(|| alert.annotations.get("summary"))
        .cloned()
        .unwrap_or_else(|| format!("Alert {} is {}", alert.name, alert.status));

    let mut payload = json!({
        "title": alert.name,
        "description": description,
        "severity": rootly_severity(enriched),
        "status": "started",
        "tags": tags,
        "started_at": alert.starts_at.to_rfc3339(),
    });
    if let Some(environment) = alert.labels.get("namespace") {
        payload
            .as_object_mut()
            .expect("object literal")
            .insert("environment".to_string(), json!(environment));
    }

    match payload {
        serde_json::Value::Object(map) => Ok(map),
        _ => unreachable!("payload is an object literal"),
    }
}

/// Rootly severities are critical/major/minor/low; the classifier wins over
/// the `severity` label.
fn rootly_severity(enriched: &EnrichedAlert) -> &'static str {
    if let Some(severity) = enriched.classified_severity() {
        return match severity {
            Severity::Critical => "critical",
            Severity::Warning => "major",
            Severity::Info => "minor",
            Severity::Noise => "low",
        };
    }
    match enriched.severity_label() {
        Some("critical") => "critical",
        Some("warning") => "major",
        Some("info") => "minor",
        _ => "low",
    }
}
