//! PagerDuty Events API v2 payload.

use serde_json::json;

use ah_common::{AlertStatus, EnrichedAlert, Severity};

use crate::{FormatError, Payload};

const SOURCE: &str = "alert-history-service";

pub fn format(enriched: &EnrichedAlert) -> Result<Payload, FormatError> {
    let alert = &enriched.alert;

    let event_action = match alert.status {
        AlertStatus::Resolved => "resolve",
        // Anything not resolved (firing or unknown) triggers.
        _ => "trigger",
    };

    let mut custom_details = json!({
        "labels": alert.labels,
        "annotations": alert.annotations,
    });
    if let Some(classification) = &enriched.classification {
        let details = custom_details.as_object_mut().expect("object literal");
        details.insert(
            "llm_severity".to_string(),
            json!(classification.severity.as_str()),
        );
        details.insert(
            "llm_confidence".to_string(),
            json!(classification.confidence),
        );
        details.insert("llm_reasoning".to_string(), json!(classification.reasoning));
    }

    let payload = json!({
        "event_action": event_action,
        "dedup_key": alert.fingerprint,
        "payload": {
            "summary": alert.name,
            "severity": pagerduty_severity(enriched),
            "source": SOURCE,
            "timestamp": alert.starts_at.to_rfc3339(),
            "custom_details": custom_details,
        },
    });

    match payload {
        serde_json::Value::Object(map) => Ok(map),
        _ => unreachable!("payload is an object literal"),
    }
}

/// PagerDuty accepts critical/error/warning/info; map from the classifier
/// first, the `severity` label second, defaulting to warning.
fn pagerduty_severity(enriched: &EnrichedAlert) -> &'static str {
    if let Some(severity) = enriched.classified_severity() {
        return match severity {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info | Severity::Noise => "info",
        };
    }
    match enriched.severity_label() {
        Some("critical") => "critical",
        Some("warning") => "warning",
        Some("info") => "info",
        _ => "warning",
    }
}
