//! Generic webhook payload: a flat JSON rendering of the enriched alert.
//!
//! This is the default format for plain HTTPS targets and the base the
//! alertmanager target type builds on.

use serde_json::json;

use ah_common::EnrichedAlert;

use crate::{FormatError, Payload};

pub fn format(enriched: &EnrichedAlert) -> Result<Payload, FormatError> {
    let alert = &enriched.alert;

    let mut payload = json!({
        "alert_name": alert.name,
        "fingerprint": alert.fingerprint,
        "status": alert.status.as_str(),
        "labels": alert.labels,
        "annotations": alert.annotations,
        "starts_at": alert.starts_at.to_rfc3339(),
    });
    let map = payload.as_object_mut().expect("object literal");
    if let Some(ends_at) = alert.ends_at {
        map.insert("ends_at".to_string(), json!(ends_at.to_rfc3339()));
    }
    if let Some(generator_url) = &alert.generator_url {
        map.insert("generator_url".to_string(), json!(generator_url));
    }
    if let Some(classification) = &enriched.classification {
        map.insert(
            "classification".to_string(),
            serde_json::to_value(classification)?,
        );
    }

    match payload {
        serde_json::Value::Object(map) => Ok(map),
        _ => unreachable!("payload is an object literal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::testutil::{classified_alert, firing_alert, resolved_alert};

    #[test]
    fn flat_shape() {
        let payload = format(&firing_alert()).unwrap();
        assert_eq!(payload["alert_name"], "HighCpuUsage");
        assert_eq!(payload["fingerprint"], "fp1");
        assert_eq!(payload["status"], "firing");
        assert_eq!(payload["labels"]["namespace"], "prod");
        assert!(payload.get("ends_at").is_none());
        assert!(payload.get("classification").is_none());
    }

    #[test]
    fn classification_round_trips_through_json() {
        let payload = format(&classified_alert()).unwrap();
        let classification = &payload["classification"];
        assert_eq!(classification["severity"], "critical");
        assert_eq!(
            classification["recommendations"].as_array().unwrap().len(),
            4
        );
    }

    #[test]
    fn encode_decode_preserves_required_fields() {
        let payload = format(&resolved_alert()).unwrap();
        let encoded = serde_json::to_string(&payload).unwrap();
        let decoded: serde_json::Value = serde_json::from_str(&encoded).unwrap();

        for field in ["alert_name", "fingerprint", "status", "starts_at", "ends_at"] {
            assert!(
                decoded.get(field).is_some(),
                "{field} must survive the round trip"
            );
        }
        assert_eq!(decoded["status"], "resolved");
    }
}
