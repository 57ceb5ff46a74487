//! Alertmanager receiver-style envelope.
//!
//! Mirrors the webhook payload an Alertmanager would send to a receiver:
//! version "4", a single-alert `alerts[]` array, common labels/annotations,
//! and a `groupKey` derived from the fingerprint. Classification data is
//! merged into the annotations under `llm_*` keys.

use std::collections::BTreeMap;

use serde_json::json;

use ah_common::EnrichedAlert;

use crate::{FormatError, Payload};

use super::{joined_recommendations, truncate_chars, MAX_REASONING_CHARS};

const RECEIVER: &str = "alert-history";
const VERSION: &str = "4";

pub fn format(enriched: &EnrichedAlert) -> Result<Payload, FormatError> {
    let alert = &enriched.alert;
    let annotations = merged_annotations(enriched);

    let mut entry = json!({
        "status": alert.status.as_str(),
        "labels": alert.labels,
        "annotations": annotations,
        "startsAt": alert.starts_at.to_rfc3339(),
        "fingerprint": alert.fingerprint,
    });
    let entry_map = entry.as_object_mut().expect("object literal");
    if let Some(ends_at) = alert.ends_at {
        entry_map.insert("endsAt".to_string(), json!(ends_at.to_rfc3339()));
    }
    if let Some(generator_url) = &alert.generator_url {
        entry_map.insert("generatorURL".to_string(), json!(generator_url));
    }

    let envelope = json!({
        "receiver": RECEIVER,
        "status": alert.status.as_str(),
        "alerts": [entry],
        "commonLabels": alert.labels,
        "commonAnnotations": annotations,
        "version": VERSION,
        "groupKey": format!("group:{}", alert.fingerprint),
    });

    match envelope {
        serde_json::Value::Object(map) => Ok(map),
        _ => unreachable!("envelope is an object literal"),
    }
}

fn merged_annotations(enriched: &EnrichedAlert) -> BTreeMap<String, String> {
    let mut annotations = enriched.alert.annotations.clone();
    if let Some(classification) = &enriched.classification {
        annotations.insert(
            "llm_severity".to_string(),
            classification.severity.as_str().to_string(),
        );
        annotations.insert(
            "llm_confidence".to_string(),
            format!("{:.2}", classification.confidence),
        );
        annotations.insert(
            "llm_reasoning".to_string(),
            truncate_chars(&classification.reasoning, MAX_REASONING_CHARS),
        );
        if !classification.recommendations.is_empty() {
            annotations.insert(
                "llm_recommendations".to_string(),
                joined_recommendations(classification),
            );
        }
    }
    annotations
}
