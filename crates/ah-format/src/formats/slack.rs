//! Slack Blocks API message.
//!
//! Header, a fields section with the key facts, optional reasoning and
//! recommendation sections when a classification is present, a divider, and
//! a fingerprint context line. The attachment color encodes severity.

use serde_json::{json, Value};

use ah_common::EnrichedAlert;

use crate::{FormatError, Payload};

use super::{severity_color, MAX_RECOMMENDATIONS};

pub fn format(enriched: &EnrichedAlert) -> Result<Payload, FormatError> {
    let alert = &enriched.alert;

    let mut blocks: Vec<Value> = Vec::new();

    blocks.push(json!({
        "type": "header",
        "text": { "type": "plain_text", "text": alert.name, "emoji": true },
    }));

    let mut fields = vec![
        json!({ "type": "mrkdwn", "text": format!("*Status:*\n{}", alert.status) }),
        json!({ "type": "mrkdwn", "text": format!("*Alert:*\n{}", alert.name) }),
    ];
    if let Some(severity) = super::effective_severity(enriched) {
        fields.push(json!({ "type": "mrkdwn", "text": format!("*Severity:*\n{}", severity) }));
    }
    if let Some(namespace) = alert.labels.get("namespace") {
        fields.push(json!({ "type": "mrkdwn", "text": format!("*Namespace:*\n{}", namespace) }));
    }
    blocks.push(json!({ "type": "section", "fields": fields }));

    if let Some(classification) = &enriched.classification {
        if !classification.reasoning.is_empty() {
            blocks.push(json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("*Reasoning:*\n{}", classification.reasoning),
                },
            }));
        }
        if !classification.recommendations.is_empty() {
            let listed = classification
                .recommendations
                .iter()
                .take(MAX_RECOMMENDATIONS)
                .map(|r| format!("• {}", r))
                .collect::<Vec<_>>()
                .join("\n");
            blocks.push(json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("*Recommendations:*\n{}", listed),
                },
            }));
        }
    }

    blocks.push(json!({ "type": "divider" }));
    blocks.push(json!({
        "type": "context",
        "elements": [
            { "type": "mrkdwn", "text": format!("Fingerprint: {}", alert.fingerprint) },
        ],
    }));

    let message = json!({
        "blocks": blocks,
        "attachments": [
            { "color": severity_color(enriched.classified_severity()) },
        ],
    });

    match message {
        serde_json::Value::Object(map) => Ok(map),
        _ => unreachable!("message is an object literal"),
    }
}
