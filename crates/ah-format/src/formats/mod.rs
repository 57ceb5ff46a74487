//! Built-in payload formats.
//!
//! One module per provider schema; `builtins()` hands the set to the
//! registry. The shapes here are load-bearing: downstream systems parse
//! these payloads, so field names, timestamp encodings, and the llm_*
//! annotation merge are part of the external contract.

use ah_common::{Classification, EnrichedAlert, Severity};

use crate::SharedFormatter;

pub mod alertmanager;
pub mod pagerduty;
pub mod rootly;
pub mod slack;
pub mod webhook;

/// Reasoning text is capped when merged into annotations.
pub(crate) const MAX_REASONING_CHARS: usize = 500;

/// Only the strongest recommendations are surfaced.
pub(crate) const MAX_RECOMMENDATIONS: usize = 3;

/// The five built-in formats, keyed by their registry names.
pub fn builtins() -> Vec<(&'static str, SharedFormatter)> {
    vec![
        ("alertmanager", crate::formatter_fn(alertmanager::format)),
        ("pagerduty", crate::formatter_fn(pagerduty::format)),
        ("rootly", crate::formatter_fn(rootly::format)),
        ("slack", crate::formatter_fn(slack::format)),
        ("webhook", crate::formatter_fn(webhook::format)),
    ]
}

/// Truncate to a character limit without splitting a code point.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Top recommendations joined by `"; "`.
pub(crate) fn joined_recommendations(classification: &Classification) -> String {
    classification
        .recommendations
        .iter()
        .take(MAX_RECOMMENDATIONS)
        .cloned()
        .collect::<Vec<_>>()
        .join("; ")
}

/// Effective severity: the classifier's verdict wins over the `severity`
/// label.
pub(crate) fn effective_severity(alert: &EnrichedAlert) -> Option<String> {
    if let Some(severity) = alert.classified_severity() {
        return Some(severity.as_str().to_string());
    }
    alert.severity_label().map(str::to_string)
}

/// Severity color used by chat attachments.
pub(crate) fn severity_color(severity: Option<Severity>) -> &'static str {
    match severity {
        Some(Severity::Critical) => "#FF0000",
        Some(Severity::Warning) => "#FFA500",
        Some(Severity::Info) => "#36A64F",
        Some(Severity::Noise) => "#808080",
        None => "#808080",
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 500), "short");
    }

    #[test]
    fn joined_recommendations_takes_top_three() {
        let alert = testutil::classified_alert();
        let joined = joined_recommendations(alert.classification.as_ref().unwrap());
        assert_eq!(joined, "scale up; check deploy; rollback");
    }
}
