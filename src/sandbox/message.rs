//! Messages sent from an isolated context to the host.
//!
//! The wire shape is fixed:
//!
//! ```json
//! { "type": "capability-intercept", "capabilityId": "geolocation", "timestamp": 1700000000000 }
//! { "type": "run-complete", "outputLines": [{ "kind": "out", "text": "hi" }], "elapsedMs": 12 }
//! ```
//!
//! Anything else (missing `type`, unknown `type`, malformed JSON) is
//! ignored by the host.

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContextMessage {
    #[serde(rename = "capability-intercept", rename_all = "camelCase")]
    CapabilityIntercept { capability_id: String, timestamp: f64 },

    #[serde(rename = "run-complete", rename_all = "camelCase")]
    RunComplete {
        output_lines: Vec<RelayedLine>,
        elapsed_ms: f64,
    },
}

/// Output line produced inside a context. `sys` lines only come from the
/// host, so they are not part of the relayed set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedLine {
    pub kind: RelayedKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayedKind {
    Out,
    Err,
    Warn,
}

impl RelayedLine {
    pub fn out(text: impl Into<String>) -> Self {
        Self {
            kind: RelayedKind::Out,
            text: text.into(),
        }
    }

    pub fn err(text: impl Into<String>) -> Self {
        Self {
            kind: RelayedKind::Err,
            text: text.into(),
        }
    }
}

impl ContextMessage {
    /// Parses a raw message, returning `None` for anything outside the
    /// schema.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!("Ignoring context message ({e}): {}", truncate(raw, 120));
                None
            }
        }
    }

    pub fn to_json(&self) -> String {
        // Only strings and finite numbers are serialized, which cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_intercept() {
        let msg = ContextMessage::parse(
            r#"{"type":"capability-intercept","capabilityId":"geolocation","timestamp":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ContextMessage::CapabilityIntercept {
                capability_id: "geolocation".to_string(),
                timestamp: 1_700_000_000_000.0,
            }
        );
    }

    #[test]
    fn test_parse_run_complete() {
        let msg = ContextMessage::parse(
            r#"{"type":"run-complete","outputLines":[{"kind":"out","text":"hi"},{"kind":"warn","text":"careful"}],"elapsedMs":12.5}"#,
        )
        .unwrap();
        match msg {
            ContextMessage::RunComplete {
                output_lines,
                elapsed_ms,
            } => {
                assert_eq!(output_lines.len(), 2);
                assert_eq!(output_lines[1].kind, RelayedKind::Warn);
                assert_eq!(elapsed_ms, 12.5);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_serialized_shape_is_exact() {
        let json = ContextMessage::CapabilityIntercept {
            capability_id: "usb".to_string(),
            timestamp: 1.0,
        }
        .to_json();
        assert_eq!(
            json,
            r#"{"type":"capability-intercept","capabilityId":"usb","timestamp":1.0}"#
        );

        let json = ContextMessage::RunComplete {
            output_lines: vec![RelayedLine::err("boom")],
            elapsed_ms: 3.0,
        }
        .to_json();
        assert_eq!(
            json,
            r#"{"type":"run-complete","outputLines":[{"kind":"err","text":"boom"}],"elapsedMs":3.0}"#
        );
    }

    #[test]
    fn test_unknown_or_missing_type_is_ignored() {
        assert!(ContextMessage::parse(r#"{"type":"telemetry","x":1}"#).is_none());
        assert!(ContextMessage::parse(r#"{"capabilityId":"usb","timestamp":1}"#).is_none());
        assert!(ContextMessage::parse("not json at all").is_none());
        assert!(ContextMessage::parse(r#"{"type":"run-complete"}"#).is_none());
    }

    #[test]
    fn test_sys_kind_is_not_relayable() {
        assert!(ContextMessage::parse(
            r#"{"type":"run-complete","outputLines":[{"kind":"sys","text":"x"}],"elapsedMs":1}"#
        )
        .is_none());
    }
}
