//! Structured-output contract between the agent and the reasoning collaborator.
//!
//! The model is instructed to reply with exactly one JSON object. Real models
//! wrap it in prose or code fences often enough that we repair before parsing;
//! anything still unparsable is rejected, never trusted or guessed around.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::InterpretationError;

/// What the reasoning collaborator decided about the latest utterance.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum IntentOutcome {
    /// The user wants a tool run, with whatever parameters were extractable.
    Invoke {
        /// Selected tool name.
        tool: String,
        /// Extracted parameter values (possibly incomplete).
        #[serde(default)]
        params: BTreeMap<String, Value>,
    },
    /// The request is ambiguous; the model proposes a clarifying question.
    Clarify {
        /// Question to relay to the user.
        question: String,
    },
    /// No tool applies; answer conversationally.
    Answer {
        /// The answer text.
        text: String,
    },
}

/// Parse a raw completion into an [`IntentOutcome`], repairing common
/// formatting damage first.
///
/// # Errors
/// Returns `InterpretationError::Malformed` when no valid JSON object with a
/// recognized `action` tag can be recovered.
pub fn parse_intent(raw: &str) -> Result<IntentOutcome, InterpretationError> {
    let candidate = repair(raw);
    serde_json::from_str(&candidate)
        .map_err(|e| InterpretationError::Malformed(format!("{e}: {}", truncate(raw, 200))))
}

/// Strip code fences and surrounding prose, keeping the outermost JSON object.
fn repair(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }
    let text = text.trim();

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => text[start..=end].to_string(),
        _ => text.to_string(),
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
    use serde_json::json;

    #[test]
    fn test_parse_invoke() {
        let raw = r#"{"action": "invoke", "tool": "kmeans_cluster", "params": {"n_clusters": 5}}"#;
        let outcome = parse_intent(raw).unwrap();
        match outcome {
            IntentOutcome::Invoke { tool, params } => {
                assert_eq!(tool, "kmeans_cluster");
                assert_eq!(params.get("n_clusters"), Some(&json!(5)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_parse_invoke_without_params() {
        let raw = r#"{"action": "invoke", "tool": "render_heatmap"}"#;
        let outcome = parse_intent(raw).unwrap();
        assert!(matches!(
            outcome,
            IntentOutcome::Invoke { ref tool, ref params } if tool == "render_heatmap" && params.is_empty()
        ));
    }

    #[test]
    fn test_parse_fenced_output() {
        let raw = "Sure! Here is the result:\n```json\n{\"action\": \"clarify\", \"question\": \"How many clusters?\"}\n```";
        let outcome = parse_intent(raw).unwrap();
        assert!(matches!(
            outcome,
            IntentOutcome::Clarify { ref question } if question == "How many clusters?"
        ));
    }

    #[test]
    fn test_parse_with_surrounding_prose() {
        let raw = "I'll answer directly. {\"action\": \"answer\", \"text\": \"Hello!\"} Hope that helps.";
        let outcome = parse_intent(raw).unwrap();
        assert!(matches!(outcome, IntentOutcome::Answer { ref text } if text == "Hello!"));
    }

    #[test]
    fn test_reject_garbage() {
        assert!(matches!(
            parse_intent("I cannot answer in JSON, sorry."),
            Err(InterpretationError::Malformed(_))
        ));
        assert!(matches!(
            parse_intent(r#"{"action": "self_destruct"}"#),
            Err(InterpretationError::Malformed(_))
        ));
        assert!(matches!(
            parse_intent(r#"{"tool": "kmeans_cluster"}"#),
            Err(InterpretationError::Malformed(_))
        ));
    }
}
