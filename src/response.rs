//! Assembles the natural-language answer and the response payload returned
//! to the HTTP caller.

use serde::Serialize;

use crate::conversation::Artifact;
use crate::pipeline::{InvocationStatus, PipelineReport};

/// Result of processing one turn, before URL composition.
#[derive(Debug)]
pub struct TurnOutcome {
    /// Natural-language answer for the user.
    pub answer: String,
    /// True iff the agent is waiting on the user: a pending invocation with
    /// missing parameters remains, or the turn ended with a question.
    pub requires_follow_up: bool,
    /// Artifacts produced while handling this turn.
    pub artifacts: Vec<Artifact>,
}

/// Response body for `/chat/start` and `/chat/continue/{id}`.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    /// Conversation this turn belongs to.
    pub conversation_id: String,
    /// The agent's answer.
    pub answer: String,
    /// Whether the agent expects another message to make progress.
    pub requires_follow_up: bool,
    /// URLs of files generated this turn, resolvable under `/outputs/`.
    pub generated_files: Vec<String>,
}

/// Builds user-facing answers and the wire response.
pub struct ResponseComposer {
    public_base_url: String,
}

impl ResponseComposer {
    /// Build a composer that links artifacts under a public base URL.
    #[must_use]
    pub fn new(public_base_url: impl Into<String>) -> Self {
        let mut base = public_base_url.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self {
            public_base_url: base,
        }
    }

    /// Public URL for an artifact.
    #[must_use]
    pub fn artifact_url(&self, artifact: &Artifact) -> String {
        format!("{}/outputs/{}", self.public_base_url, artifact.path)
    }

    /// Turn a pipeline report into an answer. Failures are stated plainly;
    /// partial results are pointed out rather than discarded.
    #[must_use]
    pub fn execution_answer(&self, report: &PipelineReport) -> String {
        let done = report.summaries.join(", then ");
        match report.status {
            InvocationStatus::Succeeded => {
                format!("Done: I {done}. The generated files are linked below.")
            }
            InvocationStatus::PartiallyFailed => {
                let failure = report
                    .failure
                    .as_ref()
                    .map_or_else(|| "a later step failed".to_string(), ToString::to_string);
                format!(
                    "I got partway there: I {done}, but then {failure}. \
                     The files produced before the failure are linked below."
                )
            }
            _ => {
                let failure = report
                    .failure
                    .as_ref()
                    .map_or_else(|| "the analysis failed".to_string(), ToString::to_string);
                format!("I couldn't complete that: {failure}. Nothing was generated.")
            }
        }
    }

    /// Assemble the wire response for a processed turn.
    #[must_use]
    pub fn compose(&self, conversation_id: &str, outcome: &TurnOutcome) -> ChatResponse {
        ChatResponse {
            conversation_id: conversation_id.to_string(),
            answer: outcome.answer.clone(),
            requires_follow_up: outcome.requires_follow_up,
            generated_files: outcome
                .artifacts
                .iter()
                .map(|a| self.artifact_url(a))
                .collect(),
        }
    }
}
