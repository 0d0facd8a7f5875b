//! Error types for the geo-analysis agent.

use thiserror::Error;

/// Errors produced while talking to the external reasoning collaborator.
#[derive(Debug, Error)]
pub enum InterpretationError {
    /// HTTP request to the reasoning endpoint failed.
    #[error("reasoning request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The reasoning endpoint did not answer within the configured timeout.
    #[error("reasoning request timed out")]
    Timeout,

    /// The reasoning endpoint answered, but the structured output could not
    /// be parsed even after repair.
    #[error("unparsable intent output: {0}")]
    Malformed(String),

    /// The reasoning endpoint rejected the configured credential.
    #[error("reasoning credential rejected (HTTP {0})")]
    Credential(u16),

    /// The reasoning endpoint returned a non-success status.
    #[error("reasoning endpoint returned HTTP {0}")]
    Status(u16),

    /// The response body was missing the expected completion content.
    #[error("reasoning response missing completion content")]
    EmptyCompletion,
}

impl InterpretationError {
    /// Check if this error is worth retrying on a later turn.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Http(_) | Self::Status(_))
    }
}

/// A parameter value that failed its spec.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// Name of the offending parameter.
    pub param: String,
    /// Human-readable message, suitable for quoting back to the user.
    pub message: String,
}

impl ValidationError {
    /// Build a validation error for a parameter.
    pub fn new(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            message: message.into(),
        }
    }
}

/// A tool stage that failed during pipeline execution.
#[derive(Debug, Error)]
#[error("tool '{tool}' failed: {message}")]
pub struct ExecutionError {
    /// Name of the failing tool.
    pub tool: String,
    /// What went wrong, phrased for the end user.
    pub message: String,
}

impl ExecutionError {
    /// Build an execution error for a tool stage.
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Top-level error taxonomy for the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Unknown conversation id; surfaced to the HTTP boundary as 404.
    #[error("Conversation ID not found")]
    ConversationNotFound(String),

    /// The reasoning collaborator was unavailable or returned garbage.
    /// Recoverable: the orchestrator asks the user to rephrase.
    #[error(transparent)]
    Interpretation(#[from] InterpretationError),

    /// A parameter failed its spec. Recoverable: the resolver re-asks.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A tool stage failed. Reported as a partial result, never dropped.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Missing credential or broken registry. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Filesystem error while handling uploads or artifacts.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(InterpretationError::Timeout.is_retryable());
        assert!(InterpretationError::Status(503).is_retryable());
        assert!(!InterpretationError::Malformed("{".to_string()).is_retryable());
        assert!(!InterpretationError::Credential(401).is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = AgentError::ConversationNotFound("abc".to_string());
        assert_eq!(err.to_string(), "Conversation ID not found");
    }

    #[test]
    fn test_validation_message_passthrough() {
        let err = ValidationError::new("n_clusters", "n_clusters must be a positive integer");
        assert_eq!(err.to_string(), "n_clusters must be a positive integer");
    }
}
