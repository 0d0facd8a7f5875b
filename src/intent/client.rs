//! HTTP client for the external reasoning collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::error::InterpretationError;

/// One message in a chat completion request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user", or "assistant".
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Build a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Build an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Boundary to the external reasoning collaborator.
///
/// The interpreter owns the prompt and the structured-output contract; this
/// trait owns only the round-trip, so tests can substitute canned replies.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Send a chat completion request and return the raw completion text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, InterpretationError>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Client for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    /// Build a client from the agent configuration.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(config: &AgentConfig) -> Result<Self, InterpretationError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/chat/completions",
                config.api_base_url.trim_end_matches('/')
            ),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ReasoningClient for OpenAiCompatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, InterpretationError> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: 0.0,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InterpretationError::Timeout
                } else {
                    InterpretationError::Http(e)
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(InterpretationError::Credential(status.as_u16()));
        }
        if !status.is_success() {
            return Err(InterpretationError::Status(status.as_u16()));
        }

        let body: CompletionResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(InterpretationError::EmptyCompletion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_response_shape() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "hi"}}]}"#;
        let parsed: CompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hi"));
    }

    #[test]
    fn test_endpoint_normalization() {
        let config = AgentConfig::default().with_api_key("k");
        let client = OpenAiCompatClient::new(&config).unwrap();
        assert!(client.endpoint.ends_with("/chat/completions"));
        assert!(!client.endpoint.contains("//chat"));
    }
}
