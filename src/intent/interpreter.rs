//! Turns free-text utterances into structured tool intents.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::conversation::{Conversation, Role};
use crate::error::InterpretationError;
use crate::tools::{ParamKind, ToolRegistry};

use super::client::{ChatMessage, ReasoningClient};
use super::contract::{parse_intent, IntentOutcome};

const SYSTEM_PROMPT: &str = "You are a geospatial analysis assistant that maps user \
requests onto a fixed set of analysis tools. You never run tools yourself; you only \
decide which tool the user wants and which parameter values they have supplied. \
Reply with exactly one JSON object and nothing else, in one of three shapes:\n\
{\"action\": \"invoke\", \"tool\": \"<tool name>\", \"params\": {<extracted values>}}\n\
{\"action\": \"clarify\", \"question\": \"<question for the user>\"}\n\
{\"action\": \"answer\", \"text\": \"<direct answer when no tool applies>\"}\n\
Only extract parameter values the user actually stated; never invent values. \
If a short reply like a bare number answers a question about the pending tool, \
treat it as the value for the parameter that was asked about.";

/// Interprets the latest utterance against the tool catalog.
///
/// The language-understanding step is delegated to a [`ReasoningClient`]; the
/// interpreter owns the prompt, the bounded history window, and the
/// validation of the structured reply.
pub struct IntentInterpreter {
    client: Arc<dyn ReasoningClient>,
    history_window: usize,
}

impl IntentInterpreter {
    /// Build an interpreter over a reasoning client.
    #[must_use]
    pub fn new(client: Arc<dyn ReasoningClient>, history_window: usize) -> Self {
        Self {
            client,
            history_window,
        }
    }

    /// Interpret the latest user text in the context of a conversation.
    ///
    /// # Errors
    /// Returns an [`InterpretationError`] when the collaborator is
    /// unreachable, times out, or replies with unparsable structure. The
    /// orchestrator degrades to asking the user to restate their request.
    pub async fn interpret(
        &self,
        registry: &ToolRegistry,
        conversation: &Conversation,
        user_text: &str,
    ) -> Result<IntentOutcome, InterpretationError> {
        let messages = self.build_messages(registry, conversation, user_text);
        let raw = self.client.complete(&messages).await?;
        parse_intent(&raw)
    }

    fn build_messages(
        &self,
        registry: &ToolRegistry,
        conversation: &Conversation,
        user_text: &str,
    ) -> Vec<ChatMessage> {
        let mut system = String::from(SYSTEM_PROMPT);
        system.push_str("\n\nAvailable tools:\n");
        system.push_str(&render_catalog(registry));

        if let Some(pending) = &conversation.pending {
            let _ = write!(
                system,
                "\nA '{}' invocation is pending with parameters gathered so far: {}. \
                 Missing: {}. Prefer filling in this invocation over starting a new one.",
                pending.tool,
                serde_json::to_string(&pending.params).unwrap_or_else(|_| "{}".to_string()),
                if pending.missing.is_empty() {
                    "none".to_string()
                } else {
                    pending.missing.join(", ")
                }
            );
        }
        if conversation.source_file.is_some() {
            system.push_str("\nThe user has uploaded a data file for this conversation.");
        }

        let mut messages = vec![ChatMessage::system(system)];
        for turn in conversation.recent_turns(self.history_window) {
            messages.push(match turn.role {
                Role::User => ChatMessage::user(&turn.text),
                Role::Assistant => ChatMessage::assistant(&turn.text),
            });
        }
        messages.push(ChatMessage::user(user_text));
        messages
    }
}

/// Render the tool catalog for the system prompt.
fn render_catalog(registry: &ToolRegistry) -> String {
    let mut out = String::new();
    for tool in registry.list() {
        let _ = writeln!(out, "- {}: {}", tool.name, tool.description);
        for param in &tool.params {
            let kind = match &param.kind {
                ParamKind::Text(_) => "text".to_string(),
                ParamKind::Number { .. } => "number".to_string(),
                ParamKind::Enum(variants) => format!("one of {}", variants.join("|")),
                ParamKind::FileRef => "file".to_string(),
            };
            let _ = writeln!(
                out,
                "    {} ({kind}, {}): {}",
                param.name,
                if param.required { "required" } else { "optional" },
                param.description
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{PendingInvocation, Turn};
    use async_trait::async_trait;

    struct CannedClient {
        reply: String,
    }

    #[async_trait]
    impl ReasoningClient for CannedClient {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, InterpretationError> {
            Ok(self.reply.clone())
        }
    }

    fn interpreter(reply: &str) -> IntentInterpreter {
        IntentInterpreter::new(
            Arc::new(CannedClient {
                reply: reply.to_string(),
            }),
            8,
        )
    }

    #[tokio::test]
    async fn test_interpret_invoke() {
        let registry = ToolRegistry::builtin();
        let conv = Conversation::new();
        let outcome = interpreter(r#"{"action": "invoke", "tool": "kmeans_cluster", "params": {"n_clusters": "5"}}"#)
            .interpret(&registry, &conv, "split into 5 groups")
            .await
            .unwrap();
        assert!(matches!(outcome, IntentOutcome::Invoke { ref tool, .. } if tool == "kmeans_cluster"));
    }

    #[tokio::test]
    async fn test_interpret_malformed_fails() {
        let registry = ToolRegistry::builtin();
        let conv = Conversation::new();
        let err = interpreter("beep boop")
            .interpret(&registry, &conv, "cluster my points")
            .await
            .unwrap_err();
        assert!(matches!(err, InterpretationError::Malformed(_)));
    }

    #[test]
    fn test_prompt_mentions_pending_invocation() {
        let registry = ToolRegistry::builtin();
        let mut conv = Conversation::new();
        let mut pending = PendingInvocation::new("kmeans_cluster");
        pending.missing = vec!["n_clusters".to_string()];
        conv.pending = Some(pending);
        conv.push_turn(Turn::user("cluster my points"));

        let messages = interpreter("{}").build_messages(&registry, &conv, "5");
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("kmeans_cluster"));
        assert!(messages[0].content.contains("Missing: n_clusters"));
        assert_eq!(messages.last().map(|m| m.content.as_str()), Some("5"));
    }

    #[test]
    fn test_history_window_bounded() {
        let registry = ToolRegistry::builtin();
        let mut conv = Conversation::new();
        for i in 0..20 {
            conv.push_turn(Turn::user(format!("message {i}")));
        }

        let messages = interpreter("{}").build_messages(&registry, &conv, "latest");
        // system + 8 history turns + latest utterance
        assert_eq!(messages.len(), 10);
        assert!(messages[1].content.contains("message 12"));
    }
}
