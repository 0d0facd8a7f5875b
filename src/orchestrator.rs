//! Per-turn control flow: interpret, fill slots, execute, compose.

use std::sync::Arc;

use crate::conversation::{Conversation, PendingInvocation, Turn};
use crate::intent::{IntentInterpreter, IntentOutcome};
use crate::pipeline::ExecutionPipeline;
use crate::resolver::ParameterResolver;
use crate::response::{ResponseComposer, TurnOutcome};
use crate::tools::ToolRegistry;

/// Drives one conversation turn from utterance to answer.
///
/// Recoverable problems (unclear intent, invalid or missing parameters,
/// collaborator hiccups) become follow-up questions; only unknown
/// conversation ids and fatal configuration cross the HTTP boundary as
/// errors.
pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    interpreter: IntentInterpreter,
    pipeline: ExecutionPipeline,
    composer: ResponseComposer,
}

impl Orchestrator {
    /// Build an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        interpreter: IntentInterpreter,
        pipeline: ExecutionPipeline,
        composer: ResponseComposer,
    ) -> Self {
        Self {
            registry,
            interpreter,
            pipeline,
            composer,
        }
    }

    /// The response composer, for building the wire payload.
    #[must_use]
    pub const fn composer(&self) -> &ResponseComposer {
        &self.composer
    }

    /// Process one user message against a (locked) conversation.
    ///
    /// The caller holds the conversation's lock for the whole call, which is
    /// what serializes concurrent requests on the same id.
    pub async fn handle_turn(&self, conversation: &mut Conversation, query: &str) -> TurnOutcome {
        let intent = self
            .interpreter
            .interpret(&self.registry, conversation, query)
            .await;
        conversation.push_turn(Turn::user(query));

        let outcome = match intent {
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation.id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "intent interpretation failed"
                );
                TurnOutcome {
                    answer: "Sorry, I had trouble understanding that. \
                             Could you rephrase your request?"
                        .to_string(),
                    requires_follow_up: true,
                    artifacts: Vec::new(),
                }
            }
            Ok(IntentOutcome::Answer { text }) => TurnOutcome {
                requires_follow_up: conversation
                    .pending
                    .as_ref()
                    .is_some_and(|p| !p.missing.is_empty()),
                answer: text,
                artifacts: Vec::new(),
            },
            Ok(IntentOutcome::Clarify { question }) => TurnOutcome {
                answer: question,
                requires_follow_up: true,
                artifacts: Vec::new(),
            },
            Ok(IntentOutcome::Invoke { tool, params }) => {
                self.advance_invocation(conversation, tool, params).await
            }
        };

        conversation.push_turn(Turn::assistant(&outcome.answer, outcome.artifacts.clone()));
        outcome
    }

    /// Merge extracted values into the pending invocation (starting or
    /// replacing it as needed), then either ask for what's missing or run
    /// the pipeline.
    async fn advance_invocation(
        &self,
        conversation: &mut Conversation,
        tool: String,
        params: std::collections::BTreeMap<String, serde_json::Value>,
    ) -> TurnOutcome {
        let Some(definition) = self.registry.lookup(&tool) else {
            tracing::warn!(conversation_id = %conversation.id, tool = %tool, "unknown tool in intent");
            let catalog = self
                .registry
                .list()
                .iter()
                .map(|t| t.name)
                .collect::<Vec<_>>()
                .join(", ");
            return TurnOutcome {
                answer: format!(
                    "I don't have a '{tool}' operation. I can help with: {catalog}. \
                     What would you like to do?"
                ),
                requires_follow_up: true,
                artifacts: Vec::new(),
            };
        };

        // Switching tools abandons the old pending invocation; answering a
        // question about the same tool accumulates into it.
        let mut pending = match conversation.pending.take() {
            Some(p) if p.tool == tool => p,
            _ => PendingInvocation::new(&tool),
        };
        pending.merge(params);

        let resolution =
            ParameterResolver::resolve(&self.registry, definition, &pending.params, conversation);
        if !resolution.is_complete() {
            let question = resolution
                .question()
                .unwrap_or_else(|| "Could you give me a bit more detail?".to_string());
            pending.missing = resolution.missing_names();
            conversation.pending = Some(pending);
            return TurnOutcome {
                answer: question,
                requires_follow_up: true,
                artifacts: Vec::new(),
            };
        }

        pending.missing.clear();
        let report = self.pipeline.run(conversation, &pending).await;
        // Any terminal status starts the next message on a fresh intent
        // cycle; re-sending the same parameters is a new invocation.
        conversation.pending = None;

        TurnOutcome {
            answer: self.composer.execution_answer(&report),
            requires_follow_up: false,
            artifacts: report.artifacts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::MediaKind;
    use crate::error::{ExecutionError, InterpretationError};
    use crate::intent::{ChatMessage, ReasoningClient};
    use crate::pipeline::{ExecutionContext, ToolExecutor, ToolOutput};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    /// Reasoning stub that replays scripted replies in order.
    struct ScriptedClient {
        replies: Mutex<Vec<Result<String, InterpretationError>>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String, InterpretationError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
            })
        }
    }

    #[async_trait]
    impl ReasoningClient for ScriptedClient {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, InterpretationError> {
            self.replies
                .lock()
                .expect("scripted replies poisoned")
                .remove(0)
        }
    }

    struct StubExecutor {
        tool: &'static str,
        filename: &'static str,
        kind: MediaKind,
        fail: bool,
    }

    #[async_trait]
    impl ToolExecutor for StubExecutor {
        async fn execute(&self, ctx: &ExecutionContext) -> Result<ToolOutput, ExecutionError> {
            if self.fail {
                return Err(ExecutionError::new(self.tool, "stage blew up"));
            }
            let path = ctx.output_dir().join(self.filename);
            tokio::fs::write(&path, b"data").await.map_err(|e| {
                ExecutionError::new(self.tool, format!("write failed: {e}"))
            })?;
            Ok(ToolOutput {
                artifacts: vec![ctx.artifact(self.filename, self.kind, self.tool)],
                summary: format!("{} ran", self.tool),
            })
        }
    }

    fn orchestrator(
        client: Arc<dyn ReasoningClient>,
        root: &Path,
        kmeans_fails: bool,
    ) -> Orchestrator {
        let registry = Arc::new(ToolRegistry::builtin());
        let mut executors: HashMap<String, Arc<dyn ToolExecutor>> = HashMap::new();
        executors.insert(
            "preprocess_trip_data".to_string(),
            Arc::new(StubExecutor {
                tool: "preprocess_trip_data",
                filename: "filtered.csv",
                kind: MediaKind::Tabular,
                fail: false,
            }),
        );
        executors.insert(
            "kmeans_cluster".to_string(),
            Arc::new(StubExecutor {
                tool: "kmeans_cluster",
                filename: "clusters.geojson",
                kind: MediaKind::Vector,
                fail: kmeans_fails,
            }),
        );
        Orchestrator::new(
            Arc::clone(&registry),
            IntentInterpreter::new(client, 8),
            ExecutionPipeline::new(registry, executors, root),
            ResponseComposer::new("http://localhost:8000"),
        )
    }

    fn uploaded_conversation(root: &Path) -> Conversation {
        let mut conv = Conversation::new();
        conv.source_file = Some(root.join("upload.csv"));
        conv
    }

    const ASK_CLUSTER: &str =
        r#"{"action": "invoke", "tool": "kmeans_cluster", "params": {}}"#;
    const GIVE_FIVE: &str =
        r#"{"action": "invoke", "tool": "kmeans_cluster", "params": {"n_clusters": "5"}}"#;

    #[tokio::test]
    async fn test_scenario_a_missing_parameter_asks() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            ScriptedClient::new(vec![Ok(ASK_CLUSTER.to_string())]),
            dir.path(),
            false,
        );
        let mut conv = uploaded_conversation(dir.path());

        let outcome = orch.handle_turn(&mut conv, "cluster my points").await;

        assert!(outcome.requires_follow_up);
        assert!(outcome.artifacts.is_empty());
        assert!(outcome.answer.contains("number of clusters"), "{}", outcome.answer);
        assert_eq!(
            conv.pending.as_ref().map(|p| p.missing.clone()),
            Some(vec!["n_clusters".to_string()])
        );
    }

    #[tokio::test]
    async fn test_scenario_b_fill_and_execute() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            ScriptedClient::new(vec![Ok(ASK_CLUSTER.to_string()), Ok(GIVE_FIVE.to_string())]),
            dir.path(),
            false,
        );
        let mut conv = uploaded_conversation(dir.path());

        let first = orch.handle_turn(&mut conv, "cluster my points").await;
        assert!(first.requires_follow_up);

        let second = orch.handle_turn(&mut conv, "5").await;
        assert!(!second.requires_follow_up);
        // Preprocessing ran before clustering.
        let produced: Vec<_> = second.artifacts.iter().map(|a| a.produced_by.as_str()).collect();
        assert_eq!(produced, vec!["preprocess_trip_data", "kmeans_cluster"]);
        assert!(conv.pending.is_none());

        // Round-trip property: every artifact path resolves on disk.
        for artifact in &second.artifacts {
            assert!(dir.path().join(&artifact.path).exists(), "{}", artifact.path);
        }
    }

    #[tokio::test]
    async fn test_scenario_d_interpretation_failure_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            ScriptedClient::new(vec![Err(InterpretationError::Timeout)]),
            dir.path(),
            false,
        );
        let mut conv = uploaded_conversation(dir.path());

        let outcome = orch.handle_turn(&mut conv, "cluster my points").await;

        assert!(outcome.requires_follow_up);
        assert!(outcome.answer.contains("rephrase"));
        // The failed turn is still recorded.
        assert_eq!(conv.turns.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_reported_with_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            ScriptedClient::new(vec![Ok(GIVE_FIVE.to_string())]),
            dir.path(),
            true,
        );
        let mut conv = uploaded_conversation(dir.path());

        let outcome = orch.handle_turn(&mut conv, "split into 5 clusters").await;

        assert!(!outcome.requires_follow_up);
        assert!(outcome.answer.contains("partway"), "{}", outcome.answer);
        assert_eq!(outcome.artifacts.len(), 1);
        assert!(conv.pending.is_none());
    }

    #[tokio::test]
    async fn test_idempotence_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            ScriptedClient::new(vec![Ok(GIVE_FIVE.to_string()), Ok(GIVE_FIVE.to_string())]),
            dir.path(),
            false,
        );
        let mut conv = uploaded_conversation(dir.path());

        let first = orch.handle_turn(&mut conv, "split into 5 clusters").await;
        assert!(!first.requires_follow_up);

        // Re-sending the same completed parameters starts a fresh invocation
        // instead of replaying stale state.
        let second = orch.handle_turn(&mut conv, "split into 5 clusters").await;
        assert!(!second.requires_follow_up);
        assert_eq!(second.artifacts.iter().map(|a| a.produced_by.as_str()).collect::<Vec<_>>(), vec!["kmeans_cluster"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_lists_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            ScriptedClient::new(vec![Ok(
                r#"{"action": "invoke", "tool": "make_coffee", "params": {}}"#.to_string(),
            )]),
            dir.path(),
            false,
        );
        let mut conv = uploaded_conversation(dir.path());

        let outcome = orch.handle_turn(&mut conv, "make me a coffee").await;
        assert!(outcome.requires_follow_up);
        assert!(outcome.answer.contains("kmeans_cluster"));
    }

    #[tokio::test]
    async fn test_switching_tools_resets_pending() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            ScriptedClient::new(vec![
                Ok(ASK_CLUSTER.to_string()),
                Ok(r#"{"action": "invoke", "tool": "render_heatmap", "params": {}}"#.to_string()),
            ]),
            dir.path(),
            false,
        );
        let mut conv = uploaded_conversation(dir.path());

        orch.handle_turn(&mut conv, "cluster my points").await;
        assert_eq!(conv.pending.as_ref().map(|p| p.tool.clone()), Some("kmeans_cluster".to_string()));

        // No heatmap executor is registered in this fixture; what matters is
        // that the pending invocation switched to the new tool chain.
        let outcome = orch.handle_turn(&mut conv, "actually render a heatmap instead").await;
        assert!(conv.pending.is_none());
        assert!(outcome.answer.contains("partway") || outcome.answer.contains("couldn't complete"), "{}", outcome.answer);
    }
}
