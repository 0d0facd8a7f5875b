//! Application state shared across all request handlers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::conversation::{ConversationStore, InMemoryConversationStore};
use crate::error::AgentError;
use crate::intent::{IntentInterpreter, OpenAiCompatClient, ReasoningClient};
use crate::orchestrator::Orchestrator;
use crate::pipeline::{ExecutionPipeline, ToolExecutor};
use crate::response::ResponseComposer;
use crate::tools::{builtin_executors, ToolRegistry};

/// Shared application state.
pub struct AppState {
    /// Agent configuration.
    pub config: AgentConfig,
    /// Live conversations.
    pub store: Arc<dyn ConversationStore>,
    /// Per-turn control flow.
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Create application state with the real reasoning client and the
    /// built-in tool executors.
    ///
    /// # Errors
    /// Returns `AgentError::Configuration` if the reasoning client cannot be
    /// constructed; the interpreter fails closed without a credential.
    pub fn new(config: AgentConfig) -> Result<Arc<Self>, AgentError> {
        if config.api_key.is_empty() {
            return Err(AgentError::Configuration(
                "missing reasoning credential".to_string(),
            ));
        }
        let client = OpenAiCompatClient::new(&config)
            .map_err(|e| AgentError::Configuration(format!("reasoning client: {e}")))?;
        let executors = builtin_executors(&config);
        Ok(Self::with_collaborators(config, Arc::new(client), executors))
    }

    /// Create application state with injected collaborators. Tests use this
    /// to substitute a scripted reasoning client and stub executors.
    #[must_use]
    pub fn with_collaborators(
        config: AgentConfig,
        client: Arc<dyn ReasoningClient>,
        executors: HashMap<String, Arc<dyn ToolExecutor>>,
    ) -> Arc<Self> {
        let registry = Arc::new(ToolRegistry::builtin());
        let orchestrator = Orchestrator::new(
            Arc::clone(&registry),
            IntentInterpreter::new(client, config.history_window),
            ExecutionPipeline::new(registry, executors, config.output_dir.clone()),
            ResponseComposer::new(config.public_base_url.clone()),
        );
        let store: Arc<dyn ConversationStore> =
            Arc::new(InMemoryConversationStore::new(config.store.clone()));
        Arc::new(Self {
            config,
            store,
            orchestrator,
        })
    }
}
