//! Tool execution pipeline: runs a resolved invocation's stages in
//! dependency order and tracks every artifact they produce.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::conversation::{Artifact, Conversation, MediaKind, PendingInvocation};
use crate::error::ExecutionError;
use crate::tools::{ParamKind, ToolDefinition, ToolRegistry};

/// Lifecycle of one invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvocationStatus {
    /// Parameters still accumulating.
    Pending,
    /// Stages executing.
    Running,
    /// Every stage completed.
    Succeeded,
    /// A stage failed after earlier stages produced artifacts.
    PartiallyFailed,
    /// The chain aborted before producing anything.
    Failed,
}

/// Everything a tool executor needs for one stage.
pub struct ExecutionContext {
    /// Conversation the stage runs for.
    pub conversation_id: String,
    /// Root directory for all artifacts.
    pub output_root: PathBuf,
    /// Accumulated invocation parameters (shared across stages).
    pub params: BTreeMap<String, Value>,
    /// Input file wired by the pipeline: explicit parameter, an earlier
    /// stage's output, or the uploaded source file.
    pub input: Option<PathBuf>,
    /// Snapshot of the conversation's artifacts before this stage.
    pub prior_artifacts: Vec<Artifact>,
}

impl ExecutionContext {
    /// Directory this conversation's artifacts are written under.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.output_root.join(&self.conversation_id)
    }

    /// Absolute path for an artifact's conversation-relative path.
    #[must_use]
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.output_root.join(relative)
    }

    /// Build an artifact reference for a file written to the output dir.
    #[must_use]
    pub fn artifact(&self, filename: &str, kind: MediaKind, tool: &str) -> Artifact {
        Artifact::new(
            format!("{}/{filename}", self.conversation_id),
            kind,
            tool,
        )
    }

    /// String parameter accessor.
    #[must_use]
    pub fn str_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    /// Numeric parameter accessor; accepts numeric strings as well.
    #[must_use]
    pub fn number_param(&self, name: &str) -> Option<f64> {
        match self.params.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Output of one successfully executed stage.
#[derive(Debug)]
pub struct ToolOutput {
    /// Artifacts the stage produced.
    pub artifacts: Vec<Artifact>,
    /// One-line summary for the final answer.
    pub summary: String,
}

/// An execution routine backing one registered tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run the tool.
    async fn execute(&self, ctx: &ExecutionContext) -> Result<ToolOutput, ExecutionError>;
}

/// Report of one pipeline run.
pub struct PipelineReport {
    /// Terminal status.
    pub status: InvocationStatus,
    /// The tool the user asked for.
    pub tool: String,
    /// Artifacts produced by this run, in stage order.
    pub artifacts: Vec<Artifact>,
    /// Per-stage summaries, in stage order.
    pub summaries: Vec<String>,
    /// The failure that aborted the chain, if any.
    pub failure: Option<ExecutionError>,
}

/// Executes resolved invocations stage by stage.
pub struct ExecutionPipeline {
    registry: Arc<ToolRegistry>,
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
    output_root: PathBuf,
}

impl ExecutionPipeline {
    /// Build a pipeline over a registry and its executors.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        executors: HashMap<String, Arc<dyn ToolExecutor>>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            executors,
            output_root: output_root.into(),
        }
    }

    /// Run a fully resolved invocation.
    ///
    /// Each stage's artifacts are appended to the conversation immediately on
    /// stage success, so partial results survive a later failure. The caller
    /// clears the pending invocation after any terminal status.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        invocation: &PendingInvocation,
    ) -> PipelineReport {
        let Some(tool) = self.registry.lookup(&invocation.tool) else {
            return PipelineReport {
                status: InvocationStatus::Failed,
                tool: invocation.tool.clone(),
                artifacts: Vec::new(),
                summaries: Vec::new(),
                failure: Some(ExecutionError::new(
                    invocation.tool.clone(),
                    "unknown tool",
                )),
            };
        };

        let plan = self.registry.execution_plan(tool, conversation);
        let mut report = PipelineReport {
            status: InvocationStatus::Running,
            tool: invocation.tool.clone(),
            artifacts: Vec::new(),
            summaries: Vec::new(),
            failure: None,
        };

        if let Err(e) = tokio::fs::create_dir_all(
            self.output_root.join(&conversation.id),
        )
        .await
        {
            report.status = InvocationStatus::Failed;
            report.failure = Some(ExecutionError::new(
                invocation.tool.clone(),
                format!("could not create output directory: {e}"),
            ));
            return report;
        }

        for stage in plan {
            tracing::info!(
                conversation_id = %conversation.id,
                tool = stage.name,
                "executing pipeline stage"
            );

            let Some(executor) = self.executors.get(stage.name) else {
                report.failure = Some(ExecutionError::new(stage.name, "no executor registered"));
                break;
            };

            let ctx = ExecutionContext {
                conversation_id: conversation.id.clone(),
                output_root: self.output_root.clone(),
                params: invocation.params.clone(),
                input: self.wire_input(stage, invocation, conversation),
                prior_artifacts: conversation.artifacts.clone(),
            };

            match executor.execute(&ctx).await {
                Ok(output) => {
                    for artifact in &output.artifacts {
                        conversation.push_artifact(artifact.clone());
                    }
                    report.artifacts.extend(output.artifacts);
                    report.summaries.push(output.summary);
                }
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %conversation.id,
                        tool = stage.name,
                        error = %e,
                        "pipeline stage failed, aborting chain"
                    );
                    report.failure = Some(e);
                    break;
                }
            }
        }

        report.status = match (&report.failure, report.artifacts.is_empty()) {
            (None, _) => InvocationStatus::Succeeded,
            (Some(_), false) => InvocationStatus::PartiallyFailed,
            (Some(_), true) => InvocationStatus::Failed,
        };
        report
    }

    /// Pick the input file for a stage: an explicit `FileRef` parameter wins,
    /// then the latest artifact from a declared dependency, then the
    /// conversation's uploaded source file.
    fn wire_input(
        &self,
        stage: &ToolDefinition,
        invocation: &PendingInvocation,
        conversation: &Conversation,
    ) -> Option<PathBuf> {
        for spec in &stage.params {
            if !matches!(spec.kind, ParamKind::FileRef) {
                continue;
            }
            if let Some(value) = invocation.params.get(spec.name).and_then(Value::as_str) {
                return Some(self.locate(value, conversation));
            }
        }
        for dep in &stage.dependencies {
            if let Some(artifact) = conversation.latest_artifact_from(dep) {
                return Some(self.output_root.join(&artifact.path));
            }
        }
        conversation.source_file.clone()
    }

    /// Resolve a user-supplied file reference: a known artifact path first,
    /// then a path relative to the output root, then the path as given.
    fn locate(&self, reference: &str, conversation: &Conversation) -> PathBuf {
        if let Some(artifact) = conversation
            .artifacts
            .iter()
            .rev()
            .find(|a| a.path == reference || a.path.ends_with(reference))
        {
            return self.output_root.join(&artifact.path);
        }
        let namespaced = self.output_root.join(reference);
        if namespaced.exists() {
            return namespaced;
        }
        Path::new(reference).to_path_buf()
    }
}
