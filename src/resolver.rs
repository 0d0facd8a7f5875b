//! Slot-filling: determines which required parameters are still unknown and
//! synthesizes the clarifying question for them.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::conversation::Conversation;
use crate::tools::{ParamKind, ParameterSpec, ToolDefinition, ToolRegistry};

/// Why a required parameter counts as missing.
#[derive(Clone, Debug)]
pub enum MissingReason {
    /// No value has been supplied at all.
    Absent,
    /// A value was supplied but failed validation; the message is quoted in
    /// the re-ask question.
    Invalid(String),
}

/// One missing required parameter.
#[derive(Clone, Debug)]
pub struct MissingParam {
    /// Parameter name.
    pub name: String,
    /// Description from the spec, used to phrase the question.
    pub description: String,
    /// Whether it is absent or invalid.
    pub reason: MissingReason,
}

/// Result of checking an invocation for completeness.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    /// Missing required parameters across the execution plan, in the order
    /// they will be needed: dependency stages first, each stage's parameters
    /// in declaration order.
    pub missing: Vec<MissingParam>,
}

impl Resolution {
    /// Whether the invocation is ready to execute.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Names of the missing parameters, for storing on the pending invocation.
    #[must_use]
    pub fn missing_names(&self) -> Vec<String> {
        self.missing.iter().map(|m| m.name.clone()).collect()
    }

    /// Synthesize the clarifying question for the earliest missing parameter.
    #[must_use]
    pub fn question(&self) -> Option<String> {
        let first = self.missing.first()?;
        Some(match &first.reason {
            MissingReason::Absent => {
                format!("Could you tell me {}?", first.description)
            }
            MissingReason::Invalid(message) => {
                format!("{message}. Could you give me {}?", first.description)
            }
        })
    }
}

/// Checks accumulated parameters against a tool's schema (and the schemas of
/// any dependency stages that would have to run first).
pub struct ParameterResolver;

impl ParameterResolver {
    /// Resolve an invocation: validate supplied values and list what is
    /// still needed before the tool can run.
    #[must_use]
    pub fn resolve(
        registry: &ToolRegistry,
        tool: &ToolDefinition,
        params: &BTreeMap<String, Value>,
        conversation: &Conversation,
    ) -> Resolution {
        let plan = registry.execution_plan(tool, conversation);
        let mut missing = Vec::new();

        for (stage_index, stage) in plan.iter().enumerate() {
            for spec in &stage.params {
                if missing.iter().any(|m: &MissingParam| m.name == spec.name) {
                    continue;
                }
                match params.get(spec.name) {
                    // A supplied value is checked whether the parameter is
                    // required or not; an invalid optional value is re-asked,
                    // never silently acted on.
                    Some(value) => {
                        if let Err(err) = spec.validate(value) {
                            missing.push(MissingParam {
                                name: spec.name.to_string(),
                                description: spec.description.to_string(),
                                reason: MissingReason::Invalid(err.message),
                            });
                        }
                    }
                    None => {
                        if !spec.required
                            || Self::file_ref_satisfied(spec, stage_index, conversation)
                        {
                            continue;
                        }
                        missing.push(MissingParam {
                            name: spec.name.to_string(),
                            description: spec.description.to_string(),
                            reason: MissingReason::Absent,
                        });
                    }
                }
            }
        }

        Resolution { missing }
    }

    /// A `FileRef` parameter without an explicit value is still satisfiable
    /// when the pipeline can wire it at execution time: from an earlier plan
    /// stage's output, or from the uploaded source file.
    fn file_ref_satisfied(
        spec: &ParameterSpec,
        stage_index: usize,
        conversation: &Conversation,
    ) -> bool {
        if !matches!(spec.kind, ParamKind::FileRef) {
            return false;
        }
        stage_index > 0
            || conversation.source_file.is_some()
            || !conversation.artifacts.is_empty()
    }
}
