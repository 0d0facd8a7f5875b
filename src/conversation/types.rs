//! Core types for multi-turn conversations.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque conversation identifier.
pub type ConversationId = String;

/// Who produced a turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user.
    User,
    /// The agent.
    Assistant,
}

/// One message in a conversation. Immutable once appended.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    /// Who spoke.
    pub role: Role,
    /// What was said.
    pub text: String,
    /// When the turn was appended.
    pub timestamp: DateTime<Utc>,
    /// Artifacts produced while handling this turn (possibly empty).
    pub artifacts: Vec<Artifact>,
}

impl Turn {
    /// Build a user turn with no artifacts.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            artifacts: Vec::new(),
        }
    }

    /// Build an assistant turn carrying the artifacts it produced.
    #[must_use]
    pub fn assistant(text: impl Into<String>, artifacts: Vec<Artifact>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            artifacts,
        }
    }
}

/// Media kind of a produced artifact.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// CSV or similar row data.
    Tabular,
    /// Rendered raster image.
    Image,
    /// GeoJSON or other vector layer.
    Vector,
    /// Assembled GIF animation.
    Animation,
}

/// A file produced by a tool invocation. Referenced, never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    /// Path relative to the output root.
    pub path: String,
    /// What kind of file this is.
    pub kind: MediaKind,
    /// Name of the tool that produced it.
    pub produced_by: String,
}

impl Artifact {
    /// Build an artifact reference.
    #[must_use]
    pub fn new(path: impl Into<String>, kind: MediaKind, produced_by: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            produced_by: produced_by.into(),
        }
    }
}

/// An in-progress tool call accumulating parameters across turns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingInvocation {
    /// Name of the tool being filled in.
    pub tool: String,
    /// Parameters gathered so far. `BTreeMap` keeps prompt rendering stable.
    pub params: BTreeMap<String, Value>,
    /// Required parameters still missing or invalid, in declaration order.
    pub missing: Vec<String>,
}

impl PendingInvocation {
    /// Start a fresh invocation for a tool.
    #[must_use]
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: BTreeMap::new(),
            missing: Vec::new(),
        }
    }

    /// Merge newly extracted values. The newest user-supplied value wins;
    /// a user correcting themselves supersedes stale state.
    pub fn merge(&mut self, extracted: BTreeMap<String, Value>) {
        for (name, value) in extracted {
            if !value.is_null() {
                self.params.insert(name, value);
            }
        }
    }
}

/// A stateful multi-turn interaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique id, generated at creation, immutable.
    pub id: ConversationId,
    /// Ordered turn history, append-only.
    pub turns: Vec<Turn>,
    /// The tool call currently accumulating parameters, if any.
    pub pending: Option<PendingInvocation>,
    /// Every artifact produced across the conversation.
    pub artifacts: Vec<Artifact>,
    /// Data file uploaded by the user, if any.
    pub source_file: Option<PathBuf>,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
    /// Last time a turn was processed; drives idle eviction.
    pub last_active: DateTime<Utc>,
}

impl Conversation {
    /// Create an empty conversation with a fresh id.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            turns: Vec::new(),
            pending: None,
            artifacts: Vec::new(),
            source_file: None,
            created_at: now,
            last_active: now,
        }
    }

    /// Append a turn and refresh the activity timestamp.
    pub fn push_turn(&mut self, turn: Turn) {
        self.last_active = Utc::now();
        self.turns.push(turn);
    }

    /// The most recent `n` turns, oldest first.
    #[must_use]
    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// Record an artifact produced by a tool stage.
    pub fn push_artifact(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    /// The latest artifact of a given kind, if any.
    #[must_use]
    pub fn latest_artifact(&self, kind: MediaKind) -> Option<&Artifact> {
        self.artifacts.iter().rev().find(|a| a.kind == kind)
    }

    /// The latest artifact produced by a given tool, if any.
    #[must_use]
    pub fn latest_artifact_from(&self, tool: &str) -> Option<&Artifact> {
        self.artifacts.iter().rev().find(|a| a.produced_by == tool)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
