//! Conversation state: turn history, pending invocations, artifacts, and the
//! store that holds them between HTTP round-trips.

pub mod store;
pub mod types;

pub use store::{ConversationHandle, ConversationStore, InMemoryConversationStore};
pub use types::{
    Artifact, Conversation, ConversationId, MediaKind, PendingInvocation, Role, Turn,
};
