//! Intent interpretation: prompt assembly, the reasoning-collaborator
//! boundary, and the validated structured-output contract.

pub mod client;
pub mod contract;
pub mod interpreter;

pub use client::{ChatMessage, OpenAiCompatClient, ReasoningClient};
pub use contract::{parse_intent, IntentOutcome};
pub use interpreter::IntentInterpreter;
