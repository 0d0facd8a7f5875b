//! Conversational geo-analysis agent.
//!
//! A chat-driven orchestration engine for a geospatial analysis pipeline:
//! trip-point filtering, k-means clustering, heat-map and cluster rendering,
//! and animation assembly. Natural-language requests are interpreted by a
//! reasoning collaborator, resolved against a tool catalog, and executed as
//! dependency-ordered pipelines whose artifacts are served over HTTP.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(non_camel_case_types)]
#![deny(unused_must_use)]

/// Agent configuration and environment loading.
pub mod config;
/// Conversation state, turns, and the in-memory store.
pub mod conversation;
/// Error taxonomy shared across the crate.
pub mod error;
/// Natural-language intent interpretation.
pub mod intent;
/// Per-turn control flow tying interpretation, resolution, and execution together.
pub mod orchestrator;
/// Dependency-ordered tool execution.
pub mod pipeline;
/// Parameter completeness checking against the tool catalog.
pub mod resolver;
/// Answer and response payload assembly.
pub mod response;
/// HTTP server and API routes.
pub mod server;
/// Entry helpers to start the geo agent.
pub mod start_geo_agent;
/// Tool catalog and the built-in analysis tools.
pub mod tools;
