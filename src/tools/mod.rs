//! Tool catalog: typed parameter schemas, the registry, and the built-in
//! geospatial executors.

pub mod geo;
pub mod registry;
pub mod spec;

pub use geo::builtin_executors;
pub use registry::ToolRegistry;
pub use spec::{ParamKind, ParameterSpec, TextFormat, ToolDefinition};
