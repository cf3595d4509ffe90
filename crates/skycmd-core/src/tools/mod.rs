//! Tool layer: declarative method-table tools and their registry.

pub mod registry;
pub mod tool;

pub use registry::{ToolRegistry, ToolRegistryError};
pub use tool::{handler, MethodHandler, Tool, ToolDefinitionError, ToolMethod, ToolResult};
