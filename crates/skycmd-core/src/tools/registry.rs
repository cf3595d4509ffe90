//! Tool registry: name to tool lookup and full-name dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::ai::types::ToolSchema;

use super::tool::{Tool, ToolResult};

#[derive(Debug, Error)]
pub enum ToolRegistryError {
    #[error("tool '{0}' is already registered")]
    Duplicate(String),
}

/// Maps tool names to tools and resolves `tool.method` full names.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<Tool>) -> Result<(), ToolRegistryError> {
        let mut tools = self.tools.write();
        if tools.contains_key(tool.name()) {
            return Err(ToolRegistryError::Duplicate(tool.name().to_string()));
        }
        info!(tool = tool.name(), "registered tool");
        tools.insert(tool.name().to_string(), tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas for every method of every registered tool.
    pub fn schemas_for_model(&self) -> Vec<ToolSchema> {
        let tools: Vec<Arc<Tool>> = self.tools.read().values().cloned().collect();
        let mut schemas: Vec<ToolSchema> =
            tools.iter().flat_map(|tool| tool.schemas()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Execute a `tool.method` full name. Returns `None` when the tool
    /// itself is unknown; method-level failures come back as error results.
    pub async fn execute(&self, full_name: &str, args: Value) -> Option<ToolResult> {
        let (tool_name, method_name) = split_full_name(full_name);
        let tool = self.get(tool_name)?;
        let Some(method_name) = method_name else {
            warn!(name = full_name, "tool call without a method name");
            return Some(ToolResult::error(format!(
                "tool '{tool_name}' requires a method, e.g. '{tool_name}.status'"
            )));
        };
        Some(tool.execute(method_name, args).await)
    }
}

fn split_full_name(full_name: &str) -> (&str, Option<&str>) {
    match full_name.split_once('.') {
        Some((tool, method)) => (tool, Some(method)),
        None => (full_name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool::{handler, ToolMethod};
    use serde_json::json;

    fn registry_with_vehicle() -> ToolRegistry {
        let tool = Tool::new("vehicle", "Vehicle operations")
            .with_method(
                ToolMethod::new("status", "Report status"),
                handler(|_| async { ToolResult::success("nominal") }),
            )
            .unwrap();
        let registry = ToolRegistry::new();
        registry.register(Arc::new(tool)).unwrap();
        registry
    }

    #[tokio::test]
    async fn resolves_full_names() {
        let registry = registry_with_vehicle();

        let result = registry
            .execute("vehicle.status", json!({}))
            .await
            .unwrap();
        assert!(result.success);

        assert!(registry.execute("fleet.assemble", json!({})).await.is_none());

        let result = registry.execute("vehicle", json!({})).await.unwrap();
        assert!(!result.success);
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = registry_with_vehicle();
        let err = registry
            .register(Arc::new(Tool::new("vehicle", "again")))
            .unwrap_err();
        assert!(matches!(err, ToolRegistryError::Duplicate(_)));
    }

    #[test]
    fn schemas_cover_all_tools() {
        let registry = registry_with_vehicle();
        let schemas = registry.schemas_for_model();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "vehicle.status");
    }
}
