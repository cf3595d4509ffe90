//! Declarative tools with explicit method tables.
//!
//! A [`Tool`] is a named group of methods. Each method pairs a schema
//! ([`ToolMethod`]) with a typed [`MethodHandler`]; the pairing is
//! validated when the method is registered, so dispatch never has to
//! guess. Unknown methods and missing required arguments come back as
//! error results, not panics.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ai::types::ToolSchema;

/// Outcome of one tool invocation.
///
/// `content` is the text fed back to the model; `display` is an optional
/// shorter form for UIs. Failures carry `error` and `success == false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            content: content.into(),
            display: None,
            metadata: Value::Null,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            call_id: String::new(),
            success: false,
            content: format!("Error: {message}"),
            display: None,
            metadata: Value::Null,
            error: Some(message),
        }
    }

    pub fn for_call(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Display text if present, otherwise the model-facing content.
    pub fn display_text(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.content)
    }
}

#[derive(Debug, Error)]
pub enum ToolDefinitionError {
    #[error("method '{0}' is already registered")]
    DuplicateMethod(String),
    #[error("required argument '{field}' of method '{method}' is missing from its parameter schema")]
    UnknownRequiredField { method: String, field: String },
    #[error("method '{0}' has a non-object parameter schema")]
    InvalidParameterSchema(String),
}

/// Schema for a single tool method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMethod {
    pub name: String,
    pub description: String,
    /// JSON-schema `properties` object.
    pub parameters: Value,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub dangerous: bool,
    #[serde(default)]
    pub confirmation_required: bool,
}

impl ToolMethod {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Value::Object(Default::default()),
            required: Vec::new(),
            dangerous: false,
            confirmation_required: false,
        }
    }

    pub fn with_parameters(mut self, parameters: Value, required: &[&str]) -> Self {
        self.parameters = parameters;
        self.required = required.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn dangerous(mut self) -> Self {
        self.dangerous = true;
        self.confirmation_required = true;
        self
    }

    /// Model-facing schema under the tool's namespace.
    pub fn schema(&self, tool_name: &str) -> ToolSchema {
        ToolSchema {
            name: format!("{tool_name}.{}", self.name),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            required: self.required.clone(),
            dangerous: self.dangerous,
            confirmation_required: self.confirmation_required,
        }
    }
}

#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn invoke(&self, args: Value) -> ToolResult;
}

type BoxedResultFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

struct FnHandler<F>(F);

#[async_trait]
impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(Value) -> BoxedResultFuture + Send + Sync,
{
    async fn invoke(&self, args: Value) -> ToolResult {
        (self.0)(args).await
    }
}

/// Wrap an async closure as a [`MethodHandler`].
pub fn handler<F, Fut>(f: F) -> Arc<dyn MethodHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    Arc::new(FnHandler(move |args| {
        Box::pin(f(args)) as BoxedResultFuture
    }))
}

/// A named tool exposing a validated method table.
pub struct Tool {
    name: String,
    description: String,
    methods: HashMap<String, (ToolMethod, Arc<dyn MethodHandler>)>,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Register a method. Fails on duplicate names or when a required
    /// argument is absent from the parameter schema.
    pub fn register_method(
        &mut self,
        method: ToolMethod,
        handler: Arc<dyn MethodHandler>,
    ) -> Result<(), ToolDefinitionError> {
        if self.methods.contains_key(&method.name) {
            return Err(ToolDefinitionError::DuplicateMethod(method.name));
        }
        let Some(properties) = method.parameters.as_object() else {
            return Err(ToolDefinitionError::InvalidParameterSchema(method.name));
        };
        for field in &method.required {
            if !properties.contains_key(field) {
                return Err(ToolDefinitionError::UnknownRequiredField {
                    method: method.name.clone(),
                    field: field.clone(),
                });
            }
        }
        self.methods
            .insert(method.name.clone(), (method, handler));
        Ok(())
    }

    /// Builder-style registration for static tool definitions.
    pub fn with_method(
        mut self,
        method: ToolMethod,
        handler: Arc<dyn MethodHandler>,
    ) -> Result<Self, ToolDefinitionError> {
        self.register_method(method, handler)?;
        Ok(self)
    }

    pub fn method(&self, name: &str) -> Option<&ToolMethod> {
        self.methods.get(name).map(|(method, _)| method)
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .methods
            .values()
            .map(|(method, _)| method.schema(&self.name))
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Invoke one method. Validation failures return error results.
    pub async fn execute(&self, method_name: &str, args: Value) -> ToolResult {
        let Some((method, handler)) = self.methods.get(method_name) else {
            return ToolResult::error(format!(
                "unknown method '{method_name}' on tool '{}'",
                self.name
            ));
        };

        for field in &method.required {
            if args.get(field).map_or(true, Value::is_null) {
                return ToolResult::error(format!(
                    "missing required argument '{field}' for '{}.{method_name}'",
                    self.name
                ));
            }
        }

        handler.invoke(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status_tool() -> Tool {
        Tool::new("vehicle", "Single-vehicle operations")
            .with_method(
                ToolMethod::new("status", "Report vehicle status").with_parameters(
                    json!({"vehicle_id": {"type": "string"}}),
                    &["vehicle_id"],
                ),
                handler(|args| async move {
                    ToolResult::success(format!("vehicle {} nominal", args["vehicle_id"]))
                }),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn executes_registered_method() {
        let tool = status_tool();
        let result = tool.execute("status", json!({"vehicle_id": "v1"})).await;
        assert!(result.success);
        assert!(result.content.contains("v1"));
    }

    #[tokio::test]
    async fn unknown_method_is_an_error_result() {
        let tool = status_tool();
        let result = tool.execute("launch", json!({})).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("unknown method 'launch'"));
    }

    #[tokio::test]
    async fn missing_required_argument_is_an_error_result() {
        let tool = status_tool();
        let result = tool.execute("status", json!({})).await;
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("missing required argument 'vehicle_id'"));
    }

    #[test]
    fn registration_rejects_unknown_required_field() {
        let mut tool = Tool::new("vehicle", "ops");
        let err = tool
            .register_method(
                ToolMethod::new("goto", "Fly somewhere")
                    .with_parameters(json!({"lat": {"type": "number"}}), &["lat", "lon"]),
                handler(|_| async { ToolResult::success("ok") }),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ToolDefinitionError::UnknownRequiredField { ref field, .. } if field == "lon"
        ));
    }

    #[test]
    fn registration_rejects_duplicate_method() {
        let mut tool = Tool::new("vehicle", "ops");
        let noop = handler(|_| async { ToolResult::success("ok") });
        tool.register_method(ToolMethod::new("status", "a"), noop.clone())
            .unwrap();
        let err = tool
            .register_method(ToolMethod::new("status", "b"), noop)
            .unwrap_err();
        assert!(matches!(err, ToolDefinitionError::DuplicateMethod(_)));
    }

    #[test]
    fn schemas_are_namespaced_and_sorted() {
        let noop = handler(|_| async { ToolResult::success("ok") });
        let tool = Tool::new("fleet", "Fleet operations")
            .with_method(ToolMethod::new("sync_maneuver", "b"), noop.clone())
            .unwrap()
            .with_method(ToolMethod::new("assemble", "a").dangerous(), noop)
            .unwrap();

        let schemas = tool.schemas();
        assert_eq!(schemas[0].name, "fleet.assemble");
        assert!(schemas[0].confirmation_required);
        assert_eq!(schemas[1].name, "fleet.sync_maneuver");
    }
}
