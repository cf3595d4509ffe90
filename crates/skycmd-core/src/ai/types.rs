//! Shared types for the model client layer.
//!
//! Wire-agnostic message, tool schema, and response types passed between
//! the executor and whatever model backend is plugged in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the shape model backends consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: Role,
    pub content: String,
    /// Set on tool-role messages so backends can correlate results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ModelMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Declarative description of one callable operation, advertised to the model.
///
/// `parameters` is a JSON-schema `properties` object; `required` lists the
/// argument names that must be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub dangerous: bool,
    #[serde(default)]
    pub confirmation_required: bool,
}

impl ToolSchema {
    /// OpenAI-style function declaration.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": self.parameters,
                    "required": self.required,
                },
            },
        })
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    /// Full operation name, `tool.method` or a sub-agent name.
    pub name: String,
    pub arguments: Value,
    pub created_at: DateTime<Utc>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            created_at: Utc::now(),
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

/// Token accounting reported by the backend, zeroed when unavailable.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One complete model turn.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Incremental events produced by a streaming model turn.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A chunk of assistant text.
    Content { delta: String },
    /// A fully parsed tool invocation.
    ToolCall { request: ToolCallRequest },
    /// Model reasoning surfaced for display, never fed back as context.
    Thought {
        subject: Option<String>,
        description: String,
    },
    /// Terminal: the turn ended normally.
    Finished { finish_reason: FinishReason },
    /// Terminal: the turn failed.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_schema_wire_format() {
        let schema = ToolSchema {
            name: "vehicle.goto".to_string(),
            description: "Fly to a position".to_string(),
            parameters: json!({
                "lat": {"type": "number"},
                "lon": {"type": "number"},
            }),
            required: vec!["lat".to_string(), "lon".to_string()],
            dangerous: false,
            confirmation_required: false,
        };

        let wire = schema.to_wire();
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "vehicle.goto");
        assert_eq!(wire["function"]["parameters"]["required"][0], "lat");
    }

    #[test]
    fn request_ids_are_unique() {
        let a = ToolCallRequest::new("vehicle.status", json!({}));
        let b = ToolCallRequest::new("vehicle.status", json!({}));
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("call_"));
    }

    #[test]
    fn tool_message_carries_call_id() {
        let msg = ModelMessage::tool("ok", "call_1");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }
}
