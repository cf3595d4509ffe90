//! Model client layer.
//!
//! Backend-agnostic message/response types, the [`client::ModelClient`]
//! trait, an OpenAI-compatible HTTP backend, and a scripted mock for tests
//! and offline runs.

pub mod client;
pub mod mock;
pub mod openai;
pub mod types;

pub use client::{FallbackClient, ModelClient};
pub use mock::{MockModelClient, ScriptedTurn};
pub use openai::OpenAiClient;
pub use types::{
    FinishReason, ModelMessage, ModelResponse, Role, StreamEvent, ToolCallRequest, ToolSchema,
    Usage,
};
