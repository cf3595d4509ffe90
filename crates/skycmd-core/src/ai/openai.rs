//! OpenAI-compatible chat-completions client.
//!
//! Single blocking request per turn. The streaming entry point issues the
//! same request and replays the response as a short event sequence, which
//! keeps the executor's streaming path uniform without implementing the
//! provider's SSE protocol.

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::ModelClient;
use super::types::{
    FinishReason, ModelMessage, ModelResponse, Role, StreamEvent, ToolCallRequest, ToolSchema,
    Usage,
};

pub struct OpenAiClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
        }
    }

    fn build_body(&self, messages: &[ModelMessage], tools: &[ToolSchema]) -> Value {
        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                let mut msg = json!({"role": role, "content": m.content});
                if let Some(id) = &m.tool_call_id {
                    msg["tool_call_id"] = json!(id);
                }
                msg
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": wire_messages,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(ToolSchema::to_wire).collect());
        }
        body
    }

    fn parse_response(&self, body: Value) -> Result<ModelResponse> {
        let choice = body["choices"]
            .get(0)
            .ok_or_else(|| anyhow!("model response contained no choices"))?;
        let message = &choice["message"];

        let content = message["content"].as_str().unwrap_or_default().to_string();

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let id = call["id"].as_str().unwrap_or_default().to_string();
                let name = call["function"]["name"]
                    .as_str()
                    .ok_or_else(|| anyhow!("tool call missing function name"))?
                    .to_string();
                let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
                let arguments: Value =
                    serde_json::from_str(raw_args).unwrap_or_else(|_| json!({}));
                tool_calls.push(ToolCallRequest::with_id(id, name, arguments));
            }
        }

        let finish_reason = match choice["finish_reason"].as_str() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Other(other.to_string()),
            None => FinishReason::Stop,
        };

        let usage = Usage {
            prompt_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: body["usage"]["total_tokens"].as_u64().unwrap_or(0),
        };

        Ok(ModelResponse {
            content,
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[ModelMessage],
        tools: &[ToolSchema],
    ) -> Result<ModelResponse> {
        let body = self.build_body(messages, tools);
        debug!(model = %self.model, messages = messages.len(), "sending chat completion request");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("model request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("model returned {status}: {text}"));
        }

        let body: Value = response
            .json()
            .await
            .context("model response was not valid JSON")?;
        self.parse_response(body)
    }

    async fn generate_stream(
        &self,
        messages: &[ModelMessage],
        tools: &[ToolSchema],
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        let response = tokio::select! {
            result = self.generate(messages, tools) => result,
            () = cancel.cancelled() => Err(anyhow!("model request cancelled")),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        match response {
            Ok(response) => {
                if !response.content.is_empty() {
                    let _ = tx.send(StreamEvent::Content {
                        delta: response.content,
                    });
                }
                for request in response.tool_calls {
                    let _ = tx.send(StreamEvent::ToolCall { request });
                }
                let _ = tx.send(StreamEvent::Finished {
                    finish_reason: response.finish_reason,
                });
            }
            Err(err) => {
                let _ = tx.send(StreamEvent::Error {
                    message: err.to_string(),
                });
            }
        }
        Ok(rx)
    }
}
