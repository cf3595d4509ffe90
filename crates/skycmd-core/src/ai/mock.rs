//! Deterministic scripted model client.
//!
//! Used by tests and by the CLI's offline mode. Each call to `generate`
//! consumes the next scripted turn; once the script is exhausted the
//! client replies with a fixed default and no tool calls, which lets an
//! agent loop terminate naturally.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::client::ModelClient;
use super::types::{
    FinishReason, ModelMessage, ModelResponse, StreamEvent, ToolCallRequest, ToolSchema, Usage,
};

/// One scripted model turn.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ScriptedTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_call(mut self, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        self.tool_calls.push(ToolCallRequest::new(name, arguments));
        self
    }
}

pub struct MockModelClient {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    default_reply: String,
    calls: AtomicUsize,
}

impl MockModelClient {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            default_reply: "Task complete.".to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_default_reply(reply: impl Into<String>) -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            default_reply: reply.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `generate`/`generate_stream` turns served so far.
    pub fn calls_served(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_turn(&self) -> ScriptedTurn {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.turns
            .lock()
            .pop_front()
            .unwrap_or_else(|| ScriptedTurn::text(self.default_reply.clone()))
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    fn model_id(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        _messages: &[ModelMessage],
        _tools: &[ToolSchema],
    ) -> Result<ModelResponse> {
        let turn = self.next_turn();
        let finish_reason = if turn.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };
        Ok(ModelResponse {
            content: turn.content,
            tool_calls: turn.tool_calls,
            finish_reason,
            usage: Usage::default(),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[ModelMessage],
        tools: &[ToolSchema],
        _cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        let response = self.generate(messages, tools).await?;
        let (tx, rx) = mpsc::unbounded_channel();
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
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn serves_script_then_default() {
        let client = MockModelClient::new(vec![
            ScriptedTurn::text("first").with_tool_call("vehicle.status", json!({})),
        ]);

        let turn1 = client.generate(&[], &[]).await.unwrap();
        assert_eq!(turn1.content, "first");
        assert!(turn1.has_tool_calls());
        assert_eq!(turn1.finish_reason, FinishReason::ToolCalls);

        let turn2 = client.generate(&[], &[]).await.unwrap();
        assert_eq!(turn2.content, "Task complete.");
        assert!(!turn2.has_tool_calls());
        assert_eq!(client.calls_served(), 2);
    }

    #[tokio::test]
    async fn stream_replays_turn_as_events() {
        let client = MockModelClient::new(vec![
            ScriptedTurn::text("hello").with_tool_call("vehicle.land", json!({"vehicle_id": "v1"})),
        ]);

        let mut rx = client
            .generate_stream(&[], &[], CancellationToken::new())
            .await
            .unwrap();

        let mut saw_content = false;
        let mut saw_tool = false;
        let mut saw_finish = false;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Content { delta } => {
                    assert_eq!(delta, "hello");
                    saw_content = true;
                }
                StreamEvent::ToolCall { request } => {
                    assert_eq!(request.name, "vehicle.land");
                    saw_tool = true;
                }
                StreamEvent::Finished { .. } => saw_finish = true,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(saw_content && saw_tool && saw_finish);
    }
}
