//! Conversation context with token-budget compaction.
//!
//! The context is the single source of conversation history for an
//! executor. It tracks a cheap token estimate per message and, when the
//! estimate crosses the configured threshold, folds older messages into a
//! compact [`Summary`] while keeping the most recent messages verbatim.
//! Summaries are replayed to the model as synthetic system messages, one
//! per summary, oldest first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::ai::types::{ModelMessage, Role};

/// Key points kept per summary.
const MAX_KEY_POINTS: usize = 5;
/// Characters of each message kept in a key point before truncation.
const KEY_POINT_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_messages: usize,
    pub auto_compress: bool,
    /// Token estimate above which compaction runs.
    pub compress_threshold: usize,
    /// Most recent messages never folded into a summary.
    pub preserve_recent: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_messages: 100,
            auto_compress: true,
            compress_threshold: 6000,
            preserve_recent: 10,
        }
    }
}

/// One part of a message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Thought {
        subject: Option<String>,
        description: String,
    },
    Data { data: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    /// Set on tool-role messages so backends can correlate results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            parts: vec![MessagePart::Text { text: text.into() }],
            tool_call_id: None,
            context_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn tool(text: impl Into<String>, call_id: impl Into<String>) -> Self {
        let mut message = Self::new(Role::Tool, text);
        message.tool_call_id = Some(call_id.into());
        message
    }

    /// Concatenated text parts. Thoughts and data are excluded.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let MessagePart::Text { text } = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }
}

/// Compacted digest of older messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    pub key_points: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub id: Uuid,
    pub config: ContextConfig,
    messages: Vec<Message>,
    summaries: Vec<Summary>,
    metadata: HashMap<String, Value>,
    token_estimate: usize,
}

impl Context {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            messages: Vec::new(),
            summaries: Vec::new(),
            metadata: HashMap::new(),
            token_estimate: 0,
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn token_estimate(&self) -> usize {
        self.token_estimate
    }

    pub fn summaries(&self) -> &[Summary] {
        &self.summaries
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn add_message(&mut self, mut message: Message) -> Uuid {
        message.context_id = Some(self.id);
        let id = message.id;
        self.token_estimate += estimate_tokens(&message.text_content());
        self.messages.push(message);

        if self.config.auto_compress && self.token_estimate > self.config.compress_threshold {
            self.compact();
        }
        id
    }

    pub fn add_user_message(&mut self, text: impl Into<String>) -> Uuid {
        self.add_message(Message::user(text))
    }

    pub fn add_assistant_message(&mut self, text: impl Into<String>) -> Uuid {
        self.add_message(Message::assistant(text))
    }

    pub fn add_system_message(&mut self, text: impl Into<String>) -> Uuid {
        self.add_message(Message::system(text))
    }

    pub fn add_tool_message(
        &mut self,
        text: impl Into<String>,
        call_id: impl Into<String>,
    ) -> Uuid {
        self.add_message(Message::tool(text, call_id))
    }

    /// Most recent messages, newest last. `limit` of `None` means all.
    pub fn history(&self, limit: Option<usize>, include_system: bool) -> Vec<&Message> {
        let filtered: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| include_system || m.role != Role::System)
            .collect();
        match limit {
            Some(n) if n < filtered.len() => filtered[filtered.len() - n..].to_vec(),
            _ => filtered,
        }
    }

    /// Conversation in model-client shape. Each summary becomes one
    /// synthetic system message, oldest first, ahead of the raw messages.
    pub fn model_messages(&self) -> Vec<ModelMessage> {
        let mut out = Vec::with_capacity(self.summaries.len() + self.messages.len());
        for summary in &self.summaries {
            out.push(ModelMessage::system(format!(
                "[Conversation summary]\n{}",
                summary.text
            )));
        }
        for message in &self.messages {
            let content = message.text_content();
            match (&message.role, &message.tool_call_id) {
                (Role::Tool, Some(call_id)) => {
                    out.push(ModelMessage::tool(content, call_id.clone()));
                }
                (role, _) => out.push(ModelMessage::new(*role, content)),
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.summaries.clear();
        self.token_estimate = 0;
    }

    /// Fold everything but the most recent messages into a summary.
    fn compact(&mut self) {
        if self.messages.len() <= self.config.preserve_recent {
            return;
        }

        let split = self.messages.len() - self.config.preserve_recent;
        let older: Vec<Message> = self.messages.drain(..split).collect();

        let key_points: Vec<String> = older
            .iter()
            .map(|m| m.text_content())
            .take(MAX_KEY_POINTS)
            .map(|text| truncate_chars(&text, KEY_POINT_CHARS))
            .collect();

        let mut text = format!("Earlier conversation ({} messages):", older.len());
        for point in &key_points {
            text.push_str("\n- ");
            text.push_str(point);
        }

        self.summaries.push(Summary {
            text,
            key_points,
            created_at: Utc::now(),
        });

        self.token_estimate = self
            .messages
            .iter()
            .map(|m| estimate_tokens(&m.text_content()))
            .sum();

        debug!(
            context = %self.id,
            compacted = older.len(),
            remaining = self.messages.len(),
            estimate = self.token_estimate,
            "compacted context"
        );
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

/// Rough token estimate: one token per four characters, minimum one.
fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4 + 1
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
