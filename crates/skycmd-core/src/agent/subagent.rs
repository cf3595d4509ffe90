//! Invoking one agent as a tool of another.
//!
//! A sub-agent gets its own executor, context, and scheduler. Its text and
//! thought events are relayed to the parent's sink tagged with the agent
//! name; its final result is wrapped into a [`ToolResult`] the parent
//! model can read. Confirmation requests pass through to the same
//! confirming party as the parent's.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agent::events::{emit, AgentEvent, EventSink};
use crate::agent::executor::{AgentExecutor, ExecutorConfig, ExecutorServices};
use crate::agent::registry::AgentDefinition;
use crate::agent::scheduler::ConfirmationSink;
use crate::tools::ToolResult;

/// Characters of sub-agent output shown in the parent's display text.
const DISPLAY_CHARS: usize = 100;

pub struct SubagentInvocation {
    definition: AgentDefinition,
    task: String,
    task_context: Option<Value>,
    services: ExecutorServices,
    event_tx: EventSink,
    confirmation_tx: ConfirmationSink,
    depth: usize,
}

impl SubagentInvocation {
    pub(crate) fn new(
        definition: AgentDefinition,
        task: String,
        task_context: Option<Value>,
        services: ExecutorServices,
        event_tx: EventSink,
        confirmation_tx: ConfirmationSink,
        depth: usize,
    ) -> Self {
        Self {
            definition,
            task,
            task_context,
            services,
            event_tx,
            confirmation_tx,
            depth,
        }
    }

    /// Run the sub-agent to completion within its timeout budget.
    pub async fn execute(self, cancel: CancellationToken) -> ToolResult {
        let agent = self.definition.name.clone();
        info!(agent = %agent, task = %self.task, depth = self.depth, "invoking sub-agent");
        emit(
            &self.event_tx,
            AgentEvent::SubagentStarted {
                agent: agent.clone(),
                task: self.task.clone(),
            },
        );

        // Relay nested text and thoughts under the sub-agent's name.
        let (nested_tx, mut nested_rx) = mpsc::unbounded_channel();
        let parent_tx = self.event_tx.clone();
        let relay_agent = agent.clone();
        tokio::spawn(async move {
            while let Some(event) = nested_rx.recv().await {
                match event {
                    AgentEvent::TextDelta { delta } => emit(
                        &parent_tx,
                        AgentEvent::SubagentDelta {
                            agent: relay_agent.clone(),
                            delta,
                        },
                    ),
                    AgentEvent::Thought { description, .. } => emit(
                        &parent_tx,
                        AgentEvent::SubagentThought {
                            agent: relay_agent.clone(),
                            description,
                        },
                    ),
                    _ => {}
                }
            }
        });

        let config = ExecutorConfig {
            max_turns: self.definition.max_turns,
            ..ExecutorConfig::default()
        };
        let budget = Duration::from_secs(self.definition.timeout_secs);
        let mut executor = AgentExecutor::with_depth(
            self.definition.clone(),
            self.services,
            config,
            nested_tx,
            self.confirmation_tx,
            self.depth,
        );

        let input = build_input(&self.task, self.task_context.as_ref());
        let run = tokio::time::timeout(budget, executor.run(&input, cancel.clone())).await;

        if cancel.is_cancelled() {
            emit(
                &self.event_tx,
                AgentEvent::SubagentFinished {
                    agent: agent.clone(),
                    success: false,
                },
            );
            return ToolResult::error(format!("agent '{agent}' was cancelled"));
        }

        match run {
            Err(_) => {
                emit(
                    &self.event_tx,
                    AgentEvent::SubagentFinished {
                        agent: agent.clone(),
                        success: false,
                    },
                );
                ToolResult::error(format!(
                    "agent '{agent}' timed out after {}s",
                    self.definition.timeout_secs
                ))
            }
            Ok(result) if result.success => {
                emit(
                    &self.event_tx,
                    AgentEvent::SubagentFinished {
                        agent: agent.clone(),
                        success: true,
                    },
                );
                ToolResult::success(format!("Agent '{agent}' completed.\n{}", result.content))
                    .with_display(truncate(&result.content, DISPLAY_CHARS))
                    .with_metadata(json!({
                        "agent": agent,
                        "turns": result.turns,
                        "tool_calls": result.tool_calls,
                        "duration_ms": result.duration.as_millis() as u64,
                    }))
            }
            Ok(result) => {
                emit(
                    &self.event_tx,
                    AgentEvent::SubagentFinished {
                        agent: agent.clone(),
                        success: false,
                    },
                );
                ToolResult::error(format!(
                    "agent '{agent}' failed: {}",
                    result.error.unwrap_or_else(|| "unknown error".to_string())
                ))
            }
        }
    }
}

fn build_input(task: &str, context: Option<&Value>) -> String {
    let mut input = format!("Task: {task}");
    if let Some(Value::Object(map)) = context {
        if !map.is_empty() {
            input.push_str("\n\nContext:");
            for (key, value) in map {
                input.push_str(&format!("\n- {key}: {value}"));
            }
        }
    }
    input
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
