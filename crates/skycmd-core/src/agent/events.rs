//! Events emitted by the agent runtime.
//!
//! Every component publishes progress over an unbounded channel of
//! [`AgentEvent`]. Sends never block and a closed receiver is tolerated,
//! so emitting is always safe from async context.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::agent::automator::AutomatorState;
use crate::agent::scheduler::ToolCallStatus;
use crate::safety::RiskLevel;

pub type EventSink = mpsc::UnboundedSender<AgentEvent>;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental assistant text.
    TextDelta { delta: String },
    /// Model reasoning surfaced for display.
    Thought {
        subject: Option<String>,
        description: String,
    },
    /// A tool call changed lifecycle state.
    ToolCallUpdate {
        id: String,
        name: String,
        status: ToolCallStatus,
    },
    /// A tool call needs operator approval before it can run.
    ApprovalRequired {
        id: String,
        name: String,
        arguments: Value,
        risk: RiskLevel,
    },
    /// A tool call finished, successfully or not.
    ToolResult {
        id: String,
        name: String,
        success: bool,
        display: String,
    },
    /// All calls of one scheduled batch have reached a terminal state.
    BatchComplete { completed: usize },
    /// A nested agent started working on a task.
    SubagentStarted { agent: String, task: String },
    /// Text produced by a nested agent.
    SubagentDelta { agent: String, delta: String },
    /// Reasoning surfaced by a nested agent.
    SubagentThought { agent: String, description: String },
    /// A nested agent finished.
    SubagentFinished { agent: String, success: bool },
    /// One executor turn ended.
    TurnComplete { turn: usize, has_more: bool },
    /// The automator moved to a new state.
    AutomatorState { state: AutomatorState },
    /// The whole run ended normally.
    Finished,
    /// The whole run failed.
    Error { error: String },
}

/// Send an event, ignoring a closed receiver.
pub fn emit(sink: &EventSink, event: AgentEvent) {
    let _ = sink.send(event);
}
