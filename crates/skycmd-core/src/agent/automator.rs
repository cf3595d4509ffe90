//! Automatic multi-turn driver.
//!
//! Wraps an executor and keeps feeding it turns until the task looks
//! complete, the model needs operator input, a budget runs out, or the
//! run is cancelled. Between turns that neither finish nor ask a
//! question, a synthesized "continue" input keeps the loop moving.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::events::{emit, AgentEvent, EventSink};
use crate::agent::executor::{AgentExecutor, ExecutorResult};

/// Input fed to the executor when no operator input is needed.
const CONTINUE_INPUT: &str = "continue";

/// Phrases that mark a final response as task completion.
const COMPLETION_PHRASES: &[&str] = &[
    "task complete",
    "task completed",
    "task is complete",
    "completed successfully",
    "all done",
    "mission accomplished",
    "nothing further to do",
];

/// Phrases that mark a final response as a question for the operator.
const QUESTION_PHRASES: &[&str] = &[
    "do you want",
    "would you like",
    "should i",
    "please confirm",
    "please choose",
    "please provide",
    "let me know",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomatorState {
    Idle,
    Running,
    WaitingInput,
    Completed,
    Failed,
    Cancelled,
}

impl AutomatorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

pub type CompletionChecker = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct AutomatorConfig {
    pub max_auto_turns: usize,
    /// Budget per executor turn; an overrun skips the turn.
    pub turn_timeout: Duration,
    /// Budget for the whole run, including time spent waiting for input.
    pub total_timeout: Duration,
    /// Wait for operator input between every turn.
    pub require_confirmation: bool,
    /// Optional domain-specific completion test on the final response.
    pub completion_checker: Option<CompletionChecker>,
}

impl Default for AutomatorConfig {
    fn default() -> Self {
        Self {
            max_auto_turns: 10,
            turn_timeout: Duration::from_secs(120),
            total_timeout: Duration::from_secs(600),
            require_confirmation: false,
            completion_checker: None,
        }
    }
}

impl std::fmt::Debug for AutomatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomatorConfig")
            .field("max_auto_turns", &self.max_auto_turns)
            .field("turn_timeout", &self.turn_timeout)
            .field("total_timeout", &self.total_timeout)
            .field("require_confirmation", &self.require_confirmation)
            .field("completion_checker", &self.completion_checker.is_some())
            .finish()
    }
}

/// One automator turn as recorded in the run history.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub turn: usize,
    pub input: String,
    pub output: String,
    pub tool_calls: usize,
    pub skipped: bool,
}

#[derive(Debug, Clone)]
pub struct AutomatorResult {
    pub success: bool,
    pub final_response: String,
    pub turns: usize,
    pub total_tool_calls: usize,
    pub duration: Duration,
    pub history: Vec<TurnRecord>,
    pub error: Option<String>,
}

/// Handle for feeding input and cancelling from another task.
#[derive(Clone)]
pub struct AutomatorHandle {
    input_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl AutomatorHandle {
    /// Deliver operator input. Returns false when the automator is gone.
    pub fn provide_input(&self, input: impl Into<String>) -> bool {
        self.input_tx.send(input.into()).is_ok()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

pub struct Automator {
    executor: AgentExecutor,
    config: AutomatorConfig,
    state: AutomatorState,
    event_tx: EventSink,
    cancel: CancellationToken,
    input_tx: mpsc::UnboundedSender<String>,
    input_rx: mpsc::UnboundedReceiver<String>,
}

impl Automator {
    pub fn new(executor: AgentExecutor, config: AutomatorConfig, event_tx: EventSink) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        Self {
            executor,
            config,
            state: AutomatorState::Idle,
            event_tx,
            cancel: CancellationToken::new(),
            input_tx,
            input_rx,
        }
    }

    pub fn state(&self) -> AutomatorState {
        self.state
    }

    pub fn handle(&self) -> AutomatorHandle {
        AutomatorHandle {
            input_tx: self.input_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Drive the task to completion. Runtime failures are folded into the
    /// result; calling this while a run is in progress is a usage error.
    pub async fn run(&mut self, initial_input: &str) -> Result<AutomatorResult> {
        if matches!(
            self.state,
            AutomatorState::Running | AutomatorState::WaitingInput
        ) {
            bail!("automator is already running");
        }

        self.set_state(AutomatorState::Running);
        let started = Instant::now();
        let deadline = started + self.config.total_timeout;

        let mut history: Vec<TurnRecord> = Vec::new();
        let mut total_tool_calls = 0;
        let mut final_response = String::new();
        let mut error: Option<String> = None;
        let mut turns = 0;
        let mut current_input = initial_input.to_string();

        while turns < self.config.max_auto_turns {
            if self.cancel.is_cancelled() {
                self.set_state(AutomatorState::Cancelled);
                break;
            }
            let Some(remaining) = remaining_budget(deadline) else {
                error = Some(total_timeout_message(&self.config));
                self.set_state(AutomatorState::Failed);
                break;
            };

            turns += 1;
            debug!(turn = turns, input = %current_input, "automator turn");

            let turn_budget = remaining.min(self.config.turn_timeout);
            let result = match tokio::time::timeout(
                turn_budget,
                self.executor.run(&current_input, self.cancel.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    if remaining_budget(deadline).is_none()
                        || turn_budget >= remaining
                    {
                        error = Some(total_timeout_message(&self.config));
                        self.set_state(AutomatorState::Failed);
                        break;
                    }
                    warn!(turn = turns, "turn exceeded its budget, skipping");
                    history.push(TurnRecord {
                        turn: turns,
                        input: current_input.clone(),
                        output: String::new(),
                        tool_calls: 0,
                        skipped: true,
                    });
                    current_input = CONTINUE_INPUT.to_string();
                    continue;
                }
            };

            total_tool_calls += result.tool_calls;
            if !result.content.is_empty() {
                final_response = result.content.clone();
            }
            history.push(TurnRecord {
                turn: turns,
                input: current_input.clone(),
                output: result.content.clone(),
                tool_calls: result.tool_calls,
                skipped: false,
            });

            // Cancellation mid-turn outranks the completion heuristics.
            if self.cancel.is_cancelled() {
                self.set_state(AutomatorState::Cancelled);
                break;
            }

            if self.is_completed(&result) {
                self.set_state(AutomatorState::Completed);
                break;
            }

            let wants_operator =
                self.config.require_confirmation || needs_user_input(&result.content);
            if wants_operator {
                self.set_state(AutomatorState::WaitingInput);
                match self.wait_for_input(deadline).await {
                    InputOutcome::Input(input) => {
                        current_input = input;
                        self.set_state(AutomatorState::Running);
                    }
                    InputOutcome::Cancelled => {
                        self.set_state(AutomatorState::Cancelled);
                        break;
                    }
                    InputOutcome::TimedOut => {
                        error = Some(total_timeout_message(&self.config));
                        self.set_state(AutomatorState::Failed);
                        break;
                    }
                }
            } else {
                current_input = CONTINUE_INPUT.to_string();
            }
        }

        // Budget exhausted without failure or a question pending.
        if self.state == AutomatorState::Running {
            self.set_state(AutomatorState::Completed);
        }

        let success = self.state == AutomatorState::Completed;
        if success {
            emit(&self.event_tx, AgentEvent::Finished);
        }
        info!(
            success,
            turns,
            total_tool_calls,
            state = ?self.state,
            "automator run finished"
        );
        Ok(AutomatorResult {
            success,
            final_response,
            turns,
            total_tool_calls,
            duration: started.elapsed(),
            history,
            error,
        })
    }

    async fn wait_for_input(&mut self, deadline: Instant) -> InputOutcome {
        let Some(remaining) = remaining_budget(deadline) else {
            return InputOutcome::TimedOut;
        };
        tokio::select! {
            input = self.input_rx.recv() => match input {
                Some(input) => InputOutcome::Input(input),
                None => InputOutcome::Cancelled,
            },
            () = self.cancel.cancelled() => InputOutcome::Cancelled,
            () = tokio::time::sleep(remaining) => InputOutcome::TimedOut,
        }
    }

    fn is_completed(&self, result: &ExecutorResult) -> bool {
        if result.tool_calls == 0 {
            return true;
        }
        // A configured checker replaces the phrase heuristics outright.
        if let Some(checker) = &self.config.completion_checker {
            return checker(&result.content);
        }
        let lower = result.content.to_lowercase();
        COMPLETION_PHRASES.iter().any(|p| lower.contains(p))
    }

    fn set_state(&mut self, state: AutomatorState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "automator state change");
            self.state = state;
            emit(&self.event_tx, AgentEvent::AutomatorState { state });
        }
    }
}

enum InputOutcome {
    Input(String),
    Cancelled,
    TimedOut,
}

fn remaining_budget(deadline: Instant) -> Option<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    (remaining > Duration::ZERO).then_some(remaining)
}

fn total_timeout_message(config: &AutomatorConfig) -> String {
    format!(
        "total timeout of {}s exceeded",
        config.total_timeout.as_secs()
    )
}

fn needs_user_input(content: &str) -> bool {
    if content.contains('?') {
        return true;
    }
    let lower = content.to_lowercase();
    QUESTION_PHRASES.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::executor::{ExecutorConfig, ExecutorServices};
    use crate::agent::registry::{AgentDefinition, AgentRegistry};
    use crate::ai::client::ModelClient;
    use crate::ai::mock::{MockModelClient, ScriptedTurn};
    use crate::safety::{ApprovalMode, SafetyPolicy};
    use crate::tools::{handler, Tool, ToolMethod, ToolRegistry, ToolResult};
    use serde_json::json;

    fn automator(client: Arc<dyn ModelClient>, config: AutomatorConfig) -> Automator {
        automator_with_tools(client, config, ToolRegistry::new())
    }

    fn automator_with_tools(
        client: Arc<dyn ModelClient>,
        config: AutomatorConfig,
        tools: ToolRegistry,
    ) -> Automator {
        let services = ExecutorServices {
            client,
            tools: Arc::new(tools),
            agents: Arc::new(AgentRegistry::new()),
            policy: Arc::new(SafetyPolicy::default()),
            approval_mode: ApprovalMode::Yolo,
        };
        let (event_tx, events) = mpsc::unbounded_channel();
        drop(events);
        let (confirmation_tx, confirmations) = mpsc::unbounded_channel();
        drop(confirmations);
        let executor = AgentExecutor::new(
            AgentDefinition::new("operator", "Runs tasks"),
            services,
            ExecutorConfig::default(),
            event_tx.clone(),
            confirmation_tx,
        );
        Automator::new(executor, config, event_tx)
    }

    fn status_tool() -> ToolRegistry {
        let tools = ToolRegistry::new();
        let vehicle = Tool::new("vehicle", "Vehicle operations")
            .with_method(
                ToolMethod::new("status", "Report status"),
                handler(|_| async { ToolResult::success("nominal") }),
            )
            .unwrap();
        tools.register(Arc::new(vehicle)).unwrap();
        tools
    }

    #[tokio::test]
    async fn zero_turn_budget_performs_no_turns() {
        let client = Arc::new(MockModelClient::new(vec![]));
        let mut automator = automator(
            client.clone(),
            AutomatorConfig {
                max_auto_turns: 0,
                ..AutomatorConfig::default()
            },
        );

        let result = automator.run("do nothing").await.unwrap();

        assert!(result.success);
        assert_eq!(result.turns, 0);
        assert!(result.history.is_empty());
        assert_eq!(client.calls_served(), 0);
    }

    #[tokio::test]
    async fn completes_when_the_run_makes_no_tool_calls() {
        let client = Arc::new(MockModelClient::new(vec![ScriptedTurn::text(
            "Nothing to do here.",
        )]));
        let mut automator = automator(client, AutomatorConfig::default());

        let result = automator.run("check in").await.unwrap();

        assert!(result.success);
        assert_eq!(result.turns, 1);
        assert_eq!(automator.state(), AutomatorState::Completed);
        assert_eq!(result.final_response, "Nothing to do here.");
    }

    #[tokio::test]
    async fn continues_with_synthesized_input_until_completion_phrase() {
        let client = Arc::new(MockModelClient::new(vec![
            // Turn 1: working, tool call, no question.
            ScriptedTurn::text("Working on it.").with_tool_call("vehicle.status", json!({})),
            ScriptedTurn::text("Still moving the fleet."),
        ]));
        let mut automator =
            automator_with_tools(client, AutomatorConfig::default(), status_tool());

        let result = automator.run("reposition the fleet").await.unwrap();

        assert!(result.success);
        // Turn 1 ends with tool calls made, turn 2 is the scripted default
        // "Task complete." reply with none.
        assert_eq!(result.turns, 2);
        assert_eq!(result.history[1].input, "continue");
        assert_eq!(result.total_tool_calls, 1);
    }

    #[tokio::test]
    async fn waits_for_operator_input_on_a_question() {
        let client = Arc::new(MockModelClient::new(vec![
            ScriptedTurn::text("Preparing.").with_tool_call("vehicle.status", json!({})),
            ScriptedTurn::text("Should I proceed with the landing?"),
        ]));
        let mut automator =
            automator_with_tools(client, AutomatorConfig::default(), status_tool());

        let handle = automator.handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(handle.provide_input("yes, land everything"));
        });

        let result = automator.run("land the fleet").await.unwrap();

        assert!(result.success);
        assert_eq!(result.turns, 2);
        assert_eq!(result.history[1].input, "yes, land everything");
        assert_eq!(automator.state(), AutomatorState::Completed);
    }

    #[tokio::test]
    async fn cancellation_stops_the_run() {
        let client = Arc::new(MockModelClient::new(vec![]));
        let mut automator = automator(client, AutomatorConfig::default());

        automator.handle().cancel();
        let result = automator.run("anything").await.unwrap();

        assert!(!result.success);
        assert_eq!(result.turns, 0);
        assert_eq!(automator.state(), AutomatorState::Cancelled);
    }

    #[tokio::test]
    async fn completion_checker_overrides_phrases() {
        let client = Arc::new(MockModelClient::new(vec![
            ScriptedTurn::text("Flying out.").with_tool_call("vehicle.status", json!({})),
            ScriptedTurn::text("Holding at waypoint alpha."),
        ]));
        let mut automator = automator_with_tools(
            client,
            AutomatorConfig {
                completion_checker: Some(Arc::new(|content: &str| content.contains("alpha"))),
                ..AutomatorConfig::default()
            },
            status_tool(),
        );

        let result = automator.run("fly to alpha").await.unwrap();

        assert!(result.success);
        assert_eq!(result.turns, 1);
    }

    #[tokio::test]
    async fn unsatisfied_checker_keeps_the_run_going_despite_phrases() {
        let client = Arc::new(MockModelClient::new(vec![ScriptedTurn::text(
            "Working.",
        )
        .with_tool_call("vehicle.status", json!({}))]));
        let mut automator = automator_with_tools(
            client,
            AutomatorConfig {
                completion_checker: Some(Arc::new(|content: &str| {
                    content.contains("mission wrapped")
                })),
                ..AutomatorConfig::default()
            },
            status_tool(),
        );

        let result = automator.run("survey the grid").await.unwrap();

        // Turn 1 ends with the scripted default "Task complete." text, but
        // the checker rejects it, so the run continues; turn 2 makes no
        // tool calls and completes on that ground alone.
        assert!(result.success);
        assert_eq!(result.turns, 2);
        assert_eq!(result.history[1].input, "continue");
    }

    #[tokio::test]
    async fn question_detection() {
        assert!(needs_user_input("Should I proceed?"));
        assert!(needs_user_input("please confirm the landing zone"));
        assert!(!needs_user_input("Landing now."));
    }
}
