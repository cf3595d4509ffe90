//! Agent executor: the multi-turn model/tool loop.
//!
//! One executor owns one conversation [`Context`] and one
//! [`ToolScheduler`]. Each turn sends the conversation to the model,
//! forwards streamed text to the event sink, schedules any requested tool
//! calls, folds their results back into the context, and continues until
//! the model stops calling tools or the turn budget runs out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::context::{Context, ContextConfig};
use crate::agent::events::{emit, AgentEvent, EventSink};
use crate::agent::registry::{AgentDefinition, AgentRegistry};
use crate::agent::scheduler::{
    ConfirmationSink, SchedulerConfig, ToolDispatcher, ToolScheduler,
};
use crate::agent::subagent::SubagentInvocation;
use crate::ai::client::ModelClient;
use crate::ai::types::{FinishReason, ModelMessage, ModelResponse, StreamEvent, ToolSchema, Usage};
use crate::safety::{ApprovalMode, SafetyPolicy};
use crate::tools::{ToolRegistry, ToolResult};

/// Nesting levels of sub-agent invocations permitted at dispatch time.
/// The agent registry already rejects cyclic definitions; this bounds
/// acyclic chains.
pub(crate) const MAX_SUBAGENT_DEPTH: usize = 3;

/// Shared services an executor needs. Cloning is cheap.
#[derive(Clone)]
pub struct ExecutorServices {
    pub client: Arc<dyn ModelClient>,
    pub tools: Arc<ToolRegistry>,
    pub agents: Arc<AgentRegistry>,
    pub policy: Arc<SafetyPolicy>,
    pub approval_mode: ApprovalMode,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_turns: usize,
    pub stream: bool,
    /// Continue into the next turn after tool results; `false` stops
    /// after the first batch.
    pub auto_continue: bool,
    pub scheduler: SchedulerConfig,
    pub context: ContextConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            stream: true,
            auto_continue: true,
            scheduler: SchedulerConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

/// Outcome of one executor run.
#[derive(Debug, Clone)]
pub struct ExecutorResult {
    pub success: bool,
    /// Last assistant text produced.
    pub content: String,
    /// Tool calls issued across all turns.
    pub tool_calls: usize,
    pub turns: usize,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Resolves tool-call names: sub-agents first, then registered tools.
struct AgentToolDispatcher {
    services: ExecutorServices,
    event_tx: EventSink,
    confirmation_tx: ConfirmationSink,
    depth: usize,
}

#[async_trait]
impl ToolDispatcher for AgentToolDispatcher {
    async fn dispatch(&self, name: &str, args: Value, cancel: CancellationToken) -> ToolResult {
        if let Some(definition) = self.services.agents.get(name) {
            if self.depth >= MAX_SUBAGENT_DEPTH {
                return ToolResult::error(format!(
                    "sub-agent nesting limit of {MAX_SUBAGENT_DEPTH} reached invoking '{name}'"
                ));
            }
            let Some(task) = args.get("task").and_then(Value::as_str) else {
                return ToolResult::error(format!("agent '{name}' requires a 'task' argument"));
            };
            let invocation = SubagentInvocation::new(
                definition,
                task.to_string(),
                args.get("context").cloned(),
                self.services.clone(),
                self.event_tx.clone(),
                self.confirmation_tx.clone(),
                self.depth + 1,
            );
            return invocation.execute(cancel).await;
        }

        match self.services.tools.execute(name, args).await {
            Some(result) => result,
            None => {
                warn!(tool = name, "call to unknown tool or agent");
                ToolResult::error(format!("unknown tool or agent '{name}'"))
            }
        }
    }
}

pub struct AgentExecutor {
    definition: AgentDefinition,
    config: ExecutorConfig,
    services: ExecutorServices,
    context: Context,
    scheduler: Arc<ToolScheduler>,
    event_tx: EventSink,
}

impl AgentExecutor {
    pub fn new(
        definition: AgentDefinition,
        services: ExecutorServices,
        config: ExecutorConfig,
        event_tx: EventSink,
        confirmation_tx: ConfirmationSink,
    ) -> Self {
        Self::with_depth(definition, services, config, event_tx, confirmation_tx, 0)
    }

    pub(crate) fn with_depth(
        definition: AgentDefinition,
        services: ExecutorServices,
        config: ExecutorConfig,
        event_tx: EventSink,
        confirmation_tx: ConfirmationSink,
        depth: usize,
    ) -> Self {
        let dispatcher = Arc::new(AgentToolDispatcher {
            services: services.clone(),
            event_tx: event_tx.clone(),
            confirmation_tx: confirmation_tx.clone(),
            depth,
        });
        let scheduler = Arc::new(ToolScheduler::new(
            config.scheduler.clone(),
            services.policy.clone(),
            services.approval_mode,
            dispatcher,
            event_tx.clone(),
            confirmation_tx,
        ));

        let mut context = Context::new(config.context.clone());
        if !definition.system_prompt.is_empty() {
            context.add_system_message(&definition.system_prompt);
        }

        Self {
            definition,
            config,
            services,
            context,
            scheduler,
            event_tx,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn scheduler(&self) -> &Arc<ToolScheduler> {
        &self.scheduler
    }

    /// Run the loop for one user input. Failures are folded into the
    /// result; this never panics on model or tool errors.
    pub async fn run(&mut self, user_input: &str, cancel: CancellationToken) -> ExecutorResult {
        let started = Instant::now();
        self.context.add_user_message(user_input);

        let mut turns = 0;
        let mut tool_calls = 0;
        let mut content = String::new();

        let outcome = self
            .run_loop(&cancel, &mut turns, &mut tool_calls, &mut content)
            .await;
        let duration = started.elapsed();

        match outcome {
            Ok(()) => ExecutorResult {
                success: true,
                content,
                tool_calls,
                turns,
                duration,
                error: None,
            },
            Err(err) => {
                warn!(agent = %self.definition.name, error = %err, "executor run failed");
                emit(
                    &self.event_tx,
                    AgentEvent::Error {
                        error: err.to_string(),
                    },
                );
                ExecutorResult {
                    success: false,
                    content,
                    tool_calls,
                    turns,
                    duration,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn run_loop(
        &mut self,
        cancel: &CancellationToken,
        turns: &mut usize,
        tool_calls: &mut usize,
        content: &mut String,
    ) -> Result<()> {
        let schemas = self.tool_schemas();

        while *turns < self.config.max_turns {
            // A set abort signal stops the loop; it is not a failure.
            if cancel.is_cancelled() {
                debug!(agent = %self.definition.name, "run cancelled, stopping loop");
                return Ok(());
            }
            *turns += 1;
            debug!(agent = %self.definition.name, turn = *turns, "starting turn");

            let messages = self.context.model_messages();
            let response = if self.config.stream {
                self.stream_turn(&messages, &schemas, cancel).await?
            } else {
                self.services.client.generate(&messages, &schemas).await?
            };

            if !response.content.is_empty() {
                *content = response.content.clone();
                self.context.add_assistant_message(&response.content);
            }

            if response.tool_calls.is_empty() {
                emit(
                    &self.event_tx,
                    AgentEvent::TurnComplete {
                        turn: *turns,
                        has_more: false,
                    },
                );
                return Ok(());
            }

            *tool_calls += response.tool_calls.len();
            // The batch comes back in completion order and the context
            // records results in that same order.
            let completed = self.scheduler.schedule(response.tool_calls, cancel).await;
            for call in &completed {
                self.context
                    .add_tool_message(&call.result.content, &call.result.call_id);
            }

            emit(
                &self.event_tx,
                AgentEvent::TurnComplete {
                    turn: *turns,
                    has_more: self.config.auto_continue,
                },
            );
            if !self.config.auto_continue {
                return Ok(());
            }
        }

        debug!(agent = %self.definition.name, "turn budget exhausted");
        Ok(())
    }

    async fn stream_turn(
        &self,
        messages: &[ModelMessage],
        schemas: &[ToolSchema],
        cancel: &CancellationToken,
    ) -> Result<ModelResponse> {
        let mut rx = self
            .services
            .client
            .generate_stream(messages, schemas, cancel.clone())
            .await?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut finish_reason = FinishReason::Stop;

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Content { delta } => {
                    emit(
                        &self.event_tx,
                        AgentEvent::TextDelta {
                            delta: delta.clone(),
                        },
                    );
                    content.push_str(&delta);
                }
                StreamEvent::ToolCall { request } => tool_calls.push(request),
                StreamEvent::Thought {
                    subject,
                    description,
                } => emit(
                    &self.event_tx,
                    AgentEvent::Thought {
                        subject,
                        description,
                    },
                ),
                StreamEvent::Finished {
                    finish_reason: reason,
                } => {
                    finish_reason = reason;
                    break;
                }
                StreamEvent::Error { message } => bail!("model stream failed: {message}"),
            }
        }

        Ok(ModelResponse {
            content,
            tool_calls,
            finish_reason,
            usage: Usage::default(),
        })
    }

    /// Schemas offered to the model: the definition's declared names,
    /// resolved against the agent registry first, then the tool registry.
    /// An empty declaration exposes every registered tool.
    fn tool_schemas(&self) -> Vec<ToolSchema> {
        if self.definition.tools.is_empty() {
            return self.services.tools.schemas_for_model();
        }

        let mut schemas = Vec::new();
        for name in &self.definition.tools {
            if let Some(agent) = self.services.agents.get(name) {
                schemas.push(agent.to_tool_schema());
            } else if let Some(tool) = self.services.tools.get(name) {
                schemas.extend(tool.schemas());
            } else {
                warn!(name = %name, agent = %self.definition.name, "declared tool is not registered");
            }
        }
        schemas
    }
}
