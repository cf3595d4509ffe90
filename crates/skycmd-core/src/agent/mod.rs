//! Agent runtime: context, scheduling, execution, and automation.

pub mod automator;
pub mod context;
pub mod events;
pub mod executor;
pub mod registry;
pub mod scheduler;
pub mod subagent;

pub use automator::{
    Automator, AutomatorConfig, AutomatorHandle, AutomatorResult, AutomatorState, TurnRecord,
};
pub use context::{Context, ContextConfig, Message, MessagePart, Summary};
pub use events::{emit, AgentEvent, EventSink};
pub use executor::{AgentExecutor, ExecutorConfig, ExecutorResult, ExecutorServices};
pub use registry::{
    builtin_agents, AgentCapability, AgentDefinition, AgentRegistry, AgentRegistryError,
};
pub use scheduler::{
    CompletedToolCall, ConfirmationOutcome, ConfirmationRequest, ConfirmationSink,
    SchedulerConfig, ToolCall, ToolCallStatus, ToolDispatcher, ToolScheduler,
};
pub use subagent::SubagentInvocation;
