//! Agent definitions and their registry.
//!
//! An [`AgentDefinition`] is a declarative description of an agent:
//! prompt, the tool/sub-agent names it may call, and its budgets. The
//! registry rejects self-referential and cyclic sub-agent graphs at
//! registration time, so dispatch never has to detect recursion.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::ai::types::ToolSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    Chat,
    ToolUse,
    Planning,
    Formation,
    Navigation,
    Search,
    Monitoring,
    MultiAgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    /// Names this agent may invoke: tools or other registered agents.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<AgentCapability>,
    /// Model override; `None` uses the runtime default.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_turns() -> usize {
    20
}

fn default_timeout_secs() -> u64 {
    300
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: String::new(),
            tools: Vec::new(),
            capabilities: Vec::new(),
            model: None,
            max_turns: default_max_turns(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[AgentCapability]) -> Self {
        self.capabilities = capabilities.to_vec();
        self
    }

    /// Schema under which this agent is offered to a parent model.
    pub fn to_tool_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: json!({
                "task": {
                    "type": "string",
                    "description": "The task for this agent to perform",
                },
                "context": {
                    "type": "object",
                    "description": "Optional key/value context for the task",
                },
            }),
            required: vec!["task".to_string()],
            dangerous: false,
            confirmation_required: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentRegistryError {
    #[error("agent '{0}' is already registered")]
    Duplicate(String),
    #[error("agent '{0}' lists itself as a sub-agent")]
    SelfReference(String),
    #[error("registering agent '{agent}' would create a sub-agent cycle through '{through}'")]
    Cycle { agent: String, through: String },
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentDefinition>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the builtin fleet agents.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for definition in builtin_agents() {
            // Builtins are acyclic by construction.
            let name = definition.name.clone();
            if let Err(err) = registry.register(definition) {
                unreachable!("builtin agent '{name}' failed to register: {err}");
            }
        }
        registry
    }

    pub fn register(&self, definition: AgentDefinition) -> Result<(), AgentRegistryError> {
        if definition.tools.iter().any(|t| *t == definition.name) {
            return Err(AgentRegistryError::SelfReference(definition.name));
        }

        let mut agents = self.agents.write();
        if agents.contains_key(&definition.name) {
            return Err(AgentRegistryError::Duplicate(definition.name));
        }

        // Walk the sub-agent graph the new definition would close.
        if let Some(through) = find_cycle(&agents, &definition) {
            return Err(AgentRegistryError::Cycle {
                agent: definition.name,
                through,
            });
        }

        info!(agent = %definition.name, "registered agent");
        agents.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<AgentDefinition> {
        self.agents.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Returns the name of an already-registered agent through which the
/// candidate's sub-agent references reach back to the candidate.
fn find_cycle(
    agents: &HashMap<String, AgentDefinition>,
    candidate: &AgentDefinition,
) -> Option<String> {
    let mut stack: Vec<&str> = candidate.tools.iter().map(String::as_str).collect();
    let mut visited: HashSet<&str> = HashSet::new();

    while let Some(name) = stack.pop() {
        if !visited.insert(name) {
            continue;
        }
        if let Some(definition) = agents.get(name) {
            for child in &definition.tools {
                if child == &candidate.name {
                    return Some(name.to_string());
                }
                stack.push(child);
            }
        }
    }
    None
}

/// The stock fleet agents: a coordinator and three specialists.
pub fn builtin_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition::new("formation", "Plans and executes multi-vehicle formations")
            .with_prompt(
                "You are a formation specialist. Plan formation geometry, assign \
                 slots to vehicles, and sequence the maneuvers needed to assemble, \
                 hold, and transform formations safely.",
            )
            .with_tools(&["fleet", "vehicle"])
            .with_capabilities(&[AgentCapability::Formation, AgentCapability::ToolUse]),
        AgentDefinition::new("navigation", "Plans routes and guides vehicles to targets")
            .with_prompt(
                "You are a navigation specialist. Plan efficient routes that respect \
                 altitude limits and geofenced areas, and guide vehicles to their \
                 targets step by step.",
            )
            .with_tools(&["vehicle"])
            .with_capabilities(&[AgentCapability::Navigation, AgentCapability::ToolUse]),
        AgentDefinition::new("search", "Runs area search patterns with one or more vehicles")
            .with_prompt(
                "You are a search specialist. Decompose an area into a coverage \
                 pattern, assign sectors to vehicles, and track progress until the \
                 area is fully covered.",
            )
            .with_tools(&["vehicle", "fleet"])
            .with_capabilities(&[AgentCapability::Search, AgentCapability::ToolUse]),
        AgentDefinition::new("coordinator", "Top-level mission coordinator")
            .with_prompt(
                "You are the mission coordinator for a UAV fleet. Break the \
                 operator's request into tasks, delegate to the formation, \
                 navigation, and search specialists when they fit better, and \
                 operate vehicles directly for simple actions. Confirm risky \
                 operations before proceeding and report progress clearly.",
            )
            .with_tools(&["formation", "navigation", "search", "vehicle", "fleet"])
            .with_capabilities(&[
                AgentCapability::Planning,
                AgentCapability::MultiAgent,
                AgentCapability::ToolUse,
            ]),
    ]
}
