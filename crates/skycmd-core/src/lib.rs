//! skycmd-core: agent orchestration runtime for UAV fleet command.
//!
//! The crate wires a model client into a multi-turn agent loop with a
//! safety-gated tool-call scheduler:
//!
//! - [`ai`]: model client trait, OpenAI-compatible backend, scripted mock
//! - [`agent`]: context, scheduler, executor, sub-agents, automator
//! - [`tools`]: declarative method-table tools and their registry
//! - [`safety`]: operational limits, geofencing, admission control
//! - [`config`]: TOML settings with full defaults

pub mod agent;
pub mod ai;
pub mod config;
pub mod safety;
pub mod tools;

pub use config::Settings;
