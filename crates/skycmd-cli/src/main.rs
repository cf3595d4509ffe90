//! skycmd: run a fleet-coordination agent task from the command line.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use skycmd_core::agent::{
    AgentEvent, AgentExecutor, AgentRegistry, Automator, AutomatorConfig, ConfirmationOutcome,
    ConfirmationRequest, ExecutorConfig, ExecutorServices,
};
use skycmd_core::ai::{FallbackClient, MockModelClient, ModelClient, OpenAiClient};
use skycmd_core::config::Settings;
use skycmd_core::safety::{ApprovalMode, SafetyPolicy};
use skycmd_core::tools::{handler, Tool, ToolMethod, ToolRegistry, ToolResult};

#[derive(Debug, Parser)]
#[command(name = "skycmd", about = "Agent-driven UAV fleet command", version)]
struct Args {
    /// Task for the coordinator agent. Read from stdin when omitted.
    task: Option<String>,

    /// Config file path (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Approval mode override: yolo, normal, or strict.
    #[arg(long)]
    approval: Option<String>,

    /// Use the offline scripted model instead of a live endpoint.
    #[arg(long)]
    offline: bool,

    /// Automator turn budget override.
    #[arg(long)]
    max_turns: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    if let Some(mode) = &args.approval {
        settings.approval_mode = parse_approval(mode)?;
    }
    if let Some(turns) = args.max_turns {
        settings.automator.max_auto_turns = turns;
    }

    let task = match args.task {
        Some(task) => task,
        None => read_line("task> ").await?,
    };

    let client = build_client(&settings, args.offline)?;
    let services = ExecutorServices {
        client,
        tools: Arc::new(demo_tools()?),
        agents: Arc::new(AgentRegistry::with_builtins()),
        policy: Arc::new(SafetyPolicy::with_limits(settings.safety.clone())),
        approval_mode: settings.approval_mode,
    };

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (confirmation_tx, confirmation_rx) = mpsc::unbounded_channel();
    tokio::spawn(print_events(event_rx));
    tokio::spawn(answer_confirmations(confirmation_rx));

    let coordinator = services
        .agents
        .get("coordinator")
        .ok_or_else(|| anyhow!("coordinator agent is not registered"))?;
    let executor = AgentExecutor::new(
        coordinator,
        services,
        ExecutorConfig {
            scheduler: (&settings.scheduler).into(),
            context: (&settings.context).into(),
            ..ExecutorConfig::default()
        },
        event_tx.clone(),
        confirmation_tx,
    );

    let automator_config: AutomatorConfig = (&settings.automator).into();
    let mut automator = Automator::new(executor, automator_config, event_tx);

    let handle = automator.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            handle.cancel();
        }
    });

    let result = automator.run(&task).await?;

    println!();
    println!("{}", result.final_response);
    println!(
        "[{} | {} turn(s), {} tool call(s), {:.1}s]",
        if result.success { "done" } else { "failed" },
        result.turns,
        result.total_tool_calls,
        result.duration.as_secs_f64(),
    );
    if let Some(error) = &result.error {
        eprintln!("error: {error}");
    }

    std::process::exit(if result.success { 0 } else { 1 });
}

fn parse_approval(mode: &str) -> Result<ApprovalMode> {
    match mode {
        "yolo" => Ok(ApprovalMode::Yolo),
        "normal" => Ok(ApprovalMode::Normal),
        "strict" => Ok(ApprovalMode::Strict),
        other => Err(anyhow!("unknown approval mode '{other}'")),
    }
}

fn build_client(settings: &Settings, offline: bool) -> Result<Arc<dyn ModelClient>> {
    if offline {
        return Ok(Arc::new(MockModelClient::new(vec![])));
    }
    let Ok(api_key) = std::env::var(&settings.model.api_key_env) else {
        warn!(
            env = %settings.model.api_key_env,
            "API key not set, falling back to the offline model"
        );
        return Ok(Arc::new(MockModelClient::new(vec![])));
    };

    let primary: Arc<dyn ModelClient> = Arc::new(OpenAiClient::new(
        &settings.model.api_url,
        &api_key,
        &settings.model.model,
        settings.model.max_tokens,
    ));
    match &settings.model.fallback_model {
        Some(fallback_model) => {
            let fallback = Arc::new(OpenAiClient::new(
                &settings.model.api_url,
                &api_key,
                fallback_model,
                settings.model.max_tokens,
            ));
            Ok(Arc::new(FallbackClient::new(primary, fallback)))
        }
        None => Ok(primary),
    }
}

/// Demo vehicle and fleet tools. The handlers acknowledge the request
/// without touching real hardware.
fn demo_tools() -> Result<ToolRegistry> {
    let registry = ToolRegistry::new();

    let vehicle = Tool::new("vehicle", "Single-vehicle operations")
        .with_method(
            ToolMethod::new("status", "Report a vehicle's status"),
            handler(|args| async move {
                let id = args
                    .get("vehicle_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("v1")
                    .to_string();
                ToolResult::success(format!(
                    "vehicle {id}: battery 87%, GPS lock, holding position"
                ))
            }),
        )?
        .with_method(
            ToolMethod::new("takeoff", "Arm and take off to an altitude")
                .with_parameters(
                    serde_json::json!({
                        "vehicle_id": {"type": "string"},
                        "altitude": {"type": "number", "description": "Target altitude in meters"},
                    }),
                    &["altitude"],
                )
                .dangerous(),
            handler(|args| async move {
                ToolResult::success(format!("takeoff acknowledged, climbing to {}m", args["altitude"]))
            }),
        )?
        .with_method(
            ToolMethod::new("goto", "Fly to a position").with_parameters(
                serde_json::json!({
                    "vehicle_id": {"type": "string"},
                    "lat": {"type": "number"},
                    "lon": {"type": "number"},
                    "alt": {"type": "number"},
                }),
                &["lat", "lon"],
            ),
            handler(|args| async move {
                ToolResult::success(format!(
                    "en route to ({}, {})",
                    args["lat"], args["lon"]
                ))
            }),
        )?
        .with_method(
            ToolMethod::new("land", "Land a vehicle"),
            handler(|_| async { ToolResult::success("landing sequence started") }),
        )?;
    registry.register(Arc::new(vehicle))?;

    let fleet = Tool::new("fleet", "Multi-vehicle operations")
        .with_method(
            ToolMethod::new("assemble", "Assemble the fleet into a formation")
                .with_parameters(
                    serde_json::json!({
                        "shape": {"type": "string", "description": "line, wedge, or circle"},
                    }),
                    &["shape"],
                )
                .dangerous(),
            handler(|args| async move {
                ToolResult::success(format!("assembling {} formation", args["shape"]))
            }),
        )?
        .with_method(
            ToolMethod::new("disperse", "Break formation and spread out").dangerous(),
            handler(|_| async { ToolResult::success("fleet dispersing") }),
        )?;
    registry.register(Arc::new(fleet))?;

    Ok(registry)
}

async fn print_events(mut events: mpsc::UnboundedReceiver<AgentEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::TextDelta { delta } => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            AgentEvent::Thought { description, .. } => {
                eprintln!("  [thinking] {description}");
            }
            AgentEvent::ToolCallUpdate { name, status, .. } => {
                eprintln!("  [tool] {name}: {status:?}");
            }
            AgentEvent::ToolResult { name, success, display, .. } => {
                let marker = if success { "ok" } else { "error" };
                eprintln!("  [tool] {name} {marker}: {display}");
            }
            AgentEvent::SubagentStarted { agent, task } => {
                eprintln!("  [{agent}] started: {task}");
            }
            AgentEvent::SubagentDelta { agent, delta } => {
                eprintln!("  [{agent}] {delta}");
            }
            AgentEvent::SubagentFinished { agent, success } => {
                eprintln!("  [{agent}] finished ({})", if success { "ok" } else { "failed" });
            }
            AgentEvent::Error { error } => {
                eprintln!("  [error] {error}");
            }
            _ => {}
        }
    }
}

/// Prompt the operator for each confirmation request.
async fn answer_confirmations(mut requests: mpsc::UnboundedReceiver<ConfirmationRequest>) {
    while let Some(request) = requests.recv().await {
        eprintln!(
            "\napproval required: {} ({:?} risk)\n  arguments: {}",
            request.tool_name, request.risk, request.arguments
        );
        let answer = match read_line("proceed? [y]es / [n]o / [a]lways: ").await {
            Ok(answer) => answer,
            Err(_) => String::new(),
        };
        let outcome = match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => ConfirmationOutcome::ProceedOnce,
            "a" | "always" => ConfirmationOutcome::ProceedAlwaysTool,
            _ => ConfirmationOutcome::Cancel,
        };
        request.respond(outcome);
    }
}

async fn read_line(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    let mut line = String::new();
    let mut reader = BufReader::new(tokio::io::stdin());
    reader.read_line(&mut line).await?;
    Ok(line.trim().to_string())
}
