//! Tool-call lifecycle scheduler.
//!
//! Takes a batch of model-requested tool calls and drives each through
//! `Scheduled -> (AwaitingApproval) -> Executing -> terminal`. Calls run
//! concurrently under a semaphore; approval is a one-shot handshake with
//! whoever listens on the confirmation channel; every call ends in exactly
//! one terminal state, so a batch of N requests always produces N results.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::events::{emit, AgentEvent, EventSink};
use crate::ai::types::ToolCallRequest;
use crate::safety::{Admission, ApprovalMode, RiskLevel, SafetyPolicy};
use crate::tools::ToolResult;

/// Lifecycle state of one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Scheduled,
    AwaitingApproval,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }
}

/// Operator's answer to a confirmation request.
#[derive(Debug, Clone)]
pub enum ConfirmationOutcome {
    /// Run this call as requested.
    ProceedOnce,
    /// Do not run this call.
    Cancel,
    /// Run this call and skip confirmation for this tool from now on.
    ProceedAlwaysTool,
    /// Run this call with a replacement argument map.
    Modify(Value),
}

/// A pending approval handed to the confirming party. Consumed by
/// [`ConfirmationRequest::respond`]; dropping it cancels the call.
#[derive(Debug)]
pub struct ConfirmationRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub risk: RiskLevel,
    responder: oneshot::Sender<ConfirmationOutcome>,
}

impl ConfirmationRequest {
    pub fn respond(self, outcome: ConfirmationOutcome) {
        let _ = self.responder.send(outcome);
    }
}

pub type ConfirmationSink = mpsc::UnboundedSender<ConfirmationRequest>;

/// One tool call moving through the lifecycle.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub request: ToolCallRequest,
    pub status: ToolCallStatus,
    pub result: Option<ToolResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ToolCall {
    fn new(request: ToolCallRequest) -> Self {
        Self {
            request,
            status: ToolCallStatus::Scheduled,
            result: None,
            started_at: None,
            completed_at: None,
        }
    }

    fn into_completed(self) -> CompletedToolCall {
        let duration_ms = match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        };
        let call_id = self.request.id.clone();
        let result = self.result.unwrap_or_else(|| {
            ToolResult::error("tool call ended without a result").for_call(call_id)
        });
        CompletedToolCall {
            request: self.request,
            result,
            duration_ms,
        }
    }
}

/// Terminal record returned to the executor.
#[derive(Debug, Clone)]
pub struct CompletedToolCall {
    pub request: ToolCallRequest,
    pub result: ToolResult,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Calls executing at once.
    pub max_concurrent: usize,
    /// Budget for one tool execution.
    pub execution_timeout: Duration,
    /// How long an approval may stay unanswered.
    pub confirmation_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            execution_timeout: Duration::from_secs(60),
            confirmation_timeout: Duration::from_secs(300),
        }
    }
}

/// Where admitted calls actually run. The executor's implementation
/// resolves sub-agents first, then registered tools.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(&self, name: &str, args: Value, cancel: CancellationToken) -> ToolResult;
}

pub struct ToolScheduler {
    config: SchedulerConfig,
    policy: Arc<SafetyPolicy>,
    approval_mode: ApprovalMode,
    dispatcher: Arc<dyn ToolDispatcher>,
    event_tx: EventSink,
    confirmation_tx: ConfirmationSink,
    semaphore: Arc<Semaphore>,
    always_approved: Mutex<HashSet<String>>,
    statuses: Mutex<HashMap<String, ToolCallStatus>>,
    /// Token observed by calls currently in flight. `cancel_all` fires and
    /// replaces it, so only calls pending at that moment are cancelled.
    abort: Mutex<CancellationToken>,
    abort_reason: Mutex<Option<String>>,
}

impl ToolScheduler {
    pub fn new(
        config: SchedulerConfig,
        policy: Arc<SafetyPolicy>,
        approval_mode: ApprovalMode,
        dispatcher: Arc<dyn ToolDispatcher>,
        event_tx: EventSink,
        confirmation_tx: ConfirmationSink,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            policy,
            approval_mode,
            dispatcher,
            event_tx,
            confirmation_tx,
            semaphore,
            always_approved: Mutex::new(HashSet::new()),
            statuses: Mutex::new(HashMap::new()),
            abort: Mutex::new(CancellationToken::new()),
            abort_reason: Mutex::new(None),
        }
    }

    /// Drive a batch of requests to completion. Always returns one
    /// completed call per request, ordered by completion, and emits
    /// `BatchComplete` exactly once.
    pub async fn schedule(
        &self,
        requests: Vec<ToolCallRequest>,
        cancel: &CancellationToken,
    ) -> Vec<CompletedToolCall> {
        if requests.is_empty() {
            return Vec::new();
        }
        debug!(count = requests.len(), "scheduling tool call batch");

        let mut in_flight: FuturesUnordered<_> = requests
            .into_iter()
            .map(|r| self.run_call(r, cancel))
            .collect();

        let mut completed = Vec::with_capacity(in_flight.len());
        while let Some(call) = in_flight.next().await {
            self.statuses.lock().remove(&call.request.id);
            completed.push(call.into_completed());
        }

        emit(
            &self.event_tx,
            AgentEvent::BatchComplete {
                completed: completed.len(),
            },
        );
        completed
    }

    /// Calls currently in a non-terminal state.
    pub fn pending_count(&self) -> usize {
        self.statuses
            .lock()
            .values()
            .filter(|s| !s.is_terminal())
            .count()
    }

    pub fn is_idle(&self) -> bool {
        self.pending_count() == 0
    }

    /// Cancel every call not yet executing. Executing calls run to
    /// completion; scheduled and awaiting-approval calls end `Cancelled`
    /// with `reason`. Batches scheduled afterwards are unaffected.
    pub fn cancel_all(&self, reason: &str) {
        *self.abort_reason.lock() = Some(reason.to_string());
        let pending = std::mem::replace(&mut *self.abort.lock(), CancellationToken::new());
        pending.cancel();
    }

    fn abort_reason(&self) -> String {
        self.abort_reason
            .lock()
            .clone()
            .unwrap_or_else(|| "cancelled".to_string())
    }

    async fn run_call(&self, request: ToolCallRequest, cancel: &CancellationToken) -> ToolCall {
        // Snapshot the abort token so a cancel_all during this call is
        // honored while later batches start with a fresh one.
        let abort = self.abort.lock().clone();
        let mut call = ToolCall::new(request);
        self.set_status(&mut call, ToolCallStatus::Scheduled);

        if cancel.is_cancelled() {
            self.finish_cancelled(&mut call, "cancelled before start");
            return call;
        }
        if abort.is_cancelled() {
            let reason = self.abort_reason();
            self.finish_cancelled(&mut call, &reason);
            return call;
        }

        let (admission, reason) = self
            .policy
            .validate_operation(&call.request.name, &call.request.arguments);
        if admission == Admission::Deny {
            warn!(tool = %call.request.name, %reason, "tool call denied by safety policy");
            self.finish_error(&mut call, &reason);
            return call;
        }

        if self.should_confirm(&call.request.name, admission == Admission::Confirm)
            && !self.handle_confirmation(&mut call, cancel, &abort).await
        {
            return call;
        }

        self.execute(&mut call, cancel, &abort).await;
        call
    }

    fn should_confirm(&self, name: &str, flagged: bool) -> bool {
        match self.approval_mode {
            ApprovalMode::Yolo => false,
            _ if self.always_approved.lock().contains(name) => false,
            ApprovalMode::Strict => true,
            ApprovalMode::Normal => {
                flagged || self.policy.requires_confirmation(name, ApprovalMode::Normal)
            }
        }
    }

    /// Run the approval handshake. Returns true when the call may proceed.
    async fn handle_confirmation(
        &self,
        call: &mut ToolCall,
        cancel: &CancellationToken,
        abort: &CancellationToken,
    ) -> bool {
        self.set_status(call, ToolCallStatus::AwaitingApproval);
        let risk = self.policy.risk_level(&call.request.name);
        emit(
            &self.event_tx,
            AgentEvent::ApprovalRequired {
                id: call.request.id.clone(),
                name: call.request.name.clone(),
                arguments: call.request.arguments.clone(),
                risk,
            },
        );

        let (responder, response) = oneshot::channel();
        let request = ConfirmationRequest {
            call_id: call.request.id.clone(),
            tool_name: call.request.name.clone(),
            arguments: call.request.arguments.clone(),
            risk,
            responder,
        };
        if self.confirmation_tx.send(request).is_err() {
            self.finish_cancelled(call, "no confirmation handler attached");
            return false;
        }

        let outcome = tokio::select! {
            outcome = response => outcome,
            () = tokio::time::sleep(self.config.confirmation_timeout) => {
                self.finish_cancelled(
                    call,
                    &format!(
                        "confirmation timed out after {}s",
                        self.config.confirmation_timeout.as_secs()
                    ),
                );
                return false;
            }
            () = cancel.cancelled() => {
                self.finish_cancelled(call, "cancelled while awaiting approval");
                return false;
            }
            () = abort.cancelled() => {
                let reason = self.abort_reason();
                self.finish_cancelled(call, &reason);
                return false;
            }
        };

        match outcome {
            Ok(ConfirmationOutcome::ProceedOnce) => true,
            Ok(ConfirmationOutcome::ProceedAlwaysTool) => {
                self.always_approved
                    .lock()
                    .insert(call.request.name.clone());
                true
            }
            Ok(ConfirmationOutcome::Modify(arguments)) => {
                call.request.arguments = arguments;
                true
            }
            Ok(ConfirmationOutcome::Cancel) => {
                self.finish_cancelled(call, "user cancelled the operation");
                false
            }
            Err(_) => {
                self.finish_cancelled(call, "confirmation request was dropped");
                false
            }
        }
    }

    async fn execute(
        &self,
        call: &mut ToolCall,
        cancel: &CancellationToken,
        abort: &CancellationToken,
    ) {
        let _permit = tokio::select! {
            permit = self.semaphore.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.finish_error(call, "scheduler is shut down");
                    return;
                }
            },
            () = cancel.cancelled() => {
                self.finish_cancelled(call, "cancelled while queued");
                return;
            }
            () = abort.cancelled() => {
                let reason = self.abort_reason();
                self.finish_cancelled(call, &reason);
                return;
            }
        };

        self.set_status(call, ToolCallStatus::Executing);
        call.started_at = Some(Utc::now());

        let dispatch = self.dispatcher.dispatch(
            &call.request.name,
            call.request.arguments.clone(),
            cancel.clone(),
        );
        match tokio::time::timeout(self.config.execution_timeout, dispatch).await {
            Ok(result) => {
                let result = result.for_call(&call.request.id);
                let status = if result.success {
                    ToolCallStatus::Success
                } else {
                    ToolCallStatus::Error
                };
                call.result = Some(result);
                call.completed_at = Some(Utc::now());
                self.set_status(call, status);
            }
            Err(_) => {
                let message = format!(
                    "tool execution timed out after {}s",
                    self.config.execution_timeout.as_secs()
                );
                warn!(tool = %call.request.name, "{message}");
                call.result = Some(ToolResult::error(&message).for_call(&call.request.id));
                call.completed_at = Some(Utc::now());
                self.set_status(call, ToolCallStatus::Error);
            }
        }
        self.emit_result(call);
    }

    fn finish_cancelled(&self, call: &mut ToolCall, reason: &str) {
        call.result = Some(ToolResult::error(reason).for_call(&call.request.id));
        call.completed_at = Some(Utc::now());
        self.set_status(call, ToolCallStatus::Cancelled);
        self.emit_result(call);
    }

    fn finish_error(&self, call: &mut ToolCall, reason: &str) {
        call.result = Some(ToolResult::error(reason).for_call(&call.request.id));
        call.completed_at = Some(Utc::now());
        self.set_status(call, ToolCallStatus::Error);
        self.emit_result(call);
    }

    fn set_status(&self, call: &mut ToolCall, status: ToolCallStatus) {
        call.status = status;
        self.statuses
            .lock()
            .insert(call.request.id.clone(), status);
        emit(
            &self.event_tx,
            AgentEvent::ToolCallUpdate {
                id: call.request.id.clone(),
                name: call.request.name.clone(),
                status,
            },
        );
    }

    fn emit_result(&self, call: &ToolCall) {
        if let Some(result) = &call.result {
            let mut display = result.display_text().to_string();
            if display.chars().count() > 200 {
                display = display.chars().take(200).collect();
                display.push_str("...");
            }
            emit(
                &self.event_tx,
                AgentEvent::ToolResult {
                    id: call.request.id.clone(),
                    name: call.request.name.clone(),
                    success: result.success,
                    display,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Dispatcher that records concurrency and echoes its arguments.
    struct TestDispatcher {
        delay: Duration,
        active: AtomicUsize,
        peak: AtomicUsize,
        dispatched: AtomicUsize,
    }

    impl TestDispatcher {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                dispatched: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ToolDispatcher for TestDispatcher {
        async fn dispatch(
            &self,
            name: &str,
            args: Value,
            _cancel: CancellationToken,
        ) -> ToolResult {
            self.dispatched.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = if name.ends_with(".slow") {
                self.delay + Duration::from_millis(50)
            } else {
                self.delay
            };
            tokio::time::sleep(delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if name.ends_with(".fail") {
                ToolResult::error("simulated failure")
            } else {
                ToolResult::success(format!("{name} ran with {args}"))
            }
        }
    }

    struct Harness {
        scheduler: ToolScheduler,
        events: UnboundedReceiver<AgentEvent>,
        confirmations: UnboundedReceiver<ConfirmationRequest>,
    }

    fn harness(
        config: SchedulerConfig,
        policy: SafetyPolicy,
        mode: ApprovalMode,
        dispatcher: Arc<dyn ToolDispatcher>,
    ) -> Harness {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (confirmation_tx, confirmations) = mpsc::unbounded_channel();
        let scheduler = ToolScheduler::new(
            config,
            Arc::new(policy),
            mode,
            dispatcher,
            event_tx,
            confirmation_tx,
        );
        Harness {
            scheduler,
            events,
            confirmations,
        }
    }

    fn requests(names: &[&str]) -> Vec<ToolCallRequest> {
        names
            .iter()
            .map(|name| ToolCallRequest::new(*name, json!({})))
            .collect()
    }

    fn drain_events(rx: &mut UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn batch_produces_one_result_per_request() {
        let dispatcher = TestDispatcher::new(Duration::from_millis(5));
        let mut h = harness(
            SchedulerConfig::default(),
            SafetyPolicy::default(),
            ApprovalMode::Yolo,
            dispatcher,
        );

        let batch = requests(&["task.ok", "task.fail", "task.ok"]);
        let completed = h
            .scheduler
            .schedule(batch, &CancellationToken::new())
            .await;

        assert_eq!(completed.len(), 3);
        assert_eq!(completed.iter().filter(|c| c.result.success).count(), 2);
        let failed = completed
            .iter()
            .find(|c| c.request.name == "task.fail")
            .unwrap();
        assert!(!failed.result.success);
        assert!(completed.iter().all(|c| !c.result.call_id.is_empty()));
        assert!(h.scheduler.is_idle());

        let batch_events: Vec<_> = drain_events(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, AgentEvent::BatchComplete { .. }))
            .collect();
        assert_eq!(batch_events.len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let dispatcher = TestDispatcher::new(Duration::ZERO);
        let mut h = harness(
            SchedulerConfig::default(),
            SafetyPolicy::default(),
            ApprovalMode::Yolo,
            dispatcher,
        );
        let completed = h
            .scheduler
            .schedule(Vec::new(), &CancellationToken::new())
            .await;
        assert!(completed.is_empty());
        assert!(drain_events(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn concurrency_stays_under_the_limit() {
        let dispatcher = TestDispatcher::new(Duration::from_millis(30));
        let h = harness(
            SchedulerConfig {
                max_concurrent: 2,
                ..SchedulerConfig::default()
            },
            SafetyPolicy::default(),
            ApprovalMode::Yolo,
            dispatcher.clone(),
        );

        let batch = requests(&["a.x", "b.x", "c.x", "d.x", "e.x", "f.x"]);
        let completed = h
            .scheduler
            .schedule(batch, &CancellationToken::new())
            .await;

        assert_eq!(completed.len(), 6);
        assert!(dispatcher.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn denied_operation_becomes_an_error_result() {
        let dispatcher = TestDispatcher::new(Duration::ZERO);
        let mut policy = SafetyPolicy::default();
        policy.deny_operation("fleet.disperse");
        let h = harness(
            SchedulerConfig::default(),
            policy,
            ApprovalMode::Yolo,
            dispatcher.clone(),
        );

        let completed = h
            .scheduler
            .schedule(requests(&["fleet.disperse"]), &CancellationToken::new())
            .await;

        assert_eq!(completed.len(), 1);
        assert!(!completed[0].result.success);
        assert!(completed[0]
            .result
            .error
            .as_deref()
            .unwrap()
            .contains("denied by policy"));
        assert_eq!(dispatcher.dispatched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn low_battery_denial_cites_threshold() {
        let dispatcher = TestDispatcher::new(Duration::ZERO);
        let h = harness(
            SchedulerConfig::default(),
            SafetyPolicy::default(),
            ApprovalMode::Yolo,
            dispatcher,
        );

        let request =
            ToolCallRequest::new("vehicle.takeoff", json!({"vehicle_id": "v1", "battery": 15.0}));
        let completed = h
            .scheduler
            .schedule(vec![request], &CancellationToken::new())
            .await;

        assert!(!completed[0].result.success);
        let error = completed[0].result.error.as_deref().unwrap();
        assert!(error.contains("15%"));
        assert!(error.contains("20%"));
    }

    #[tokio::test]
    async fn confirmation_proceed_once_runs_the_call() {
        let dispatcher = TestDispatcher::new(Duration::ZERO);
        let Harness {
            scheduler,
            mut events,
            mut confirmations,
        } = harness(
            SchedulerConfig::default(),
            SafetyPolicy::default(),
            ApprovalMode::Normal,
            dispatcher,
        );

        let approve = tokio::spawn(async move {
            let request = confirmations.recv().await.unwrap();
            assert_eq!(request.tool_name, "vehicle.arm");
            assert_eq!(request.risk, RiskLevel::High);
            request.respond(ConfirmationOutcome::ProceedOnce);
        });

        let completed = scheduler
            .schedule(requests(&["vehicle.arm"]), &CancellationToken::new())
            .await;
        approve.await.unwrap();

        assert!(completed[0].result.success);
        let events = drain_events(&mut events);
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::ApprovalRequired { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolCallUpdate { status: ToolCallStatus::AwaitingApproval, .. }
        )));
    }

    #[tokio::test]
    async fn confirmation_cancel_ends_the_call_cancelled() {
        let dispatcher = TestDispatcher::new(Duration::ZERO);
        let Harness {
            scheduler,
            mut events,
            mut confirmations,
        } = harness(
            SchedulerConfig::default(),
            SafetyPolicy::default(),
            ApprovalMode::Normal,
            dispatcher.clone(),
        );

        tokio::spawn(async move {
            let request = confirmations.recv().await.unwrap();
            request.respond(ConfirmationOutcome::Cancel);
        });

        let completed = scheduler
            .schedule(requests(&["vehicle.takeoff"]), &CancellationToken::new())
            .await;

        assert!(!completed[0].result.success);
        assert!(completed[0]
            .result
            .error
            .as_deref()
            .unwrap()
            .contains("cancelled"));
        assert_eq!(dispatcher.dispatched.load(Ordering::SeqCst), 0);
        let events = drain_events(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolCallUpdate { status: ToolCallStatus::Cancelled, .. }
        )));
    }

    #[tokio::test]
    async fn confirmation_modify_replaces_arguments() {
        let dispatcher = TestDispatcher::new(Duration::ZERO);
        let Harness {
            scheduler,
            events: _events,
            mut confirmations,
        } = harness(
            SchedulerConfig::default(),
            SafetyPolicy::default(),
            ApprovalMode::Normal,
            dispatcher,
        );

        tokio::spawn(async move {
            let request = confirmations.recv().await.unwrap();
            request.respond(ConfirmationOutcome::Modify(json!({"altitude": 50.0})));
        });

        let request = ToolCallRequest::new("vehicle.takeoff", json!({"altitude": 100.0}));
        let completed = scheduler
            .schedule(vec![request], &CancellationToken::new())
            .await;

        assert!(completed[0].result.success);
        assert!(completed[0].result.content.contains("50"));
        assert_eq!(completed[0].request.arguments["altitude"], 50.0);
    }

    #[tokio::test]
    async fn proceed_always_skips_later_confirmations() {
        let dispatcher = TestDispatcher::new(Duration::ZERO);
        let Harness {
            scheduler,
            events: _events,
            mut confirmations,
        } = harness(
            SchedulerConfig::default(),
            SafetyPolicy::default(),
            ApprovalMode::Normal,
            dispatcher,
        );

        let answered = tokio::spawn(async move {
            let request = confirmations.recv().await.unwrap();
            request.respond(ConfirmationOutcome::ProceedAlwaysTool);
            // A second request would mean the allowance was not recorded.
            tokio::time::timeout(Duration::from_millis(100), confirmations.recv())
                .await
                .is_err()
        });

        let cancel = CancellationToken::new();
        let first = scheduler
            .schedule(requests(&["vehicle.arm"]), &cancel)
            .await;
        let second = scheduler
            .schedule(requests(&["vehicle.arm"]), &cancel)
            .await;

        assert!(first[0].result.success);
        assert!(second[0].result.success);
        assert!(answered.await.unwrap());
    }

    #[tokio::test]
    async fn unanswered_confirmation_times_out() {
        let dispatcher = TestDispatcher::new(Duration::ZERO);
        let h = harness(
            SchedulerConfig {
                confirmation_timeout: Duration::from_millis(30),
                ..SchedulerConfig::default()
            },
            SafetyPolicy::default(),
            ApprovalMode::Normal,
            dispatcher,
        );

        // Keep the receiver alive but never answer.
        let _confirmations = h.confirmations;
        let completed = h
            .scheduler
            .schedule(requests(&["vehicle.arm"]), &CancellationToken::new())
            .await;

        assert!(!completed[0].result.success);
        assert!(completed[0]
            .result
            .error
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn execution_timeout_is_an_error_result() {
        let dispatcher = TestDispatcher::new(Duration::from_millis(200));
        let h = harness(
            SchedulerConfig {
                execution_timeout: Duration::from_millis(20),
                ..SchedulerConfig::default()
            },
            SafetyPolicy::default(),
            ApprovalMode::Yolo,
            dispatcher,
        );

        let completed = h
            .scheduler
            .schedule(requests(&["slow.op"]), &CancellationToken::new())
            .await;

        assert!(!completed[0].result.success);
        assert!(completed[0]
            .result
            .error
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn pre_cancelled_batch_never_dispatches() {
        let dispatcher = TestDispatcher::new(Duration::ZERO);
        let h = harness(
            SchedulerConfig::default(),
            SafetyPolicy::default(),
            ApprovalMode::Yolo,
            dispatcher.clone(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let completed = h
            .scheduler
            .schedule(requests(&["a.x", "b.x"]), &cancel)
            .await;

        assert_eq!(completed.len(), 2);
        assert!(completed.iter().all(|c| !c.result.success));
        assert_eq!(dispatcher.dispatched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_all_cancels_awaiting_approval() {
        let dispatcher = TestDispatcher::new(Duration::ZERO);
        let h = harness(
            SchedulerConfig::default(),
            SafetyPolicy::default(),
            ApprovalMode::Normal,
            dispatcher,
        );
        let scheduler = Arc::new(h.scheduler);
        let mut confirmations = h.confirmations;

        let canceller = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                // Wait until the call is parked on approval.
                let _request = confirmations.recv().await.unwrap();
                scheduler.cancel_all("operator abort");
            })
        };

        let completed = scheduler
            .schedule(requests(&["vehicle.arm"]), &CancellationToken::new())
            .await;
        canceller.await.unwrap();

        assert!(!completed[0].result.success);
        assert!(completed[0]
            .result
            .error
            .as_deref()
            .unwrap()
            .contains("operator abort"));
    }

    #[tokio::test]
    async fn scheduler_stays_usable_after_cancel_all() {
        let dispatcher = TestDispatcher::new(Duration::ZERO);
        let h = harness(
            SchedulerConfig::default(),
            SafetyPolicy::default(),
            ApprovalMode::Yolo,
            dispatcher.clone(),
        );

        h.scheduler.cancel_all("operator abort");

        let completed = h
            .scheduler
            .schedule(requests(&["vehicle.status"]), &CancellationToken::new())
            .await;

        assert_eq!(completed.len(), 1);
        assert!(completed[0].result.success);
        assert!(completed[0].result.error.is_none());
        assert_eq!(dispatcher.dispatched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn results_arrive_in_completion_order() {
        let dispatcher = TestDispatcher::new(Duration::from_millis(5));
        let h = harness(
            SchedulerConfig::default(),
            SafetyPolicy::default(),
            ApprovalMode::Yolo,
            dispatcher,
        );

        let completed = h
            .scheduler
            .schedule(requests(&["a.slow", "b.x"]), &CancellationToken::new())
            .await;

        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].request.name, "b.x");
        assert_eq!(completed[1].request.name, "a.slow");
    }
}
