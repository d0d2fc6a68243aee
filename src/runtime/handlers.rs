//! Default decision handlers.
//!
//! | event | decision |
//! |---|---|
//! | `WorkflowExecutionStarted` | schedule the initial activity with the execution input |
//! | `ActivityTaskCompleted` | schedule the next activity, or complete with `"success"` |
//! | `ActivityTaskFailed` | cancel, retry or fail according to the failure policy |
//! | `ActivityTaskTimedOut` | reschedule, except heartbeat timeouts |
//! | anything else | nothing |

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::dispatch::{DecisionContext, EventHandler, ScheduledActivity};
use crate::errors::DecisionError;
use crate::providers::DecisionTask;
use crate::{FailurePolicy, HeartbeatTimeoutAction, HistoryEvent, TimeoutType, TypeRef};

pub const SUCCESS_RESULT: &str = "success";

/// Decision issued for an activity failure under a given policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    CancelExecution,
    Reschedule,
    FailExecution,
}

pub fn failure_action(policy: FailurePolicy) -> FailureAction {
    match policy {
        FailurePolicy::Abort | FailurePolicy::Cancel => FailureAction::CancelExecution,
        FailurePolicy::Retry => FailureAction::Reschedule,
        FailurePolicy::Fail => FailureAction::FailExecution,
    }
}

/// What an activity's completion result says about the next step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionDirective {
    /// The result names the next activity explicitly.
    Chain(TypeRef),
    /// Use the descriptor's next activity, if any.
    Default,
    /// The result looks like JSON but does not parse.
    Malformed(String),
}

/// Reads a `next_activity` override out of a completion result.
///
/// Plain text results are opaque. Only a JSON object carrying a
/// `next_activity` with both `name` and `version` overrides the chain.
pub fn completion_directive(result: Option<&str>) -> CompletionDirective {
    let Some(raw) = result.map(str::trim).filter(|r| !r.is_empty()) else {
        return CompletionDirective::Default;
    };
    if !(raw.starts_with('{') || raw.starts_with('[')) {
        return CompletionDirective::Default;
    }
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return CompletionDirective::Malformed(e.to_string()),
    };
    let next = value.get("next_activity").and_then(|next| {
        let name = next.get("name")?.as_str()?;
        let version = next.get("version")?.as_str()?;
        Some(TypeRef::new(name, version))
    });
    match next {
        Some(next) => CompletionDirective::Chain(next),
        None => CompletionDirective::Default,
    }
}

/// Failure policy carried in a failure's details, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailsPolicy {
    Declared(FailurePolicy),
    /// No details, or details without a recognizable `failure_policy`.
    Absent,
    Malformed(String),
}

pub fn details_policy(details: Option<&str>) -> DetailsPolicy {
    let Some(raw) = details.map(str::trim).filter(|d| !d.is_empty()) else {
        return DetailsPolicy::Absent;
    };
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return DetailsPolicy::Malformed(e.to_string()),
    };
    match value
        .get("failure_policy")
        .and_then(Value::as_str)
        .and_then(|p| p.parse::<FailurePolicy>().ok())
    {
        Some(policy) => DetailsPolicy::Declared(policy),
        None => DetailsPolicy::Absent,
    }
}

fn correlation<'a>(event: &'a HistoryEvent, task: &DecisionTask) -> (&'a str, String, String) {
    (
        event.event_type.as_str(),
        task.execution().workflow_id.clone(),
        task.execution().run_id.clone(),
    )
}

/// Schedules the workflow's initial activity with the execution input.
pub struct WorkflowExecutionStartedHandler;

#[async_trait]
impl EventHandler for WorkflowExecutionStartedHandler {
    async fn process(
        &self,
        ctx: &DecisionContext,
        task: &mut DecisionTask,
        event: &HistoryEvent,
    ) -> Result<(), DecisionError> {
        let workflow = ctx.workflow();
        let initial = workflow
            .initial_activity()
            .ok_or_else(|| DecisionError::NoInitialActivity(workflow.type_ref().clone()))?;
        info!(
            target: "taskchain::runtime::handlers",
            workflow_id = %task.execution().workflow_id,
            run_id = %task.execution().run_id,
            activity = %initial,
            "scheduling initial activity"
        );
        task.schedule_activity_task(initial, event.input().map(str::to_owned))
            .await
    }
}

/// Chains to the next activity, or completes the execution.
pub struct ActivityTaskCompletedHandler;

#[async_trait]
impl EventHandler for ActivityTaskCompletedHandler {
    async fn process(
        &self,
        ctx: &DecisionContext,
        task: &mut DecisionTask,
        event: &HistoryEvent,
    ) -> Result<(), DecisionError> {
        let scheduled = ScheduledActivity::resolve(task, event)?;
        let next = match completion_directive(event.result()) {
            CompletionDirective::Chain(next) => Some(next),
            CompletionDirective::Default => ctx
                .activity(&scheduled.activity_type)
                .await?
                .next_activity()
                .cloned(),
            CompletionDirective::Malformed(error) => {
                warn!(
                    target: "taskchain::runtime::handlers",
                    workflow_id = %task.execution().workflow_id,
                    run_id = %task.execution().run_id,
                    activity = %scheduled.activity_type,
                    error = %error,
                    "malformed activity result"
                );
                return task
                    .fail_workflow_execution(
                        Some(format!("malformed result from activity {}", scheduled.activity_type)),
                        Some(error),
                    )
                    .await;
            }
        };

        match next {
            Some(next) => {
                info!(
                    target: "taskchain::runtime::handlers",
                    workflow_id = %task.execution().workflow_id,
                    run_id = %task.execution().run_id,
                    completed = %scheduled.activity_type,
                    next = %next,
                    "scheduling next activity"
                );
                task.schedule_activity_task(&next, scheduled.input).await
            }
            None => {
                info!(
                    target: "taskchain::runtime::handlers",
                    workflow_id = %task.execution().workflow_id,
                    run_id = %task.execution().run_id,
                    completed = %scheduled.activity_type,
                    "chain finished; completing workflow"
                );
                task.complete_workflow_execution(Some(SUCCESS_RESULT.to_string()))
                    .await
            }
        }
    }
}

/// Applies the failure policy: from the failure details when present,
/// otherwise from the activity descriptor.
pub struct ActivityTaskFailedHandler;

#[async_trait]
impl EventHandler for ActivityTaskFailedHandler {
    async fn process(
        &self,
        ctx: &DecisionContext,
        task: &mut DecisionTask,
        event: &HistoryEvent,
    ) -> Result<(), DecisionError> {
        let scheduled = ScheduledActivity::resolve(task, event)?;
        let policy = match details_policy(event.details()) {
            DetailsPolicy::Declared(policy) => policy,
            DetailsPolicy::Absent => ctx
                .activity(&scheduled.activity_type)
                .await?
                .failure_policy(),
            DetailsPolicy::Malformed(error) => {
                debug!(
                    target: "taskchain::runtime::handlers",
                    activity = %scheduled.activity_type,
                    error = %error,
                    "failure details are not JSON; failing workflow"
                );
                FailurePolicy::Fail
            }
        };
        let action = failure_action(policy);
        let (event_type, workflow_id, run_id) = correlation(event, task);
        warn!(
            target: "taskchain::runtime::handlers",
            %workflow_id,
            %run_id,
            event_type,
            activity = %scheduled.activity_type,
            reason = event.reason().unwrap_or_default(),
            failure_policy = %policy,
            action = ?action,
            "activity failed"
        );
        match action {
            FailureAction::CancelExecution => {
                task.cancel_workflow_execution(event.details().map(str::to_owned))
                    .await
            }
            FailureAction::Reschedule => {
                task.schedule_activity_task(&scheduled.activity_type, scheduled.input)
                    .await
            }
            FailureAction::FailExecution => {
                task.fail_workflow_execution(
                    event.reason().map(str::to_owned),
                    event.details().map(str::to_owned),
                )
                .await
            }
        }
    }
}

/// Reschedules timed out activities. A lost heartbeat fails (or cancels)
/// the execution instead.
pub struct ActivityTaskTimedOutHandler;

#[async_trait]
impl EventHandler for ActivityTaskTimedOutHandler {
    async fn process(
        &self,
        ctx: &DecisionContext,
        task: &mut DecisionTask,
        event: &HistoryEvent,
    ) -> Result<(), DecisionError> {
        let timeout_type = event.timeout_type();
        let (event_type, workflow_id, run_id) = correlation(event, task);
        warn!(
            target: "taskchain::runtime::handlers",
            %workflow_id,
            %run_id,
            event_type,
            timeout_type = timeout_type.map(|t| t.as_str()).unwrap_or("unknown"),
            "activity timed out"
        );
        match timeout_type {
            Some(TimeoutType::StartToClose | TimeoutType::ScheduleToStart | TimeoutType::ScheduleToClose) => {
                let scheduled = ScheduledActivity::resolve(task, event)?;
                task.schedule_activity_task(&scheduled.activity_type, scheduled.input)
                    .await
            }
            Some(TimeoutType::Heartbeat) => match ctx.workflow().heartbeat_timeout_action() {
                HeartbeatTimeoutAction::Fail => {
                    task.fail_workflow_execution(Some("activity heartbeat timed out".to_string()), None)
                        .await
                }
                HeartbeatTimeoutAction::Cancel => {
                    task.cancel_workflow_execution(Some("activity heartbeat timed out".to_string()))
                        .await
                }
            },
            None => {
                let raw = event
                    .attribute("timeoutType")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "missing".to_string());
                task.fail_workflow_execution(Some(format!("unrecognized activity timeout type {raw}")), None)
                    .await
            }
        }
    }
}

/// Fallback for event types without a decision.
pub struct NoopHandler;

#[async_trait]
impl EventHandler for NoopHandler {
    async fn process(
        &self,
        _ctx: &DecisionContext,
        _task: &mut DecisionTask,
        _event: &HistoryEvent,
    ) -> Result<(), DecisionError> {
        Ok(())
    }
}
