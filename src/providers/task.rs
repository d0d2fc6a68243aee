use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ActivityResponder, DecisionResponder, ProviderError, ProviderErrorKind};
use crate::errors::{ActivityError, DecisionError};
use crate::{Decision, HistoryEvent, TypeRef, WorkflowExecution};

/// A unit of decision work: one workflow execution's history plus a token
/// that can be used exactly once to respond.
pub struct DecisionTask {
    task_token: String,
    domain: String,
    execution: WorkflowExecution,
    workflow_type: TypeRef,
    events: Vec<HistoryEvent>,
    previous_started_event_id: u64,
    responder: Arc<dyn DecisionResponder>,
    responded: bool,
}

impl DecisionTask {
    pub fn new(
        task_token: impl Into<String>,
        domain: impl Into<String>,
        execution: WorkflowExecution,
        workflow_type: TypeRef,
        events: Vec<HistoryEvent>,
        previous_started_event_id: u64,
        responder: Arc<dyn DecisionResponder>,
    ) -> Self {
        Self {
            task_token: task_token.into(),
            domain: domain.into(),
            execution,
            workflow_type,
            events,
            previous_started_event_id,
            responder,
            responded: false,
        }
    }

    pub fn task_token(&self) -> &str {
        &self.task_token
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn execution(&self) -> &WorkflowExecution {
        &self.execution
    }

    pub fn workflow_type(&self) -> &TypeRef {
        &self.workflow_type
    }

    /// Full history, oldest first.
    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    pub fn previous_started_event_id(&self) -> u64 {
        self.previous_started_event_id
    }

    /// Events not yet seen by an earlier decision task, in delivery order.
    pub fn new_events(&self) -> &[HistoryEvent] {
        let start = self
            .events
            .iter()
            .position(|e| e.event_id > self.previous_started_event_id)
            .unwrap_or(self.events.len());
        &self.events[start..]
    }

    pub fn latest_event_id(&self) -> u64 {
        self.events.last().map(|e| e.event_id).unwrap_or(0)
    }

    /// Looks up the scheduling event that `event` refers to through its
    /// `scheduledEventId`, searching the most recent events first.
    pub fn scheduled_event(&self, event: &HistoryEvent) -> Result<&HistoryEvent, DecisionError> {
        let scheduled_event_id = event.scheduled_event_id().ok_or_else(|| DecisionError::MissingAttribute {
            event_id: event.event_id,
            event_type: event.event_type.clone(),
            attribute: "scheduledEventId",
        })?;
        self.events
            .iter()
            .rev()
            .find(|e| e.event_id == scheduled_event_id)
            .ok_or(DecisionError::ScheduledEventNotFound {
                event_id: event.event_id,
                scheduled_event_id,
            })
    }

    pub fn is_responded(&self) -> bool {
        self.responded
    }

    /// Sends `decisions` with this task's token. A second call fails without
    /// contacting the task source.
    pub async fn respond(&mut self, decisions: Vec<Decision>) -> Result<(), DecisionError> {
        if self.responded {
            return Err(DecisionError::AlreadyResponded(self.task_token.clone()));
        }
        self.responder
            .respond_decision_task_completed(&self.task_token, decisions)
            .await?;
        self.responded = true;
        Ok(())
    }

    pub async fn schedule_activity_task(&mut self, activity: &TypeRef, input: Option<String>) -> Result<(), DecisionError> {
        let activity_id = format!("{}-{}", activity.name, self.latest_event_id());
        self.respond(vec![Decision::ScheduleActivityTask {
            activity_type: activity.clone(),
            activity_id,
            input,
            task_list: None,
        }])
        .await
    }

    pub async fn complete_workflow_execution(&mut self, result: Option<String>) -> Result<(), DecisionError> {
        self.respond(vec![Decision::CompleteWorkflowExecution { result }]).await
    }

    pub async fn fail_workflow_execution(
        &mut self,
        reason: Option<String>,
        details: Option<String>,
    ) -> Result<(), DecisionError> {
        self.respond(vec![Decision::FailWorkflowExecution { reason, details }])
            .await
    }

    pub async fn cancel_workflow_execution(&mut self, details: Option<String>) -> Result<(), DecisionError> {
        self.respond(vec![Decision::CancelWorkflowExecution { details }]).await
    }
}

impl fmt::Debug for DecisionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionTask")
            .field("task_token", &self.task_token)
            .field("domain", &self.domain)
            .field("execution", &self.execution)
            .field("workflow_type", &self.workflow_type)
            .field("events", &self.events.len())
            .field("previous_started_event_id", &self.previous_started_event_id)
            .field("responded", &self.responded)
            .finish()
    }
}

/// A unit of activity work. Cheap to clone; all clones share the
/// responded flag so only the first completion or failure is sent.
#[derive(Clone)]
pub struct ActivityTask {
    inner: Arc<ActivityTaskInner>,
}

struct ActivityTaskInner {
    task_token: String,
    activity_id: String,
    activity_type: TypeRef,
    execution: WorkflowExecution,
    input: Option<String>,
    responder: Arc<dyn ActivityResponder>,
    responded: AtomicBool,
}

impl ActivityTask {
    pub fn new(
        task_token: impl Into<String>,
        activity_id: impl Into<String>,
        activity_type: TypeRef,
        execution: WorkflowExecution,
        input: Option<String>,
        responder: Arc<dyn ActivityResponder>,
    ) -> Self {
        Self {
            inner: Arc::new(ActivityTaskInner {
                task_token: task_token.into(),
                activity_id: activity_id.into(),
                activity_type,
                execution,
                input,
                responder,
                responded: AtomicBool::new(false),
            }),
        }
    }

    pub fn task_token(&self) -> &str {
        &self.inner.task_token
    }

    pub fn activity_id(&self) -> &str {
        &self.inner.activity_id
    }

    pub fn activity_type(&self) -> &TypeRef {
        &self.inner.activity_type
    }

    pub fn execution(&self) -> &WorkflowExecution {
        &self.inner.execution
    }

    pub fn input(&self) -> Option<&str> {
        self.inner.input.as_deref()
    }

    pub fn is_responded(&self) -> bool {
        self.inner.responded.load(Ordering::SeqCst)
    }

    pub async fn complete(&self, result: Option<String>) -> Result<(), ActivityError> {
        self.claim_response()?;
        let sent = self
            .inner
            .responder
            .respond_activity_task_completed(&self.inner.task_token, result)
            .await;
        self.settle(sent)
    }

    pub async fn fail(&self, reason: Option<String>, details: Option<String>) -> Result<(), ActivityError> {
        self.claim_response()?;
        let sent = self
            .inner
            .responder
            .respond_activity_task_failed(&self.inner.task_token, reason, details)
            .await;
        self.settle(sent)
    }

    fn claim_response(&self) -> Result<(), ActivityError> {
        self.inner
            .responded
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| ActivityError::AlreadyResponded(self.inner.task_token.clone()))
    }

    // A response that did not reach the source may be retried, unless the
    // source says the token was already used.
    fn settle(&self, sent: Result<(), ProviderError>) -> Result<(), ActivityError> {
        if let Err(e) = sent {
            if e.kind != ProviderErrorKind::AlreadyResponded {
                self.inner.responded.store(false, Ordering::SeqCst);
            }
            return Err(e.into());
        }
        Ok(())
    }
}

impl fmt::Debug for ActivityTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityTask")
            .field("task_token", &self.inner.task_token)
            .field("activity_id", &self.inner.activity_id)
            .field("activity_type", &self.inner.activity_type)
            .field("execution", &self.inner.execution)
            .field("responded", &self.is_responded())
            .finish()
    }
}
