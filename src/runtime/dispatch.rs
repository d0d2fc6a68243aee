//! Event dispatch for decision tasks.
//!
//! Each workflow type owns an [`EventDispatcher`]: a table from event type to
//! handler, with the no-op handler as the fallback. Dispatching a decision
//! task walks its new events in delivery order and hands each one to its
//! handler until one of them responds.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::handlers::{
    ActivityTaskCompletedHandler, ActivityTaskFailedHandler, ActivityTaskTimedOutHandler, NoopHandler,
    WorkflowExecutionStartedHandler,
};
use super::registry::{ActivityType, Registry, WorkflowType};
use crate::errors::DecisionError;
use crate::providers::DecisionTask;
use crate::{EventType, HistoryEvent, TypeRef};

/// Reacts to one history event, usually by responding to the decision task.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn process(&self, ctx: &DecisionContext, task: &mut DecisionTask, event: &HistoryEvent)
    -> Result<(), DecisionError>;
}

/// What a handler can see besides the task: the workflow type being decided
/// and the registry used to resolve activity descriptors.
pub struct DecisionContext {
    registry: Registry,
    workflow: Arc<WorkflowType>,
}

impl DecisionContext {
    pub fn new(registry: Registry, workflow: Arc<WorkflowType>) -> Self {
        Self { registry, workflow }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn workflow(&self) -> &Arc<WorkflowType> {
        &self.workflow
    }

    /// Resolves an activity in the workflow's domain, falling back to the
    /// metadata store for activities declared elsewhere.
    pub async fn activity(&self, activity: &TypeRef) -> Result<Arc<ActivityType>, DecisionError> {
        Ok(self
            .registry
            .activity(self.workflow.domain(), activity)
            .await?)
    }
}

/// Activity type and input recorded on the scheduling event that a
/// completion, failure or timeout refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledActivity {
    pub activity_type: TypeRef,
    pub input: Option<String>,
}

impl ScheduledActivity {
    pub fn resolve(task: &DecisionTask, event: &HistoryEvent) -> Result<Self, DecisionError> {
        let scheduled = task.scheduled_event(event)?;
        let activity_type = scheduled
            .activity_type()
            .ok_or_else(|| DecisionError::MissingAttribute {
                event_id: scheduled.event_id,
                event_type: scheduled.event_type.clone(),
                attribute: "activityType",
            })?;
        Ok(Self {
            activity_type,
            input: scheduled.input().map(str::to_owned),
        })
    }
}

#[derive(Clone)]
pub struct EventDispatcher {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
    fallback: Arc<dyn EventHandler>,
}

impl EventDispatcher {
    /// The four decision handlers plus the no-op fallback.
    pub fn with_defaults() -> Self {
        let mut handlers: HashMap<EventType, Arc<dyn EventHandler>> = HashMap::new();
        handlers.insert(EventType::WorkflowExecutionStarted, Arc::new(WorkflowExecutionStartedHandler));
        handlers.insert(EventType::ActivityTaskCompleted, Arc::new(ActivityTaskCompletedHandler));
        handlers.insert(EventType::ActivityTaskFailed, Arc::new(ActivityTaskFailedHandler));
        handlers.insert(EventType::ActivityTaskTimedOut, Arc::new(ActivityTaskTimedOutHandler));
        Self {
            handlers,
            fallback: Arc::new(NoopHandler),
        }
    }

    pub fn set_handler(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type, handler);
    }

    pub fn handler_for(&self, event_type: &EventType) -> Arc<dyn EventHandler> {
        self.handlers
            .get(event_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Processes the task's new events in order. Events after the first one
    /// that produced a response are skipped: a task can be answered only once.
    pub async fn dispatch(&self, ctx: &DecisionContext, task: &mut DecisionTask) -> Result<(), DecisionError> {
        let events = task.new_events().to_vec();
        for event in &events {
            if task.is_responded() {
                if self.handlers.contains_key(&event.kind()) {
                    warn!(
                        target: "taskchain::runtime::dispatch",
                        workflow_id = %task.execution().workflow_id,
                        run_id = %task.execution().run_id,
                        event_id = event.event_id,
                        event_type = %event.event_type,
                        "decision already sent; event left unhandled"
                    );
                }
                continue;
            }
            debug!(
                target: "taskchain::runtime::dispatch",
                workflow_id = %task.execution().workflow_id,
                run_id = %task.execution().run_id,
                event_id = event.event_id,
                event_type = %event.event_type,
                "dispatching event"
            );
            self.handler_for(&event.kind()).process(ctx, task, event).await?;
        }
        if !task.is_responded() {
            debug!(
                target: "taskchain::runtime::dispatch",
                workflow_id = %task.execution().workflow_id,
                run_id = %task.execution().run_id,
                new_events = events.len(),
                "no decision produced"
            );
        }
        Ok(())
    }
}
