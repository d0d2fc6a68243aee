use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{
    ActivityResponder, ActivityTask, DecisionResponder, DecisionTask, DomainDescription, MetadataRecord, MetadataStore,
    ProviderError, ProviderErrorKind, TaskSource,
};
use crate::{
    ActivityOptions, Attributes, Decision, HistoryEvent, TimeoutType, TypeRef, WorkflowExecution, WorkflowOptions,
};

/// Lifecycle of a simulated workflow execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Open,
    Completed { result: Option<String> },
    Failed { reason: Option<String>, details: Option<String> },
    Canceled { details: Option<String> },
}

/// Single-process task source that keeps histories and queues in memory.
///
/// It follows the service's task semantics closely enough to drive the
/// runtime end to end: a decision task is scheduled whenever a decision-worthy
/// event is appended, at most one decision task per execution is outstanding,
/// and activity tasks are leased by token until completed, failed or timed out.
#[derive(Clone, Default)]
pub struct InMemoryTaskSource {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    decision_ready: Notify,
    activity_ready: Notify,
}

#[derive(Default)]
struct State {
    domains: HashMap<String, DomainDescription>,
    workflow_types: HashMap<(String, TypeRef), WorkflowOptions>,
    activity_types: HashMap<(String, TypeRef), ActivityOptions>,
    executions: HashMap<String, Execution>,
    decision_queue: VecDeque<String>,
    activity_queue: VecDeque<PendingActivity>,
    // Leased tasks are invisible to pollers until responded: token -> run id / activity.
    leased_decisions: HashMap<String, String>,
    leased_activities: HashMap<String, PendingActivity>,
    next_token: u64,
    next_run: u64,
    injected_registration_error: Option<ProviderError>,
    injected_poll_errors: VecDeque<ProviderError>,
    injected_response_errors: VecDeque<ProviderError>,
}

struct Execution {
    domain: String,
    execution: WorkflowExecution,
    workflow_type: TypeRef,
    task_list: String,
    history: Vec<HistoryEvent>,
    previous_started_event_id: u64,
    decision_outstanding: bool,
    decision_needed: bool,
    decisions: Vec<Decision>,
    status: ExecutionStatus,
}

#[derive(Clone)]
struct PendingActivity {
    domain: String,
    task_list: String,
    run_id: String,
    scheduled_event_id: u64,
    activity_id: String,
    activity_type: TypeRef,
    input: Option<String>,
}

fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        _ => Attributes::new(),
    }
}

impl Execution {
    fn append(&mut self, event_type: &str, attributes: Value) -> u64 {
        let event_id = self.history.len() as u64 + 1;
        self.history
            .push(HistoryEvent::new(event_id, event_type, attrs(attributes)));
        event_id
    }

    fn is_open(&self) -> bool {
        self.status == ExecutionStatus::Open
    }
}

impl State {
    fn token(&mut self, prefix: &str) -> String {
        self.next_token += 1;
        format!("{prefix}-{}", self.next_token)
    }

    // Returns true when a new decision task was queued.
    fn schedule_decision(&mut self, run_id: &str) -> bool {
        let Some(exec) = self.executions.get_mut(run_id) else {
            return false;
        };
        if !exec.is_open() {
            return false;
        }
        if exec.decision_outstanding {
            exec.decision_needed = true;
            return false;
        }
        let task_list = exec.task_list.clone();
        exec.append("DecisionTaskScheduled", json!({"taskList": {"name": task_list}}));
        exec.decision_outstanding = true;
        self.decision_queue.push_back(run_id.to_string());
        true
    }

    fn take_decision(&mut self, domain: &str, task_list: &str) -> Option<(String, String)> {
        let position = self.decision_queue.iter().position(|run_id| {
            self.executions
                .get(run_id)
                .is_some_and(|e| e.domain == domain && e.task_list == task_list)
        })?;
        let run_id = self.decision_queue.remove(position)?;
        let token = self.token("decision");
        self.leased_decisions.insert(token.clone(), run_id.clone());
        Some((token, run_id))
    }

    fn take_activity(&mut self, domain: &str, task_list: &str) -> Option<(String, PendingActivity)> {
        let position = self
            .activity_queue
            .iter()
            .position(|a| a.domain == domain && a.task_list == task_list)?;
        let pending = self.activity_queue.remove(position)?;
        let token = self.token("activity");
        self.leased_activities.insert(token.clone(), pending.clone());
        Some((token, pending))
    }

    fn apply_decision(&mut self, run_id: &str, decision: Decision) -> bool {
        let mut activity_queued = false;
        let mut redecide = false;
        let activity_defaults = match &decision {
            Decision::ScheduleActivityTask { activity_type, .. } => self
                .executions
                .get(run_id)
                .and_then(|e| self.activity_types.get(&(e.domain.clone(), activity_type.clone())))
                .map(|o| o.default_task_list.clone()),
            _ => None,
        };
        let Some(exec) = self.executions.get_mut(run_id) else {
            return false;
        };
        exec.decisions.push(decision.clone());
        match decision {
            Decision::ScheduleActivityTask {
                activity_type,
                activity_id,
                input,
                task_list,
            } => match task_list.or(activity_defaults) {
                Some(task_list) => {
                    let scheduled_event_id = exec.append(
                        "ActivityTaskScheduled",
                        json!({
                            "activityType": {"name": activity_type.name, "version": activity_type.version},
                            "activityId": activity_id,
                            "input": input,
                            "taskList": {"name": task_list},
                        }),
                    );
                    self.activity_queue.push_back(PendingActivity {
                        domain: exec.domain.clone(),
                        task_list,
                        run_id: run_id.to_string(),
                        scheduled_event_id,
                        activity_id,
                        activity_type,
                        input,
                    });
                    activity_queued = true;
                }
                None => {
                    exec.append(
                        "ScheduleActivityTaskFailed",
                        json!({
                            "activityType": {"name": activity_type.name, "version": activity_type.version},
                            "activityId": activity_id,
                            "cause": "ACTIVITY_TYPE_DOES_NOT_EXIST",
                        }),
                    );
                    redecide = true;
                }
            },
            Decision::CompleteWorkflowExecution { result } => {
                exec.append("WorkflowExecutionCompleted", json!({"result": result}));
                exec.status = ExecutionStatus::Completed { result };
            }
            Decision::FailWorkflowExecution { reason, details } => {
                exec.append("WorkflowExecutionFailed", json!({"reason": reason, "details": details}));
                exec.status = ExecutionStatus::Failed { reason, details };
            }
            Decision::CancelWorkflowExecution { details } => {
                exec.append("WorkflowExecutionCanceled", json!({"details": details}));
                exec.status = ExecutionStatus::Canceled { details };
            }
        }
        if redecide {
            exec.decision_needed = true;
        }
        activity_queued
    }

    fn close_activity(&mut self, pending: &PendingActivity, event_type: &str, attributes: Value) -> bool {
        let Some(exec) = self.executions.get_mut(&pending.run_id) else {
            return false;
        };
        if !exec.is_open() {
            return false;
        }
        exec.append(event_type, attributes);
        self.schedule_decision(&pending.run_id)
    }
}

impl InMemoryTaskSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `register_*_type` call fail with `error`.
    pub async fn inject_registration_error(&self, error: ProviderError) {
        self.inner.state.lock().await.injected_registration_error = Some(error);
    }

    /// Makes the next poll (decision or activity) fail with `error`.
    pub async fn inject_poll_error(&self, error: ProviderError) {
        self.inner.state.lock().await.injected_poll_errors.push_back(error);
    }

    /// Makes the next task response (decision or activity) fail with `error`.
    /// The task stays leased.
    pub async fn inject_response_error(&self, error: ProviderError) {
        self.inner.state.lock().await.injected_response_errors.push_back(error);
    }

    pub async fn execution_status(&self, run_id: &str) -> Option<ExecutionStatus> {
        let state = self.inner.state.lock().await;
        state.executions.get(run_id).map(|e| e.status.clone())
    }

    pub async fn history(&self, run_id: &str) -> Vec<HistoryEvent> {
        let state = self.inner.state.lock().await;
        state
            .executions
            .get(run_id)
            .map(|e| e.history.clone())
            .unwrap_or_default()
    }

    /// Every decision accepted for the execution, in response order.
    pub async fn decisions(&self, run_id: &str) -> Vec<Decision> {
        let state = self.inner.state.lock().await;
        state
            .executions
            .get(run_id)
            .map(|e| e.decisions.clone())
            .unwrap_or_default()
    }

    pub async fn workflow_type_options(&self, domain: &str, workflow_type: &TypeRef) -> Option<WorkflowOptions> {
        let state = self.inner.state.lock().await;
        state
            .workflow_types
            .get(&(domain.to_string(), workflow_type.clone()))
            .cloned()
    }

    pub async fn activity_type_options(&self, domain: &str, activity_type: &TypeRef) -> Option<ActivityOptions> {
        let state = self.inner.state.lock().await;
        state
            .activity_types
            .get(&(domain.to_string(), activity_type.clone()))
            .cloned()
    }

    /// Times out an activity that is queued or leased, as the service does
    /// when a timer expires.
    pub async fn time_out_activity(
        &self,
        run_id: &str,
        scheduled_event_id: u64,
        timeout_type: TimeoutType,
    ) -> Result<(), ProviderError> {
        let queued = {
            let mut state = self.inner.state.lock().await;
            let pending = if let Some(pos) = state
                .activity_queue
                .iter()
                .position(|a| a.run_id == run_id && a.scheduled_event_id == scheduled_event_id)
            {
                state.activity_queue.remove(pos)
            } else {
                let token = state
                    .leased_activities
                    .iter()
                    .find(|(_, a)| a.run_id == run_id && a.scheduled_event_id == scheduled_event_id)
                    .map(|(t, _)| t.clone());
                token.and_then(|t| state.leased_activities.remove(&t))
            };
            let pending = pending.ok_or_else(|| {
                ProviderError::unknown_resource(
                    "time_out_activity",
                    format!("no open activity scheduled by event {scheduled_event_id} in {run_id}"),
                )
            })?;
            state.close_activity(
                &pending,
                "ActivityTaskTimedOut",
                json!({"scheduledEventId": scheduled_event_id, "timeoutType": timeout_type.as_str()}),
            )
        };
        if queued {
            self.inner.decision_ready.notify_waiters();
        }
        Ok(())
    }
}

async fn wait_for<T>(
    inner: &Inner,
    notify: &Notify,
    timeout: Duration,
    take: impl Fn(&mut State) -> Option<T>,
) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if let Some(item) = take(&mut *inner.state.lock().await) {
            return Some(item);
        }
        if tokio::time::timeout_at(deadline, notified).await.is_err() {
            return None;
        }
    }
}

#[async_trait::async_trait]
impl DecisionResponder for Inner {
    async fn respond_decision_task_completed(
        &self,
        task_token: &str,
        decisions: Vec<Decision>,
    ) -> Result<(), ProviderError> {
        let (decision_queued, activity_queued) = {
            let mut state = self.state.lock().await;
            if let Some(err) = state.injected_response_errors.pop_front() {
                return Err(err);
            }
            let run_id = state.leased_decisions.remove(task_token).ok_or_else(|| {
                ProviderError::unknown_resource(
                    "respond_decision_task_completed",
                    format!("unknown or already used task token {task_token}"),
                )
            })?;
            let Some(exec) = state.executions.get_mut(&run_id) else {
                return Err(ProviderError::unknown_resource(
                    "respond_decision_task_completed",
                    format!("execution {run_id} no longer exists"),
                ));
            };
            exec.append("DecisionTaskCompleted", json!({}));
            let mut activity_queued = false;
            for decision in decisions {
                activity_queued |= state.apply_decision(&run_id, decision);
            }
            let mut decision_queued = false;
            if let Some(exec) = state.executions.get_mut(&run_id) {
                exec.decision_outstanding = false;
                if exec.decision_needed {
                    exec.decision_needed = false;
                    decision_queued = state.schedule_decision(&run_id);
                }
            }
            (decision_queued, activity_queued)
        };
        if decision_queued {
            self.decision_ready.notify_waiters();
        }
        if activity_queued {
            self.activity_ready.notify_waiters();
        }
        Ok(())
    }
}

impl Inner {
    async fn finish_activity(
        &self,
        operation: &str,
        task_token: &str,
        event_type: &str,
        mut attributes: Value,
    ) -> Result<(), ProviderError> {
        let queued = {
            let mut state = self.state.lock().await;
            if let Some(err) = state.injected_response_errors.pop_front() {
                return Err(err);
            }
            let pending = state.leased_activities.remove(task_token).ok_or_else(|| {
                ProviderError::unknown_resource(operation, format!("unknown or already used task token {task_token}"))
                    .with_kind(ProviderErrorKind::AlreadyResponded)
            })?;
            if let Value::Object(map) = &mut attributes {
                map.insert("scheduledEventId".to_string(), json!(pending.scheduled_event_id));
            }
            state.close_activity(&pending, event_type, attributes)
        };
        if queued {
            self.decision_ready.notify_waiters();
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActivityResponder for Inner {
    async fn respond_activity_task_completed(&self, task_token: &str, result: Option<String>) -> Result<(), ProviderError> {
        self.finish_activity(
            "respond_activity_task_completed",
            task_token,
            "ActivityTaskCompleted",
            json!({"result": result}),
        )
        .await
    }

    async fn respond_activity_task_failed(
        &self,
        task_token: &str,
        reason: Option<String>,
        details: Option<String>,
    ) -> Result<(), ProviderError> {
        self.finish_activity(
            "respond_activity_task_failed",
            task_token,
            "ActivityTaskFailed",
            json!({"reason": reason, "details": details}),
        )
        .await
    }
}

#[async_trait::async_trait]
impl TaskSource for InMemoryTaskSource {
    async fn describe_domain(&self, name: &str) -> Result<Option<DomainDescription>, ProviderError> {
        Ok(self.inner.state.lock().await.domains.get(name).cloned())
    }

    async fn register_domain(&self, name: &str, retention_period_days: u32) -> Result<(), ProviderError> {
        let mut state = self.inner.state.lock().await;
        if state.domains.contains_key(name) {
            return Err(ProviderError::already_exists(
                "register_domain",
                format!("domain {name} already exists"),
            ));
        }
        state.domains.insert(
            name.to_string(),
            DomainDescription {
                name: name.to_string(),
                retention_period_days,
            },
        );
        Ok(())
    }

    async fn register_workflow_type(
        &self,
        domain: &str,
        workflow_type: &TypeRef,
        options: &WorkflowOptions,
    ) -> Result<(), ProviderError> {
        let mut state = self.inner.state.lock().await;
        if let Some(err) = state.injected_registration_error.take() {
            return Err(err);
        }
        if !state.domains.contains_key(domain) {
            return Err(ProviderError::unknown_resource(
                "register_workflow_type",
                format!("unknown domain {domain}"),
            ));
        }
        let key = (domain.to_string(), workflow_type.clone());
        if state.workflow_types.contains_key(&key) {
            return Err(ProviderError::already_exists(
                "register_workflow_type",
                format!("workflow type {workflow_type} already exists in {domain}"),
            ));
        }
        state.workflow_types.insert(key, options.clone());
        Ok(())
    }

    async fn register_activity_type(
        &self,
        domain: &str,
        activity_type: &TypeRef,
        options: &ActivityOptions,
    ) -> Result<(), ProviderError> {
        let mut state = self.inner.state.lock().await;
        if let Some(err) = state.injected_registration_error.take() {
            return Err(err);
        }
        if !state.domains.contains_key(domain) {
            return Err(ProviderError::unknown_resource(
                "register_activity_type",
                format!("unknown domain {domain}"),
            ));
        }
        let key = (domain.to_string(), activity_type.clone());
        if state.activity_types.contains_key(&key) {
            return Err(ProviderError::already_exists(
                "register_activity_type",
                format!("activity type {activity_type} already exists in {domain}"),
            ));
        }
        state.activity_types.insert(key, options.clone());
        Ok(())
    }

    async fn poll_decision_task(
        &self,
        domain: &str,
        task_list: &str,
        timeout: Duration,
    ) -> Result<Option<DecisionTask>, ProviderError> {
        if let Some(err) = self.inner.state.lock().await.injected_poll_errors.pop_front() {
            return Err(err);
        }
        let take = |state: &mut State| state.take_decision(domain, task_list);
        let Some((token, run_id)) = wait_for(&self.inner, &self.inner.decision_ready, timeout, take).await else {
            return Ok(None);
        };
        let mut state = self.inner.state.lock().await;
        let exec = state.executions.get_mut(&run_id).ok_or_else(|| {
            ProviderError::unknown_resource("poll_decision_task", format!("execution {run_id} vanished"))
        })?;
        exec.append("DecisionTaskStarted", json!({}));
        let previous_started_event_id = exec.previous_started_event_id;
        exec.previous_started_event_id = exec.history.len() as u64;
        let responder: Arc<dyn DecisionResponder> = self.inner.clone();
        Ok(Some(DecisionTask::new(
            token,
            domain,
            exec.execution.clone(),
            exec.workflow_type.clone(),
            exec.history.clone(),
            previous_started_event_id,
            responder,
        )))
    }

    async fn poll_activity_task(
        &self,
        domain: &str,
        task_list: &str,
        timeout: Duration,
    ) -> Result<Option<ActivityTask>, ProviderError> {
        if let Some(err) = self.inner.state.lock().await.injected_poll_errors.pop_front() {
            return Err(err);
        }
        let take = |state: &mut State| state.take_activity(domain, task_list);
        let Some((token, pending)) = wait_for(&self.inner, &self.inner.activity_ready, timeout, take).await else {
            return Ok(None);
        };
        let mut state = self.inner.state.lock().await;
        let exec = state.executions.get_mut(&pending.run_id).ok_or_else(|| {
            ProviderError::unknown_resource("poll_activity_task", format!("execution {} vanished", pending.run_id))
        })?;
        exec.append(
            "ActivityTaskStarted",
            json!({"scheduledEventId": pending.scheduled_event_id}),
        );
        let responder: Arc<dyn ActivityResponder> = self.inner.clone();
        Ok(Some(ActivityTask::new(
            token,
            pending.activity_id,
            pending.activity_type,
            exec.execution.clone(),
            pending.input,
            responder,
        )))
    }

    async fn start_workflow_execution(
        &self,
        domain: &str,
        workflow_type: &TypeRef,
        workflow_id: &str,
        input: Option<String>,
    ) -> Result<WorkflowExecution, ProviderError> {
        let execution = {
            let mut state = self.inner.state.lock().await;
            let options = state
                .workflow_types
                .get(&(domain.to_string(), workflow_type.clone()))
                .cloned()
                .ok_or_else(|| {
                    ProviderError::unknown_resource(
                        "start_workflow_execution",
                        format!("workflow type {workflow_type} is not registered in {domain}"),
                    )
                })?;
            if state
                .executions
                .values()
                .any(|e| e.is_open() && e.execution.workflow_id == workflow_id)
            {
                return Err(ProviderError::permanent(
                    "start_workflow_execution",
                    format!("workflow {workflow_id} is already running"),
                ));
            }
            state.next_run += 1;
            let execution = WorkflowExecution {
                workflow_id: workflow_id.to_string(),
                run_id: format!("run-{}", state.next_run),
            };
            let mut exec = Execution {
                domain: domain.to_string(),
                execution: execution.clone(),
                workflow_type: workflow_type.clone(),
                task_list: options.default_task_list.clone(),
                history: Vec::new(),
                previous_started_event_id: 0,
                decision_outstanding: false,
                decision_needed: false,
                decisions: Vec::new(),
                status: ExecutionStatus::Open,
            };
            exec.append(
                "WorkflowExecutionStarted",
                json!({
                    "input": input,
                    "taskList": {"name": options.default_task_list},
                    "workflowType": {"name": workflow_type.name, "version": workflow_type.version},
                    "childPolicy": options.default_child_policy.as_str(),
                }),
            );
            state.executions.insert(execution.run_id.clone(), exec);
            state.schedule_decision(&execution.run_id);
            execution
        };
        self.inner.decision_ready.notify_waiters();
        Ok(execution)
    }

    async fn count_pending_activity_tasks(&self, domain: &str, task_list: &str) -> Result<u64, ProviderError> {
        let state = self.inner.state.lock().await;
        Ok(state
            .activity_queue
            .iter()
            .filter(|a| a.domain == domain && a.task_list == task_list)
            .count() as u64)
    }
}

/// Metadata store that lives for the lifetime of the process.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    namespaces: Mutex<HashMap<String, HashMap<String, MetadataRecord>>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn exists(&self, namespace: &str) -> Result<bool, ProviderError> {
        Ok(self.namespaces.lock().await.contains_key(namespace))
    }

    async fn create(&self, namespace: &str) -> Result<(), ProviderError> {
        let mut g = self.namespaces.lock().await;
        if g.contains_key(namespace) {
            return Err(ProviderError::already_exists(
                "create",
                format!("namespace {namespace} already exists"),
            ));
        }
        g.insert(namespace.to_string(), HashMap::new());
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<MetadataRecord>, ProviderError> {
        let g = self.namespaces.lock().await;
        Ok(g.get(namespace).and_then(|items| items.get(key)).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, record: MetadataRecord) -> Result<(), ProviderError> {
        let mut g = self.namespaces.lock().await;
        let items = g
            .get_mut(namespace)
            .ok_or_else(|| ProviderError::unknown_resource("put", format!("unknown namespace {namespace}")))?;
        items.insert(key.to_string(), record);
        Ok(())
    }
}
