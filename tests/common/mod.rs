#![allow(dead_code)]

pub mod tracing_capture;

use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use taskchain::providers::in_memory::{ExecutionStatus, InMemoryMetadataStore, InMemoryTaskSource};
use taskchain::providers::{ActivityResponder, DecisionResponder, DecisionTask, ProviderError};
use taskchain::runtime::reporter::{ExceptionReporter, ReportContext};
use taskchain::{Attributes, Decision, HistoryEvent, Registry, TypeRef, WorkerOptions, WorkflowExecution};

/// One simulated process: a registry over a task source and metadata store
/// that other fixtures may share.
pub struct Fixture {
    pub source: Arc<InMemoryTaskSource>,
    pub store: Arc<InMemoryMetadataStore>,
    pub registry: Registry,
}

pub fn fixture() -> Fixture {
    sharing(
        Arc::new(InMemoryTaskSource::new()),
        Arc::new(InMemoryMetadataStore::new()),
    )
}

/// A second process talking to the same remote services.
pub fn sharing(source: Arc<InMemoryTaskSource>, store: Arc<InMemoryMetadataStore>) -> Fixture {
    let registry = Registry::new(source.clone(), store.clone());
    Fixture {
        source,
        store,
        registry,
    }
}

pub fn fast_options() -> WorkerOptions {
    WorkerOptions::default()
        .with_poll_timeout(Duration::from_millis(50))
        .with_error_backoff(Duration::from_millis(10))
}

pub fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap_or_default()
}

pub fn event(event_id: u64, event_type: &str, attributes: Value) -> HistoryEvent {
    HistoryEvent::new(event_id, event_type, attrs(attributes))
}

pub fn started(event_id: u64, input: &str) -> HistoryEvent {
    event(event_id, "WorkflowExecutionStarted", json!({ "input": input }))
}

pub fn scheduled(event_id: u64, name: &str, version: &str, input: &str) -> HistoryEvent {
    event(
        event_id,
        "ActivityTaskScheduled",
        json!({ "activityType": { "name": name, "version": version }, "input": input }),
    )
}

pub fn completed(event_id: u64, scheduled_event_id: u64, result: Option<&str>) -> HistoryEvent {
    event(
        event_id,
        "ActivityTaskCompleted",
        json!({ "scheduledEventId": scheduled_event_id, "result": result }),
    )
}

pub fn failed(event_id: u64, scheduled_event_id: u64, reason: &str, details: Option<&str>) -> HistoryEvent {
    event(
        event_id,
        "ActivityTaskFailed",
        json!({ "scheduledEventId": scheduled_event_id, "reason": reason, "details": details }),
    )
}

pub fn timed_out(event_id: u64, scheduled_event_id: u64, timeout_type: &str) -> HistoryEvent {
    event(
        event_id,
        "ActivityTaskTimedOut",
        json!({ "scheduledEventId": scheduled_event_id, "timeoutType": timeout_type }),
    )
}

/// Responder that records every response instead of sending it anywhere.
#[derive(Default)]
pub struct RecordingResponder {
    pub decisions: Mutex<Vec<(String, Vec<Decision>)>>,
    pub completed: Mutex<Vec<(String, Option<String>)>>,
    pub failed: Mutex<Vec<(String, Option<String>, Option<String>)>>,
}

impl RecordingResponder {
    /// All decisions sent, flattened in response order.
    pub fn decisions(&self) -> Vec<Decision> {
        self.decisions
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, d)| d.clone())
            .collect()
    }

    pub fn responses(&self) -> usize {
        self.decisions.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl DecisionResponder for RecordingResponder {
    async fn respond_decision_task_completed(&self, task_token: &str, decisions: Vec<Decision>) -> Result<(), ProviderError> {
        self.decisions
            .lock()
            .unwrap()
            .push((task_token.to_string(), decisions));
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActivityResponder for RecordingResponder {
    async fn respond_activity_task_completed(&self, task_token: &str, result: Option<String>) -> Result<(), ProviderError> {
        self.completed
            .lock()
            .unwrap()
            .push((task_token.to_string(), result));
        Ok(())
    }

    async fn respond_activity_task_failed(
        &self,
        task_token: &str,
        reason: Option<String>,
        details: Option<String>,
    ) -> Result<(), ProviderError> {
        self.failed
            .lock()
            .unwrap()
            .push((task_token.to_string(), reason, details));
        Ok(())
    }
}

pub fn decision_task(
    responder: &Arc<RecordingResponder>,
    workflow_type: &TypeRef,
    events: Vec<HistoryEvent>,
    previous_started_event_id: u64,
) -> DecisionTask {
    DecisionTask::new(
        "token-1",
        "d",
        WorkflowExecution {
            workflow_id: "wf-1".to_string(),
            run_id: "run-1".to_string(),
        },
        workflow_type.clone(),
        events,
        previous_started_event_id,
        responder.clone(),
    )
}

pub fn schedule(name: &str, version: &str, input: Option<&str>, activity_id: &str) -> Decision {
    Decision::ScheduleActivityTask {
        activity_type: TypeRef::new(name, version),
        activity_id: activity_id.to_string(),
        input: input.map(str::to_string),
        task_list: None,
    }
}

/// Reporter that keeps every report for later assertions.
#[derive(Default)]
pub struct CapturingReporter {
    pub reports: Mutex<Vec<(String, ReportContext)>>,
}

impl CapturingReporter {
    pub fn messages(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }
}

impl ExceptionReporter for CapturingReporter {
    fn report(&self, error: &(dyn std::error::Error + 'static), context: &ReportContext) {
        self.reports
            .lock()
            .unwrap()
            .push((error.to_string(), context.clone()));
    }
}

/// Waits until the execution leaves `Open`.
pub async fn wait_for_close(source: &InMemoryTaskSource, run_id: &str, timeout_ms: u64) -> Option<ExecutionStatus> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        match source.execution_status(run_id).await {
            Some(ExecutionStatus::Open) | None => {}
            Some(closed) => return Some(closed),
        }
        if Instant::now() > deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Waits until `predicate` holds for the execution's history.
pub async fn wait_for_history<F>(source: &InMemoryTaskSource, run_id: &str, predicate: F, timeout_ms: u64) -> bool
where
    F: Fn(&[HistoryEvent]) -> bool,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if predicate(&source.history(run_id).await) {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn count_events(history: &[HistoryEvent], event_type: &str) -> usize {
    history.iter().filter(|e| e.event_type == event_type).count()
}
