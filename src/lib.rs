//! # taskchain
//!
//! Decision and activity workers for workflows whose authoritative history
//! lives in a remote tracking service.
//!
//! The service hands out two kinds of work: *decision tasks* (a workflow
//! execution needs its next step decided) and *activity tasks* (a unit of
//! business logic needs to run). This crate is the client side of that
//! protocol:
//!
//! - [`runtime::registry`] maps `(domain, name, version)` triples to
//!   [`WorkflowType`] and [`ActivityType`] descriptors and persists activity
//!   failure policies and success chains to a shared [`MetadataStore`] so that
//!   every worker process resolves the same descriptor.
//! - [`runtime::dispatch`] walks the new history events of a [`DecisionTask`]
//!   in delivery order and invokes one handler per event type.
//! - [`runtime::handlers`] holds the decision logic: start the initial
//!   activity, chain to the next activity on success, and apply the failure
//!   policy on failure or timeout.
//! - [`Runtime`] runs isolated poll loops per workflow or activity type with
//!   a drain-then-stop shutdown protocol.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskchain::providers::in_memory::{InMemoryMetadataStore, InMemoryTaskSource};
//! use taskchain::{FailurePolicy, Registry, Runtime, WorkerOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new(
//!     Arc::new(InMemoryTaskSource::new()),
//!     Arc::new(InMemoryMetadataStore::new()),
//! );
//! let domain = registry.domain("orders").await?;
//!
//! let charge = domain
//!     .register_activity("charge-card", "1.0.0", |a| {
//!         a.on_fail(FailurePolicy::Retry)
//!             .on_success("ship-order", "1.0.0")
//!             .perform(|task| async move { Ok::<_, String>(format!("charged {}", task.input().unwrap_or(""))) });
//!     })
//!     .await?;
//!
//! let workflow = domain
//!     .register_workflow("fulfil-order", "1.0.0", |w| {
//!         w.initial_activity("charge-card", "1.0.0");
//!     })
//!     .await?;
//!
//! let runtime = Runtime::new(registry.clone(), WorkerOptions::default());
//! runtime.start_decision_loop(&workflow, 2).await;
//! runtime.start_activity_loop(&charge, 4).await?;
//! runtime.run_until_signal().await?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod errors;
pub mod providers;
pub mod runtime;

pub use errors::{ActivityError, DecisionError, RegistryError};
pub use providers::{ActivityTask, DecisionTask, MetadataRecord, MetadataStore, ProviderError, TaskSource};
pub use runtime::registry::{ActivityConfig, ActivityType, Domain, Registry, WorkflowConfig, WorkflowType};
pub use runtime::{Runtime, ShutdownMode, WorkerExit, WorkerOptions, WorkerReport};

/// Attribute bag carried by a history event.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// `(name, version)` reference to a workflow or activity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeRef {
    pub name: String,
    pub version: String,
}

impl TypeRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Identity of one workflow execution as assigned by the task source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: String,
}

/// History event type tag.
///
/// Only the four variants before `ActivityTaskScheduled` have decision
/// handlers; everything else dispatches to the no-op handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    WorkflowExecutionStarted,
    ActivityTaskCompleted,
    ActivityTaskFailed,
    ActivityTaskTimedOut,
    ActivityTaskScheduled,
    Other(String),
}

impl EventType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "WorkflowExecutionStarted" => EventType::WorkflowExecutionStarted,
            "ActivityTaskCompleted" => EventType::ActivityTaskCompleted,
            "ActivityTaskFailed" => EventType::ActivityTaskFailed,
            "ActivityTaskTimedOut" => EventType::ActivityTaskTimedOut,
            "ActivityTaskScheduled" => EventType::ActivityTaskScheduled,
            other => EventType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventType::WorkflowExecutionStarted => "WorkflowExecutionStarted",
            EventType::ActivityTaskCompleted => "ActivityTaskCompleted",
            EventType::ActivityTaskFailed => "ActivityTaskFailed",
            EventType::ActivityTaskTimedOut => "ActivityTaskTimedOut",
            EventType::ActivityTaskScheduled => "ActivityTaskScheduled",
            EventType::Other(tag) => tag,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a workflow execution's history.
///
/// Attribute keys are looked up in camelCase first and then in snake_case, so
/// `scheduledEventId` and `scheduled_event_id` are interchangeable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: u64,
    pub event_type: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl HistoryEvent {
    pub fn new(event_id: u64, event_type: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            attributes,
        }
    }

    pub fn kind(&self) -> EventType {
        EventType::from_tag(&self.event_type)
    }

    /// Raw attribute lookup, camelCase first then snake_case.
    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes
            .get(key)
            .or_else(|| self.attributes.get(&to_snake_case(key)))
    }

    fn str_attribute(&self, key: &str) -> Option<&str> {
        self.attribute(key).and_then(|v| v.as_str())
    }

    pub fn input(&self) -> Option<&str> {
        self.str_attribute("input")
    }

    pub fn result(&self) -> Option<&str> {
        self.str_attribute("result")
    }

    pub fn reason(&self) -> Option<&str> {
        self.str_attribute("reason")
    }

    pub fn details(&self) -> Option<&str> {
        self.str_attribute("details")
    }

    /// Identifier of the `ActivityTaskScheduled` event a completion, failure
    /// or timeout refers to. Accepts numbers and numeric strings.
    pub fn scheduled_event_id(&self) -> Option<u64> {
        match self.attribute("scheduledEventId")? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn timeout_type(&self) -> Option<TimeoutType> {
        self.str_attribute("timeoutType").and_then(TimeoutType::parse)
    }

    /// Activity type recorded on an `ActivityTaskScheduled` event.
    pub fn activity_type(&self) -> Option<TypeRef> {
        let value = self.attribute("activityType")?;
        let name = value.get("name")?.as_str()?;
        let version = value.get("version")?.as_str()?;
        Some(TypeRef::new(name, version))
    }
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Response to an explicit activity failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Fail,
    Retry,
    Abort,
    Cancel,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Fail => "fail",
            FailurePolicy::Retry => "retry",
            FailurePolicy::Abort => "abort",
            FailurePolicy::Cancel => "cancel",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    /// Accepts `retry`, `RETRY` and the symbol-like `:retry`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches(':').to_ascii_lowercase();
        match normalized.as_str() {
            "fail" => Ok(FailurePolicy::Fail),
            "retry" => Ok(FailurePolicy::Retry),
            "abort" => Ok(FailurePolicy::Abort),
            "cancel" => Ok(FailurePolicy::Cancel),
            _ => Err(format!("unknown failure policy: {s}")),
        }
    }
}

/// Kind of activity timeout reported by the task source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutType {
    StartToClose,
    ScheduleToStart,
    ScheduleToClose,
    Heartbeat,
}

impl TimeoutType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "START_TO_CLOSE" => Some(TimeoutType::StartToClose),
            "SCHEDULE_TO_START" => Some(TimeoutType::ScheduleToStart),
            "SCHEDULE_TO_CLOSE" => Some(TimeoutType::ScheduleToClose),
            "HEARTBEAT" => Some(TimeoutType::Heartbeat),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutType::StartToClose => "START_TO_CLOSE",
            TimeoutType::ScheduleToStart => "SCHEDULE_TO_START",
            TimeoutType::ScheduleToClose => "SCHEDULE_TO_CLOSE",
            TimeoutType::Heartbeat => "HEARTBEAT",
        }
    }
}

/// What happens to child executions when the parent closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildPolicy {
    #[default]
    Terminate,
    RequestCancel,
    Abandon,
}

impl ChildPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildPolicy::Terminate => "TERMINATE",
            ChildPolicy::RequestCancel => "REQUEST_CANCEL",
            ChildPolicy::Abandon => "ABANDON",
        }
    }
}

/// Decision issued when an activity loses its heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeartbeatTimeoutAction {
    #[default]
    Fail,
    Cancel,
}

/// Workflow type options sent to the task source at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowOptions {
    pub default_task_list: String,
    pub default_task_start_to_close_timeout: Duration,
    pub default_execution_start_to_close_timeout: Duration,
    pub default_child_policy: ChildPolicy,
}

/// Activity type options sent to the task source at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityOptions {
    pub default_task_list: String,
    pub default_task_start_to_close_timeout: Duration,
    pub default_task_schedule_to_start_timeout: Duration,
    pub default_task_schedule_to_close_timeout: Duration,
    /// `None` disables heartbeat tracking.
    pub default_task_heartbeat_timeout: Option<Duration>,
}

/// Outbound decision for a decision task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Decision {
    ScheduleActivityTask {
        activity_type: TypeRef,
        activity_id: String,
        input: Option<String>,
        /// `None` uses the activity type's registered default task list.
        task_list: Option<String>,
    },
    CompleteWorkflowExecution {
        result: Option<String>,
    },
    FailWorkflowExecution {
        reason: Option<String>,
        details: Option<String>,
    },
    CancelWorkflowExecution {
        details: Option<String>,
    },
}

impl Decision {
    pub fn kind(&self) -> &'static str {
        match self {
            Decision::ScheduleActivityTask { .. } => "ScheduleActivityTask",
            Decision::CompleteWorkflowExecution { .. } => "CompleteWorkflowExecution",
            Decision::FailWorkflowExecution { .. } => "FailWorkflowExecution",
            Decision::CancelWorkflowExecution { .. } => "CancelWorkflowExecution",
        }
    }
}
