use std::collections::BTreeMap;
use std::time::Duration;

use crate::{ActivityOptions, Decision, TypeRef, WorkflowExecution, WorkflowOptions};

pub mod error;
pub use error::{ProviderError, ProviderErrorKind};

mod task;
pub use task::{ActivityTask, DecisionTask};

/// In-memory task source and metadata store.
pub mod in_memory;
/// SQLite-backed metadata store.
pub mod sqlite;

/// Domain as described by the task source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDescription {
    pub name: String,
    pub retention_period_days: u32,
}

/// Sends the decision for a decision task back to the task source.
#[async_trait::async_trait]
pub trait DecisionResponder: Send + Sync {
    async fn respond_decision_task_completed(&self, task_token: &str, decisions: Vec<Decision>)
    -> Result<(), ProviderError>;
}

/// Reports the outcome of an activity task back to the task source.
#[async_trait::async_trait]
pub trait ActivityResponder: Send + Sync {
    async fn respond_activity_task_completed(&self, task_token: &str, result: Option<String>)
    -> Result<(), ProviderError>;

    async fn respond_activity_task_failed(
        &self,
        task_token: &str,
        reason: Option<String>,
        details: Option<String>,
    ) -> Result<(), ProviderError>;
}

/// Remote tracking service that owns workflow histories and hands out
/// decision and activity tasks.
///
/// Polls are long polls: `Ok(None)` means the timeout elapsed without work and
/// is the normal idle outcome, not an error.
#[async_trait::async_trait]
pub trait TaskSource: Send + Sync {
    /// `Ok(None)` when the domain does not exist.
    async fn describe_domain(&self, name: &str) -> Result<Option<DomainDescription>, ProviderError>;

    async fn register_domain(&self, name: &str, retention_period_days: u32) -> Result<(), ProviderError>;

    /// Fails with a `TypeAlreadyExists` error if the type is already registered.
    async fn register_workflow_type(
        &self,
        domain: &str,
        workflow_type: &TypeRef,
        options: &WorkflowOptions,
    ) -> Result<(), ProviderError>;

    /// Fails with a `TypeAlreadyExists` error if the type is already registered.
    async fn register_activity_type(
        &self,
        domain: &str,
        activity_type: &TypeRef,
        options: &ActivityOptions,
    ) -> Result<(), ProviderError>;

    async fn poll_decision_task(
        &self,
        domain: &str,
        task_list: &str,
        timeout: Duration,
    ) -> Result<Option<DecisionTask>, ProviderError>;

    async fn poll_activity_task(
        &self,
        domain: &str,
        task_list: &str,
        timeout: Duration,
    ) -> Result<Option<ActivityTask>, ProviderError>;

    async fn start_workflow_execution(
        &self,
        domain: &str,
        workflow_type: &TypeRef,
        workflow_id: &str,
        input: Option<String>,
    ) -> Result<WorkflowExecution, ProviderError>;

    async fn count_pending_activity_tasks(&self, domain: &str, task_list: &str) -> Result<u64, ProviderError>;
}

/// Flat string attributes stored per metadata item.
pub type MetadataRecord = BTreeMap<String, String>;

/// Namespaced key/value store shared by every worker process.
///
/// Writers of the same key race; the last write wins.
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    async fn exists(&self, namespace: &str) -> Result<bool, ProviderError>;

    /// Creating an existing namespace fails with a `TypeAlreadyExists` error.
    async fn create(&self, namespace: &str) -> Result<(), ProviderError>;

    /// `Ok(None)` when the namespace or the item is missing.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<MetadataRecord>, ProviderError>;

    /// Fails with an `UnknownResource` error when the namespace is missing.
    async fn put(&self, namespace: &str, key: &str, record: MetadataRecord) -> Result<(), ProviderError>;
}
