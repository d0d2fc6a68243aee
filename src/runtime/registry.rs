//! Domain, workflow type and activity type registry.
//!
//! A `Registry` is an explicit, cloneable handle shared by everything in one
//! process that declares or resolves types. Workflow and activity descriptors
//! are unique per `(domain, name, version)`: registering the same triple twice
//! returns the descriptor built the first time.
//!
//! Activity types have a second lookup path. A decider often has to act on an
//! activity that was declared in a different process, so [`Registry::activity`]
//! falls back to a default descriptor overlaid with the record the declaring
//! process wrote to the metadata store.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::dispatch::{EventDispatcher, EventHandler};
use super::metadata::ActivityMetadata;
use super::{ActivityHandler, FnActivity};
use crate::errors::RegistryError;
use crate::providers::{ActivityTask, MetadataStore, ProviderError, TaskSource};
use crate::{
    ActivityOptions, ChildPolicy, EventType, FailurePolicy, HeartbeatTimeoutAction, TypeRef, WorkflowExecution,
    WorkflowOptions,
};

pub const DEFAULT_RETENTION_DAYS: u32 = 2;

const WORKFLOW_TASK_START_TO_CLOSE: Duration = Duration::from_secs(120);
const WORKFLOW_EXECUTION_START_TO_CLOSE: Duration = Duration::from_secs(120);
const ACTIVITY_START_TO_CLOSE: Duration = Duration::from_secs(5 * 60);
const ACTIVITY_SCHEDULE_TO_START: Duration = Duration::from_secs(5 * 60);
const ACTIVITY_SCHEDULE_TO_CLOSE: Duration = Duration::from_secs(10 * 60);

fn validate_version(type_ref: &TypeRef) -> Result<Version, RegistryError> {
    Version::parse(&type_ref.version).map_err(|source| RegistryError::InvalidVersion {
        name: type_ref.name.clone(),
        version: type_ref.version.clone(),
        source,
    })
}

fn invalid(kind: &'static str, type_ref: &TypeRef, reason: impl Into<String>) -> RegistryError {
    RegistryError::InvalidOptions {
        kind,
        type_ref: type_ref.clone(),
        reason: reason.into(),
    }
}

fn require_nonzero(kind: &'static str, type_ref: &TypeRef, what: &str, value: Duration) -> Result<(), RegistryError> {
    if value.is_zero() {
        return Err(invalid(kind, type_ref, format!("{what} must be positive")));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TypeKey {
    domain: String,
    type_ref: TypeRef,
}

impl TypeKey {
    fn new(domain: &str, type_ref: &TypeRef) -> Self {
        Self {
            domain: domain.to_string(),
            type_ref: type_ref.clone(),
        }
    }
}

// ============================================================================
// Workflow types
// ============================================================================

/// Options for a workflow type, applied by the block passed to
/// `register_workflow`. Every setter has a default:
///
/// | option | default |
/// |---|---|
/// | task list | workflow name |
/// | decision task start-to-close | 120 s |
/// | execution start-to-close | 120 s |
/// | child policy | terminate |
/// | heartbeat timeout action | fail |
pub struct WorkflowConfig {
    type_ref: TypeRef,
    options: WorkflowOptions,
    initial_activity: Option<TypeRef>,
    heartbeat_timeout_action: HeartbeatTimeoutAction,
    handlers: Vec<(EventType, Arc<dyn EventHandler>)>,
}

impl WorkflowConfig {
    fn new(type_ref: &TypeRef) -> Self {
        Self {
            type_ref: type_ref.clone(),
            options: WorkflowOptions {
                default_task_list: type_ref.name.clone(),
                default_task_start_to_close_timeout: WORKFLOW_TASK_START_TO_CLOSE,
                default_execution_start_to_close_timeout: WORKFLOW_EXECUTION_START_TO_CLOSE,
                default_child_policy: ChildPolicy::Terminate,
            },
            initial_activity: None,
            heartbeat_timeout_action: HeartbeatTimeoutAction::Fail,
            handlers: Vec::new(),
        }
    }

    pub fn task_list(&mut self, task_list: impl Into<String>) -> &mut Self {
        self.options.default_task_list = task_list.into();
        self
    }

    pub fn task_start_to_close_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.options.default_task_start_to_close_timeout = timeout;
        self
    }

    pub fn execution_start_to_close_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.options.default_execution_start_to_close_timeout = timeout;
        self
    }

    pub fn child_policy(&mut self, policy: ChildPolicy) -> &mut Self {
        self.options.default_child_policy = policy;
        self
    }

    /// Activity scheduled when an execution starts.
    pub fn initial_activity(&mut self, name: impl Into<String>, version: impl Into<String>) -> &mut Self {
        self.initial_activity = Some(TypeRef::new(name, version));
        self
    }

    pub fn on_heartbeat_timeout(&mut self, action: HeartbeatTimeoutAction) -> &mut Self {
        self.heartbeat_timeout_action = action;
        self
    }

    /// Replaces the handler for one event type.
    pub fn on_event(&mut self, event_type: EventType, handler: impl EventHandler + 'static) -> &mut Self {
        self.handlers.push((event_type, Arc::new(handler)));
        self
    }

    pub fn on_start_execution(&mut self, handler: impl EventHandler + 'static) -> &mut Self {
        self.on_event(EventType::WorkflowExecutionStarted, handler)
    }

    pub fn on_activity_completed(&mut self, handler: impl EventHandler + 'static) -> &mut Self {
        self.on_event(EventType::ActivityTaskCompleted, handler)
    }

    pub fn on_activity_failed(&mut self, handler: impl EventHandler + 'static) -> &mut Self {
        self.on_event(EventType::ActivityTaskFailed, handler)
    }

    pub fn on_activity_timed_out(&mut self, handler: impl EventHandler + 'static) -> &mut Self {
        self.on_event(EventType::ActivityTaskTimedOut, handler)
    }

    fn build(self, domain: &str) -> Result<WorkflowType, RegistryError> {
        const KIND: &str = "workflow";
        let type_ref = self.type_ref;
        if self.options.default_task_list.trim().is_empty() {
            return Err(invalid(KIND, &type_ref, "task list must not be empty"));
        }
        require_nonzero(
            KIND,
            &type_ref,
            "task start-to-close timeout",
            self.options.default_task_start_to_close_timeout,
        )?;
        require_nonzero(
            KIND,
            &type_ref,
            "execution start-to-close timeout",
            self.options.default_execution_start_to_close_timeout,
        )?;
        if let Some(initial) = &self.initial_activity {
            validate_version(initial)?;
        }

        let mut dispatcher = EventDispatcher::with_defaults();
        for (event_type, handler) in self.handlers {
            dispatcher.set_handler(event_type, handler);
        }

        Ok(WorkflowType {
            domain: domain.to_string(),
            type_ref,
            options: self.options,
            initial_activity: self.initial_activity,
            heartbeat_timeout_action: self.heartbeat_timeout_action,
            dispatcher,
        })
    }
}

/// A registered workflow type.
pub struct WorkflowType {
    domain: String,
    type_ref: TypeRef,
    options: WorkflowOptions,
    initial_activity: Option<TypeRef>,
    heartbeat_timeout_action: HeartbeatTimeoutAction,
    dispatcher: EventDispatcher,
}

impl WorkflowType {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn type_ref(&self) -> &TypeRef {
        &self.type_ref
    }

    pub fn name(&self) -> &str {
        &self.type_ref.name
    }

    pub fn version(&self) -> &str {
        &self.type_ref.version
    }

    pub fn options(&self) -> &WorkflowOptions {
        &self.options
    }

    pub fn task_list(&self) -> &str {
        &self.options.default_task_list
    }

    pub fn initial_activity(&self) -> Option<&TypeRef> {
        self.initial_activity.as_ref()
    }

    pub fn heartbeat_timeout_action(&self) -> HeartbeatTimeoutAction {
        self.heartbeat_timeout_action
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }
}

impl fmt::Debug for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowType")
            .field("domain", &self.domain)
            .field("type_ref", &self.type_ref)
            .field("options", &self.options)
            .field("initial_activity", &self.initial_activity)
            .field("heartbeat_timeout_action", &self.heartbeat_timeout_action)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Activity types
// ============================================================================

/// Options for an activity type, applied by the block passed to
/// `register_activity`.
///
/// | option | default |
/// |---|---|
/// | task list | activity name |
/// | start-to-close | 300 s |
/// | schedule-to-start | 300 s |
/// | schedule-to-close | 600 s |
/// | heartbeat | none |
/// | failure policy | fail |
/// | next activity | none |
pub struct ActivityConfig {
    type_ref: TypeRef,
    options: ActivityOptions,
    failure_policy: FailurePolicy,
    next_activity: Option<TypeRef>,
    handler: Option<Arc<dyn ActivityHandler>>,
}

impl ActivityConfig {
    fn new(type_ref: &TypeRef) -> Self {
        Self {
            type_ref: type_ref.clone(),
            options: ActivityOptions {
                default_task_list: type_ref.name.clone(),
                default_task_start_to_close_timeout: ACTIVITY_START_TO_CLOSE,
                default_task_schedule_to_start_timeout: ACTIVITY_SCHEDULE_TO_START,
                default_task_schedule_to_close_timeout: ACTIVITY_SCHEDULE_TO_CLOSE,
                default_task_heartbeat_timeout: None,
            },
            failure_policy: FailurePolicy::Fail,
            next_activity: None,
            handler: None,
        }
    }

    pub fn task_list(&mut self, task_list: impl Into<String>) -> &mut Self {
        self.options.default_task_list = task_list.into();
        self
    }

    pub fn start_to_close_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.options.default_task_start_to_close_timeout = timeout;
        self
    }

    pub fn schedule_to_start_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.options.default_task_schedule_to_start_timeout = timeout;
        self
    }

    pub fn schedule_to_close_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.options.default_task_schedule_to_close_timeout = timeout;
        self
    }

    /// `None` disables heartbeat tracking.
    pub fn heartbeat_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.options.default_task_heartbeat_timeout = timeout;
        self
    }

    pub fn on_fail(&mut self, policy: FailurePolicy) -> &mut Self {
        self.failure_policy = policy;
        self
    }

    /// Activity scheduled after this one completes.
    pub fn on_success(&mut self, name: impl Into<String>, version: impl Into<String>) -> &mut Self {
        self.next_activity = Some(TypeRef::new(name, version));
        self
    }

    pub fn handler(&mut self, handler: impl ActivityHandler + 'static) -> &mut Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Closure run for every activity task. `Ok` output becomes the task
    /// result; `Err` fails the task with the message as its reason.
    pub fn perform<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(ActivityTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        self.handler(FnActivity(f))
    }

    fn build(self, domain: &str) -> Result<ActivityType, RegistryError> {
        const KIND: &str = "activity";
        let type_ref = self.type_ref;
        if self.options.default_task_list.trim().is_empty() {
            return Err(invalid(KIND, &type_ref, "task list must not be empty"));
        }
        require_nonzero(
            KIND,
            &type_ref,
            "start-to-close timeout",
            self.options.default_task_start_to_close_timeout,
        )?;
        require_nonzero(
            KIND,
            &type_ref,
            "schedule-to-start timeout",
            self.options.default_task_schedule_to_start_timeout,
        )?;
        require_nonzero(
            KIND,
            &type_ref,
            "schedule-to-close timeout",
            self.options.default_task_schedule_to_close_timeout,
        )?;
        if let Some(heartbeat) = self.options.default_task_heartbeat_timeout {
            require_nonzero(KIND, &type_ref, "heartbeat timeout", heartbeat)?;
        }
        if let Some(next) = &self.next_activity {
            validate_version(next)?;
        }

        Ok(ActivityType {
            domain: domain.to_string(),
            type_ref,
            options: self.options,
            failure_policy: self.failure_policy,
            next_activity: self.next_activity,
            handler: self.handler,
        })
    }
}

/// A registered or metadata-reconstructed activity type.
pub struct ActivityType {
    domain: String,
    type_ref: TypeRef,
    options: ActivityOptions,
    failure_policy: FailurePolicy,
    next_activity: Option<TypeRef>,
    handler: Option<Arc<dyn ActivityHandler>>,
}

impl ActivityType {
    /// Default descriptor with the stored overlay applied. Carries no handler.
    fn reconstructed(domain: &str, type_ref: &TypeRef, overlay: Option<super::metadata::ActivityOverlay>) -> Self {
        let mut config = ActivityConfig::new(type_ref);
        if let Some(overlay) = overlay {
            config.failure_policy = overlay.failure_policy();
            config.next_activity = overlay.next_activity;
        }
        Self {
            domain: domain.to_string(),
            type_ref: config.type_ref,
            options: config.options,
            failure_policy: config.failure_policy,
            next_activity: config.next_activity,
            handler: None,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn type_ref(&self) -> &TypeRef {
        &self.type_ref
    }

    pub fn name(&self) -> &str {
        &self.type_ref.name
    }

    pub fn version(&self) -> &str {
        &self.type_ref.version
    }

    pub fn options(&self) -> &ActivityOptions {
        &self.options
    }

    pub fn task_list(&self) -> &str {
        &self.options.default_task_list
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn next_activity(&self) -> Option<&TypeRef> {
        self.next_activity.as_ref()
    }

    pub fn handler(&self) -> Option<&Arc<dyn ActivityHandler>> {
        self.handler.as_ref()
    }
}

impl fmt::Debug for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityType")
            .field("domain", &self.domain)
            .field("type_ref", &self.type_ref)
            .field("options", &self.options)
            .field("failure_policy", &self.failure_policy)
            .field("next_activity", &self.next_activity)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Domain as resolved by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainInfo {
    pub name: String,
    pub retention_period_days: u32,
}

#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    source: Arc<dyn TaskSource>,
    metadata: ActivityMetadata,
    domains: Mutex<HashMap<String, Arc<DomainInfo>>>,
    workflows: Mutex<HashMap<TypeKey, Arc<WorkflowType>>>,
    activities: Mutex<HashMap<TypeKey, Arc<ActivityType>>>,
    reconstructed: Mutex<HashMap<TypeKey, Arc<ActivityType>>>,
}

impl Registry {
    pub fn new(source: Arc<dyn TaskSource>, metadata_store: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                source,
                metadata: ActivityMetadata::new(metadata_store),
                domains: Mutex::new(HashMap::new()),
                workflows: Mutex::new(HashMap::new()),
                activities: Mutex::new(HashMap::new()),
                reconstructed: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn task_source(&self) -> &Arc<dyn TaskSource> {
        &self.inner.source
    }

    /// Resolves a domain, registering it remotely with the default retention
    /// period if it does not exist.
    pub async fn domain(&self, name: &str) -> Result<Domain, RegistryError> {
        self.domain_with_retention(name, DEFAULT_RETENTION_DAYS).await
    }

    /// Like [`Registry::domain`]. `retention_period_days` only applies when
    /// the domain has to be created; an existing domain keeps its own.
    pub async fn domain_with_retention(&self, name: &str, retention_period_days: u32) -> Result<Domain, RegistryError> {
        let mut domains = self.inner.domains.lock().await;
        if let Some(info) = domains.get(name) {
            return Ok(Domain {
                info: info.clone(),
                registry: self.clone(),
            });
        }

        let domain_err = |source: ProviderError| RegistryError::Domain {
            domain: name.to_string(),
            source,
        };
        let source = &self.inner.source;
        let info = match source.describe_domain(name).await.map_err(domain_err)? {
            Some(desc) => DomainInfo {
                name: desc.name,
                retention_period_days: desc.retention_period_days,
            },
            None => {
                match source.register_domain(name, retention_period_days).await {
                    Ok(()) => info!(
                        target: "taskchain::runtime::registry",
                        domain = %name,
                        retention_period_days,
                        "domain registered"
                    ),
                    Err(e) if e.is_already_exists() => {
                        debug!(target: "taskchain::runtime::registry", domain = %name, "domain registered concurrently")
                    }
                    Err(e) => return Err(domain_err(e)),
                }
                DomainInfo {
                    name: name.to_string(),
                    retention_period_days,
                }
            }
        };

        let info = Arc::new(info);
        domains.insert(name.to_string(), info.clone());
        Ok(Domain {
            info,
            registry: self.clone(),
        })
    }

    /// Declares a workflow type in `domain`.
    ///
    /// The first registration of a triple applies `configure`, validates the
    /// result and registers the type with the task source. A type that already
    /// exists remotely is not an error. Later registrations of the same triple
    /// return the first descriptor without calling `configure`.
    pub async fn register_workflow<F>(
        &self,
        domain: &str,
        name: &str,
        version: &str,
        configure: F,
    ) -> Result<Arc<WorkflowType>, RegistryError>
    where
        F: FnOnce(&mut WorkflowConfig),
    {
        let type_ref = TypeRef::new(name, version);
        validate_version(&type_ref)?;
        let key = TypeKey::new(domain, &type_ref);

        let mut workflows = self.inner.workflows.lock().await;
        if let Some(existing) = workflows.get(&key) {
            debug!(target: "taskchain::runtime::registry", domain, workflow = %type_ref, "workflow already registered");
            return Ok(existing.clone());
        }

        let mut config = WorkflowConfig::new(&type_ref);
        configure(&mut config);
        let workflow = Arc::new(config.build(domain)?);

        match self
            .inner
            .source
            .register_workflow_type(domain, &type_ref, workflow.options())
            .await
        {
            Ok(()) => info!(
                target: "taskchain::runtime::registry",
                domain,
                workflow = %type_ref,
                task_list = %workflow.task_list(),
                "workflow type registered"
            ),
            Err(e) if e.is_already_exists() => debug!(
                target: "taskchain::runtime::registry",
                domain,
                workflow = %type_ref,
                "workflow type already registered remotely"
            ),
            Err(source) => {
                return Err(RegistryError::Registration {
                    kind: "workflow",
                    type_ref,
                    source,
                });
            }
        }

        workflows.insert(key, workflow.clone());
        Ok(workflow)
    }

    /// Declares an activity type in `domain` and persists its failure policy
    /// and next activity to the metadata store. Same idempotency rules as
    /// [`Registry::register_workflow`].
    pub async fn register_activity<F>(
        &self,
        domain: &str,
        name: &str,
        version: &str,
        configure: F,
    ) -> Result<Arc<ActivityType>, RegistryError>
    where
        F: FnOnce(&mut ActivityConfig),
    {
        let type_ref = TypeRef::new(name, version);
        validate_version(&type_ref)?;
        let key = TypeKey::new(domain, &type_ref);

        let mut activities = self.inner.activities.lock().await;
        if let Some(existing) = activities.get(&key) {
            debug!(target: "taskchain::runtime::registry", domain, activity = %type_ref, "activity already registered");
            return Ok(existing.clone());
        }

        let mut config = ActivityConfig::new(&type_ref);
        configure(&mut config);
        let activity = Arc::new(config.build(domain)?);

        match self
            .inner
            .source
            .register_activity_type(domain, &type_ref, activity.options())
            .await
        {
            Ok(()) => info!(
                target: "taskchain::runtime::registry",
                domain,
                activity = %type_ref,
                task_list = %activity.task_list(),
                "activity type registered"
            ),
            Err(e) if e.is_already_exists() => debug!(
                target: "taskchain::runtime::registry",
                domain,
                activity = %type_ref,
                "activity type already registered remotely"
            ),
            Err(source) => {
                return Err(RegistryError::Registration {
                    kind: "activity",
                    type_ref,
                    source,
                });
            }
        }

        self.inner
            .metadata
            .save(domain, &type_ref, activity.failure_policy(), activity.next_activity())
            .await
            .map_err(|source| RegistryError::Metadata {
                type_ref: type_ref.clone(),
                source,
            })?;

        self.inner.reconstructed.lock().await.remove(&key);
        activities.insert(key, activity.clone());
        Ok(activity)
    }

    pub async fn workflow(&self, domain: &str, type_ref: &TypeRef) -> Option<Arc<WorkflowType>> {
        let workflows = self.inner.workflows.lock().await;
        let found = workflows.get(&TypeKey::new(domain, type_ref)).cloned();
        if found.is_none() {
            let registered: Vec<String> = workflows
                .keys()
                .filter(|k| k.domain == domain)
                .map(|k| k.type_ref.to_string())
                .collect();
            debug!(
                target: "taskchain::runtime::registry",
                domain,
                requested = %type_ref,
                registered = ?registered,
                "workflow lookup miss"
            );
        }
        found
    }

    /// Activity declared in this process, if any.
    pub async fn declared_activity(&self, domain: &str, type_ref: &TypeRef) -> Option<Arc<ActivityType>> {
        self.inner
            .activities
            .lock()
            .await
            .get(&TypeKey::new(domain, type_ref))
            .cloned()
    }

    /// Resolves an activity descriptor: the local declaration if there is one,
    /// otherwise a default descriptor overlaid with the stored record.
    /// Descriptors built from a stored record are cached for the lifetime of
    /// the registry. Defaults are not, so a record written later by the
    /// declaring process is still picked up.
    pub async fn activity(&self, domain: &str, type_ref: &TypeRef) -> Result<Arc<ActivityType>, RegistryError> {
        if let Some(declared) = self.declared_activity(domain, type_ref).await {
            return Ok(declared);
        }

        let key = TypeKey::new(domain, type_ref);
        let mut reconstructed = self.inner.reconstructed.lock().await;
        if let Some(cached) = reconstructed.get(&key) {
            return Ok(cached.clone());
        }

        let overlay = self
            .inner
            .metadata
            .load(domain, type_ref)
            .await
            .map_err(|source| RegistryError::Metadata {
                type_ref: type_ref.clone(),
                source,
            })?;
        debug!(
            target: "taskchain::runtime::registry",
            domain,
            activity = %type_ref,
            overlay = ?overlay,
            "activity reconstructed from metadata"
        );
        let found = overlay.is_some();
        let activity = Arc::new(ActivityType::reconstructed(domain, type_ref, overlay));
        if found {
            reconstructed.insert(key, activity.clone());
        }
        Ok(activity)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

// ============================================================================
// Domain handle
// ============================================================================

/// Handle to a resolved domain. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Domain {
    info: Arc<DomainInfo>,
    registry: Registry,
}

impl Domain {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn retention_period_days(&self) -> u32 {
        self.info.retention_period_days
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn register_workflow<F>(&self, name: &str, version: &str, configure: F) -> Result<Arc<WorkflowType>, RegistryError>
    where
        F: FnOnce(&mut WorkflowConfig),
    {
        self.registry
            .register_workflow(self.name(), name, version, configure)
            .await
    }

    pub async fn register_activity<F>(&self, name: &str, version: &str, configure: F) -> Result<Arc<ActivityType>, RegistryError>
    where
        F: FnOnce(&mut ActivityConfig),
    {
        self.registry
            .register_activity(self.name(), name, version, configure)
            .await
    }

    pub async fn workflow(&self, name: &str, version: &str) -> Option<Arc<WorkflowType>> {
        self.registry
            .workflow(self.name(), &TypeRef::new(name, version))
            .await
    }

    pub async fn activity(&self, name: &str, version: &str) -> Result<Arc<ActivityType>, RegistryError> {
        self.registry
            .activity(self.name(), &TypeRef::new(name, version))
            .await
    }

    /// Starts an execution of a workflow type registered in this domain.
    pub async fn start_workflow(
        &self,
        name: &str,
        version: &str,
        workflow_id: &str,
        input: Option<String>,
    ) -> Result<WorkflowExecution, ProviderError> {
        let workflow_type = TypeRef::new(name, version);
        let execution = self
            .registry
            .task_source()
            .start_workflow_execution(self.name(), &workflow_type, workflow_id, input)
            .await?;
        info!(
            target: "taskchain::runtime::registry",
            domain = %self.name(),
            workflow = %workflow_type,
            workflow_id = %execution.workflow_id,
            run_id = %execution.run_id,
            "workflow execution started"
        );
        Ok(execution)
    }

    /// Activity tasks waiting on `task_list` that no worker has picked up.
    pub async fn count_pending_activity_tasks(&self, task_list: &str) -> Result<u64, ProviderError> {
        self.registry
            .task_source()
            .count_pending_activity_tasks(self.name(), task_list)
            .await
    }
}
