use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde_json::{Value, json};
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, info, trace, warn};

use crate::errors::{ActivityError, RegistryError};
use crate::providers::ActivityTask;
use crate::runtime::registry::{ActivityType, Registry};
use crate::runtime::reporter::ReportContext;
use crate::runtime::{WorkerExit, WorkerOptions};
use crate::{FailurePolicy, TypeRef};

/// Longest failure reason sent to the task source, in characters.
pub(crate) const MAX_REASON_CHARS: usize = 250;

/// Sequential poll/perform loop for one activity type.
pub(crate) struct ActivityWorker {
    worker_id: String,
    registry: Registry,
    activity: Arc<ActivityType>,
    options: WorkerOptions,
    stop: Arc<AtomicBool>,
}

pub(crate) fn truncate_reason(message: &str) -> String {
    message.chars().take(MAX_REASON_CHARS).collect()
}

/// Result sent on completion. A declared next activity is embedded so the
/// decider can chain without its own copy of the descriptor, unless the
/// handler already named one.
pub(crate) fn completion_payload(activity: &ActivityType, output: String) -> Option<String> {
    let Some(next) = activity.next_activity() else {
        return (!output.is_empty()).then_some(output);
    };
    let names_next = serde_json::from_str::<Value>(&output)
        .ok()
        .is_some_and(|v| v.get("next_activity").is_some());
    if names_next {
        return Some(output);
    }
    Some(
        json!({
            "next_activity": {"name": next.name, "version": next.version},
            "result": output,
        })
        .to_string(),
    )
}

// Aborts the handler task when the worker is dropped mid-await, as on an
// immediate shutdown.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl ActivityWorker {
    pub(crate) fn new(
        worker_id: String,
        registry: Registry,
        activity: Arc<ActivityType>,
        options: WorkerOptions,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            worker_id,
            registry,
            activity,
            options,
            stop,
        }
    }

    pub(crate) async fn run(self) -> WorkerExit {
        info!(
            target: "taskchain::runtime::activity",
            worker_id = %self.worker_id,
            domain = %self.activity.domain(),
            task_list = %self.activity.task_list(),
            activity = %self.activity.type_ref(),
            "activity worker started"
        );
        if let Some(hook) = &self.options.on_worker_start {
            hook(&self.worker_id);
        }

        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!(
                    target: "taskchain::runtime::activity",
                    worker_id = %self.worker_id,
                    "stop requested; activity worker exiting"
                );
                return WorkerExit::Stopped;
            }

            // Activity workers survive every error; failures are reported where they occur.
            if let Err(e) = self.poll_once().await {
                warn!(
                    target: "taskchain::runtime::activity",
                    worker_id = %self.worker_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    backoff_ms = self.options.error_backoff.as_millis() as u64,
                    "activity worker error; backing off"
                );
                tokio::time::sleep(self.options.error_backoff).await;
            }
        }
    }

    /// One poll and, if a task arrived, one execution. `Ok(false)` on timeout.
    pub(crate) async fn poll_once(&self) -> Result<bool, ActivityError> {
        let polled = self
            .registry
            .task_source()
            .poll_activity_task(
                self.activity.domain(),
                self.activity.task_list(),
                self.options.poll_timeout,
            )
            .await;

        let task = match polled {
            Ok(Some(task)) => task,
            Ok(None) => {
                trace!(
                    target: "taskchain::runtime::activity",
                    worker_id = %self.worker_id,
                    "poll timed out"
                );
                return Ok(false);
            }
            Err(e) => {
                let err = ActivityError::from(e);
                if !err.is_retryable() {
                    self.report(&err, None);
                }
                return Err(err);
            }
        };

        self.process(task).await?;
        Ok(true)
    }

    async fn process(&self, task: ActivityTask) -> Result<(), ActivityError> {
        let activity = match self.resolve_activity(task.activity_type()).await {
            Ok(activity) => activity,
            Err(e) => {
                self.report(&e, Some(&task));
                return self
                    .fail_task(&task, FailurePolicy::Fail, &e.to_string())
                    .await;
            }
        };
        let Some(handler) = activity.handler().cloned() else {
            let err = ActivityError::from(RegistryError::MissingHandler(activity.type_ref().clone()));
            self.report(&err, Some(&task));
            return self
                .fail_task(&task, activity.failure_policy(), &err.to_string())
                .await;
        };

        debug!(
            target: "taskchain::runtime::activity",
            worker_id = %self.worker_id,
            workflow_id = %task.execution().workflow_id,
            run_id = %task.execution().run_id,
            activity = %activity.type_ref(),
            activity_id = %task.activity_id(),
            "activity started"
        );
        let started = Instant::now();

        // A panicking handler takes down only its own task.
        let handle = tokio::spawn({
            let task = task.clone();
            async move { handler.perform(task).await }
        });
        let _abort = AbortOnDrop(handle.abort_handle());
        let joined = handle.await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let message = match joined {
            Ok(Ok(output)) => {
                if task.is_responded() {
                    debug!(
                        target: "taskchain::runtime::activity",
                        worker_id = %self.worker_id,
                        activity_id = %task.activity_id(),
                        duration_ms,
                        "handler responded itself"
                    );
                    return Ok(());
                }
                if let Err(e) = task.complete(completion_payload(&activity, output)).await {
                    self.report(&e, Some(&task));
                    return Err(e);
                }
                info!(
                    target: "taskchain::runtime::activity",
                    worker_id = %self.worker_id,
                    workflow_id = %task.execution().workflow_id,
                    run_id = %task.execution().run_id,
                    activity = %activity.type_ref(),
                    activity_id = %task.activity_id(),
                    outcome = "success",
                    duration_ms,
                    "activity completed"
                );
                return Ok(());
            }
            Ok(Err(message)) => {
                let err = ActivityError::Failed {
                    activity: activity.type_ref().clone(),
                    message: message.clone(),
                };
                self.report(&err, Some(&task));
                message
            }
            Err(join_err) => {
                let err = ActivityError::Panicked {
                    activity: activity.type_ref().clone(),
                    message: panic_message(join_err),
                };
                self.report(&err, Some(&task));
                err.to_string()
            }
        };

        warn!(
            target: "taskchain::runtime::activity",
            worker_id = %self.worker_id,
            workflow_id = %task.execution().workflow_id,
            run_id = %task.execution().run_id,
            activity = %activity.type_ref(),
            activity_id = %task.activity_id(),
            outcome = "failure",
            duration_ms,
            error = %message,
            "activity failed"
        );
        if task.is_responded() {
            return Ok(());
        }
        self.fail_task(&task, activity.failure_policy(), &message).await
    }

    async fn resolve_activity(&self, activity_type: &TypeRef) -> Result<Arc<ActivityType>, ActivityError> {
        if activity_type == self.activity.type_ref() {
            return Ok(self.activity.clone());
        }
        self.registry
            .declared_activity(self.activity.domain(), activity_type)
            .await
            .ok_or_else(|| ActivityError::UnknownActivityType(activity_type.clone()))
    }

    async fn fail_task(&self, task: &ActivityTask, policy: FailurePolicy, message: &str) -> Result<(), ActivityError> {
        let details = json!({ "failure_policy": policy.as_str() }).to_string();
        let sent = task.fail(Some(truncate_reason(message)), Some(details)).await;
        if let Err(e) = &sent {
            self.report(e, Some(task));
        }
        sent
    }

    fn report(&self, error: &ActivityError, task: Option<&ActivityTask>) {
        let mut context = ReportContext::new();
        context.insert("worker_id".into(), self.worker_id.clone());
        context.insert("domain".into(), self.activity.domain().to_string());
        context.insert("task_list".into(), self.activity.task_list().to_string());
        context.insert("activity".into(), self.activity.type_ref().to_string());
        if let Some(task) = task {
            context.insert("workflow_id".into(), task.execution().workflow_id.clone());
            context.insert("run_id".into(), task.execution().run_id.clone());
            context.insert("activity_id".into(), task.activity_id().to_string());
            context.insert("task_activity_type".into(), task.activity_type().to_string());
            context.insert("input".into(), task.input().unwrap_or_default().to_string());
        }
        self.options.reporter.report(error, &context);
    }
}
