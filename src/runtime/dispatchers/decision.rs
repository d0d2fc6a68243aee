use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use crate::errors::DecisionError;
use crate::providers::DecisionTask;
use crate::runtime::WorkerExit;
use crate::runtime::WorkerOptions;
use crate::runtime::dispatch::DecisionContext;
use crate::runtime::registry::{Registry, WorkflowType};
use crate::runtime::reporter::ReportContext;
use crate::TypeRef;

/// Sequential poll/dispatch loop for one workflow type.
pub(crate) struct DecisionWorker {
    worker_id: String,
    registry: Registry,
    workflow: Arc<WorkflowType>,
    options: WorkerOptions,
    stop: Arc<AtomicBool>,
}

impl DecisionWorker {
    pub(crate) fn new(
        worker_id: String,
        registry: Registry,
        workflow: Arc<WorkflowType>,
        options: WorkerOptions,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            worker_id,
            registry,
            workflow,
            options,
            stop,
        }
    }

    pub(crate) async fn run(self) -> WorkerExit {
        info!(
            target: "taskchain::runtime::decision",
            worker_id = %self.worker_id,
            domain = %self.workflow.domain(),
            task_list = %self.workflow.task_list(),
            workflow = %self.workflow.type_ref(),
            "decision worker started"
        );
        if let Some(hook) = &self.options.on_worker_start {
            hook(&self.worker_id);
        }

        loop {
            // Checked only between tasks: a task in hand is always finished.
            if self.stop.load(Ordering::SeqCst) {
                info!(
                    target: "taskchain::runtime::decision",
                    worker_id = %self.worker_id,
                    "stop requested; decision worker exiting"
                );
                return WorkerExit::Stopped;
            }

            let task = match self.poll().await {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(e) if e.is_retryable() => {
                    warn!(
                        target: "taskchain::runtime::decision",
                        worker_id = %self.worker_id,
                        error = %e,
                        backoff_ms = self.options.error_backoff.as_millis() as u64,
                        "transient poll error; backing off"
                    );
                    tokio::time::sleep(self.options.error_backoff).await;
                    continue;
                }
                Err(e) => return self.terminate(e),
            };

            // Processing errors are never retried; the task was already reported.
            if let Err(e) = self.process(task).await {
                return self.terminate(e);
            }
        }
    }

    fn terminate(&self, e: DecisionError) -> WorkerExit {
        error!(
            target: "taskchain::runtime::decision",
            worker_id = %self.worker_id,
            error = %e,
            "decision worker terminating"
        );
        WorkerExit::Failed(e.to_string())
    }

    /// One poll and, if a task arrived, one dispatch. `Ok(false)` on timeout.
    pub(crate) async fn poll_once(&self) -> Result<bool, DecisionError> {
        match self.poll().await? {
            Some(task) => {
                self.process(task).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn poll(&self) -> Result<Option<DecisionTask>, DecisionError> {
        let polled = self
            .registry
            .task_source()
            .poll_decision_task(
                self.workflow.domain(),
                self.workflow.task_list(),
                self.options.poll_timeout,
            )
            .await;

        match polled {
            Ok(Some(task)) => Ok(Some(task)),
            Ok(None) => {
                trace!(
                    target: "taskchain::runtime::decision",
                    worker_id = %self.worker_id,
                    "poll timed out"
                );
                Ok(None)
            }
            Err(e) => {
                let err = DecisionError::from(e);
                if !err.is_retryable() {
                    self.report(&err, None);
                }
                Err(err)
            }
        }
    }

    async fn process(&self, mut task: DecisionTask) -> Result<(), DecisionError> {
        let started = Instant::now();
        debug!(
            target: "taskchain::runtime::decision",
            worker_id = %self.worker_id,
            workflow_id = %task.execution().workflow_id,
            run_id = %task.execution().run_id,
            workflow = %task.workflow_type(),
            new_events = task.new_events().len(),
            "decision task received"
        );

        let result = match self.resolve_workflow(task.workflow_type()).await {
            Ok(workflow) => {
                let ctx = DecisionContext::new(self.registry.clone(), workflow.clone());
                workflow.dispatcher().dispatch(&ctx, &mut task).await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => debug!(
                target: "taskchain::runtime::decision",
                worker_id = %self.worker_id,
                workflow_id = %task.execution().workflow_id,
                run_id = %task.execution().run_id,
                responded = task.is_responded(),
                duration_ms = started.elapsed().as_millis() as u64,
                "decision task processed"
            ),
            Err(e) => self.report(e, Some(&task)),
        }
        result
    }

    async fn resolve_workflow(&self, workflow_type: &TypeRef) -> Result<Arc<WorkflowType>, DecisionError> {
        if workflow_type == self.workflow.type_ref() {
            return Ok(self.workflow.clone());
        }
        self.registry
            .workflow(self.workflow.domain(), workflow_type)
            .await
            .ok_or_else(|| DecisionError::UnknownWorkflowType(workflow_type.clone()))
    }

    fn report(&self, error: &DecisionError, task: Option<&DecisionTask>) {
        let mut context = ReportContext::new();
        context.insert("worker_id".into(), self.worker_id.clone());
        context.insert("domain".into(), self.workflow.domain().to_string());
        context.insert("task_list".into(), self.workflow.task_list().to_string());
        context.insert("workflow".into(), self.workflow.type_ref().to_string());
        if let Some(task) = task {
            context.insert("workflow_id".into(), task.execution().workflow_id.clone());
            context.insert("run_id".into(), task.execution().run_id.clone());
            context.insert("task_workflow_type".into(), task.workflow_type().to_string());
        }
        self.options.reporter.report(error, &context);
    }
}
