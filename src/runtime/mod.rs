//! Worker runtime.
//!
//! A [`Runtime`] owns a set of child workers. Each worker is an independent
//! tokio task running a strictly sequential poll, dispatch, respond loop for
//! one workflow type (decision worker) or one activity type (activity worker).
//! Workers share nothing but the registry, the task source and the metadata
//! store.
//!
//! Shutdown has two modes:
//! - graceful: every worker finishes the task in hand, or waits out its
//!   current poll, and exits with [`WorkerExit::Stopped`];
//! - immediate: workers are aborted wherever they are.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::errors::{ActivityError, DecisionError, RegistryError};
use crate::providers::ActivityTask;

pub mod dispatch;
mod dispatchers;
pub mod handlers;
pub mod metadata;
pub mod observability;
pub mod registry;
pub mod reporter;

use dispatchers::{ActivityWorker, DecisionWorker};
use registry::{ActivityType, Registry, WorkflowType};
use reporter::{DefaultExceptionReporter, ExceptionReporter};

/// Business logic of an activity type.
///
/// `Ok` output becomes the task result. `Err` fails the task with the message
/// as its reason. A handler may respond through the task itself, in which
/// case the runtime sends nothing further.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn perform(&self, task: ActivityTask) -> Result<String, String>;
}

/// Closure wrapper that implements `ActivityHandler`.
pub struct FnActivity<F>(pub F);

#[async_trait]
impl<F, Fut> ActivityHandler for FnActivity<F>
where
    F: Fn(ActivityTask) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, String>> + Send + 'static,
{
    async fn perform(&self, task: ActivityTask) -> Result<String, String> {
        (self.0)(task).await
    }
}

pub type WorkerStartHook = Arc<dyn Fn(&str) + Send + Sync>;

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Configuration shared by every worker of a runtime.
#[derive(Clone)]
pub struct WorkerOptions {
    /// Long-poll timeout passed to the task source. Also bounds how long a
    /// graceful stop waits for an idle worker.
    pub poll_timeout: Duration,
    /// Pause after a retryable poll error.
    pub error_backoff: Duration,
    pub reporter: Arc<dyn ExceptionReporter>,
    /// Called with the worker id when a worker starts, before its first poll.
    pub on_worker_start: Option<WorkerStartHook>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            reporter: Arc::new(DefaultExceptionReporter::default()),
            on_worker_start: None,
        }
    }
}

impl std::fmt::Debug for WorkerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerOptions")
            .field("poll_timeout", &self.poll_timeout)
            .field("error_backoff", &self.error_backoff)
            .field("on_worker_start", &self.on_worker_start.is_some())
            .finish_non_exhaustive()
    }
}

fn env_duration(var: &str, unit: fn(u64) -> Duration) -> Option<Duration> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(unit(value)),
        Err(e) => {
            warn!(target: "taskchain::runtime", var, value = %raw, error = %e, "ignoring invalid setting");
            None
        }
    }
}

impl WorkerOptions {
    /// Defaults overridden by `TASKCHAIN_POLL_TIMEOUT_SECS` and
    /// `TASKCHAIN_ERROR_BACKOFF_MS` when set.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(timeout) = env_duration("TASKCHAIN_POLL_TIMEOUT_SECS", Duration::from_secs) {
            options.poll_timeout = timeout;
        }
        if let Some(backoff) = env_duration("TASKCHAIN_ERROR_BACKOFF_MS", Duration::from_millis) {
            options.error_backoff = backoff;
        }
        options
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_reporter(mut self, reporter: impl ExceptionReporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    pub fn on_worker_start(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_worker_start = Some(Arc::new(hook));
        self
    }
}

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Honoured a graceful stop request.
    Stopped,
    /// Hit an error it does not survive.
    Failed(String),
    /// Aborted by an immediate shutdown.
    Killed,
    Panicked(String),
}

impl WorkerExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, WorkerExit::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: String,
    pub exit: WorkerExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Graceful,
    Immediate,
}

struct ChildWorker {
    worker_id: String,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<WorkerExit>,
}

// Decrements the live worker count when the worker future is dropped,
// including on abort and panic.
struct LiveGuard(Arc<watch::Sender<usize>>);

impl LiveGuard {
    fn new(live: &Arc<watch::Sender<usize>>) -> Self {
        live.send_modify(|n| *n += 1);
        Self(live.clone())
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

pub struct Runtime {
    registry: Registry,
    options: WorkerOptions,
    children: Mutex<Vec<ChildWorker>>,
    live: Arc<watch::Sender<usize>>,
}

impl Runtime {
    pub fn new(registry: Registry, options: WorkerOptions) -> Self {
        let (live, _) = watch::channel(0usize);
        Self {
            registry,
            options,
            children: Mutex::new(Vec::new()),
            live: Arc::new(live),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Spawns `workers` decision workers for `workflow` and returns their ids.
    pub async fn start_decision_loop(&self, workflow: &Arc<WorkflowType>, workers: usize) -> Vec<String> {
        let mut children = self.children.lock().await;
        let mut ids = Vec::with_capacity(workers);
        for _ in 0..workers {
            let worker_id = format!("decision-{}-{}", children.len(), workflow.type_ref());
            let stop = Arc::new(AtomicBool::new(false));
            let worker = DecisionWorker::new(
                worker_id.clone(),
                self.registry.clone(),
                workflow.clone(),
                self.options.clone(),
                stop.clone(),
            );
            let guard = LiveGuard::new(&self.live);
            let handle = tokio::spawn(async move {
                let _guard = guard;
                worker.run().await
            });
            ids.push(worker_id.clone());
            children.push(ChildWorker { worker_id, stop, handle });
        }
        info!(
            target: "taskchain::runtime",
            workflow = %workflow.type_ref(),
            task_list = %workflow.task_list(),
            workers,
            "decision loop started"
        );
        ids
    }

    /// Spawns `workers` activity workers for `activity` and returns their ids.
    ///
    /// # Errors
    ///
    /// Fails if the activity has no perform handler.
    pub async fn start_activity_loop(
        &self,
        activity: &Arc<ActivityType>,
        workers: usize,
    ) -> Result<Vec<String>, RegistryError> {
        if activity.handler().is_none() {
            return Err(RegistryError::MissingHandler(activity.type_ref().clone()));
        }
        let mut children = self.children.lock().await;
        let mut ids = Vec::with_capacity(workers);
        for _ in 0..workers {
            let worker_id = format!("activity-{}-{}", children.len(), activity.type_ref());
            let stop = Arc::new(AtomicBool::new(false));
            let worker = ActivityWorker::new(
                worker_id.clone(),
                self.registry.clone(),
                activity.clone(),
                self.options.clone(),
                stop.clone(),
            );
            let guard = LiveGuard::new(&self.live);
            let handle = tokio::spawn(async move {
                let _guard = guard;
                worker.run().await
            });
            ids.push(worker_id.clone());
            children.push(ChildWorker { worker_id, stop, handle });
        }
        info!(
            target: "taskchain::runtime",
            activity = %activity.type_ref(),
            task_list = %activity.task_list(),
            workers,
            "activity loop started"
        );
        Ok(ids)
    }

    pub async fn worker_ids(&self) -> Vec<String> {
        self.children
            .lock()
            .await
            .iter()
            .map(|c| c.worker_id.clone())
            .collect()
    }

    /// Workers whose task has not finished yet.
    pub fn live_workers(&self) -> usize {
        *self.live.borrow()
    }

    /// Asks every worker to exit at its next loop boundary, without waiting.
    pub async fn request_stop(&self) {
        for child in self.children.lock().await.iter() {
            child.stop.store(true, Ordering::SeqCst);
        }
    }

    /// Stops every worker and waits for all of them.
    pub async fn shutdown(&self, mode: ShutdownMode) -> Vec<WorkerReport> {
        info!(target: "taskchain::runtime", mode = ?mode, "shutting down workers");
        {
            let children = self.children.lock().await;
            for child in children.iter() {
                match mode {
                    ShutdownMode::Graceful => child.stop.store(true, Ordering::SeqCst),
                    ShutdownMode::Immediate => child.handle.abort(),
                }
            }
        }
        self.join().await
    }

    /// Waits for every worker started so far to exit on its own.
    pub async fn join(&self) -> Vec<WorkerReport> {
        let children: Vec<ChildWorker> = std::mem::take(&mut *self.children.lock().await);
        let mut reports = Vec::with_capacity(children.len());
        for child in children {
            let exit = match child.handle.await {
                Ok(exit) => exit,
                Err(e) if e.is_cancelled() => WorkerExit::Killed,
                Err(e) => WorkerExit::Panicked(e.to_string()),
            };
            info!(target: "taskchain::runtime", worker_id = %child.worker_id, exit = ?exit, "worker exited");
            reports.push(WorkerReport {
                worker_id: child.worker_id,
                exit,
            });
        }
        reports
    }

    /// Runs until a shutdown signal arrives or every worker has exited.
    ///
    /// SIGTERM and SIGQUIT stop gracefully, SIGINT immediately.
    ///
    /// # Errors
    ///
    /// Fails if signal handlers cannot be installed.
    pub async fn run_until_signal(&self) -> std::io::Result<Vec<WorkerReport>> {
        let mut live = self.live.subscribe();
        tokio::select! {
            mode = shutdown_signal() => {
                let mode = mode?;
                info!(target: "taskchain::runtime", mode = ?mode, "shutdown signal received");
                Ok(self.shutdown(mode).await)
            }
            _ = live.wait_for(|n| *n == 0) => Ok(self.join().await),
        }
    }

    /// Polls once for a decision task of `workflow` and processes it.
    /// Returns `Ok(false)` when the poll timed out.
    pub async fn poll_for_single_decision_task(&self, workflow: &Arc<WorkflowType>) -> Result<bool, DecisionError> {
        let worker = DecisionWorker::new(
            format!("decision-single-{}", workflow.type_ref()),
            self.registry.clone(),
            workflow.clone(),
            self.options.clone(),
            Arc::new(AtomicBool::new(false)),
        );
        worker.poll_once().await
    }

    /// Polls once for an activity task of `activity` and runs it.
    /// Returns `Ok(false)` when the poll timed out.
    pub async fn poll_for_single_activity_task(&self, activity: &Arc<ActivityType>) -> Result<bool, ActivityError> {
        let worker = ActivityWorker::new(
            format!("activity-single-{}", activity.type_ref()),
            self.registry.clone(),
            activity.clone(),
            self.options.clone(),
            Arc::new(AtomicBool::new(false)),
        );
        worker.poll_once().await
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<ShutdownMode> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    Ok(tokio::select! {
        _ = term.recv() => ShutdownMode::Graceful,
        _ = quit.recv() => ShutdownMode::Graceful,
        _ = interrupt.recv() => ShutdownMode::Immediate,
    })
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<ShutdownMode> {
    tokio::signal::ctrl_c().await?;
    Ok(ShutdownMode::Immediate)
}
