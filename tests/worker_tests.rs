mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use futures::future::join_all;
use serde_json::json;
use tokio::sync::Notify;
use taskchain::providers::ProviderError;
use taskchain::providers::in_memory::ExecutionStatus;
use taskchain::{Decision, FailurePolicy, RegistryError, Runtime, ShutdownMode, TimeoutType, WorkerExit, WorkerOptions};

fn reporting(reporter: &Arc<CapturingReporter>) -> WorkerOptions {
    let mut options = fast_options();
    options.reporter = reporter.clone();
    options
}

fn policy_details(policy: &str) -> Option<String> {
    Some(json!({ "failure_policy": policy }).to_string())
}

#[tokio::test]
async fn two_step_chain_completes_with_success() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let inputs = Arc::new(Mutex::new(Vec::new()));

    let seen = inputs.clone();
    let a = domain
        .register_activity("a", "1.0.0", move |cfg| {
            cfg.on_success("b", "1.0.0").perform(move |task| {
                let seen = seen.clone();
                async move {
                    let input = task.input().unwrap_or_default().to_string();
                    seen.lock().unwrap().push(("a", input.clone()));
                    Ok::<_, String>(format!("a:{input}"))
                }
            });
        })
        .await
        .unwrap();
    let seen = inputs.clone();
    let b = domain
        .register_activity("b", "1.0.0", move |cfg| {
            cfg.perform(move |task| {
                let seen = seen.clone();
                async move {
                    seen.lock()
                        .unwrap()
                        .push(("b", task.input().unwrap_or_default().to_string()));
                    Ok::<_, String>("b".to_string())
                }
            });
        })
        .await
        .unwrap();
    let workflow = domain
        .register_workflow("w", "1.0.0", |cfg| {
            cfg.initial_activity("a", "1.0.0");
        })
        .await
        .unwrap();

    let runtime = Runtime::new(fx.registry.clone(), fast_options());
    runtime.start_decision_loop(&workflow, 1).await;
    runtime.start_activity_loop(&a, 1).await.unwrap();
    runtime.start_activity_loop(&b, 1).await.unwrap();
    assert_eq!(runtime.live_workers(), 3);

    let run = domain
        .start_workflow("w", "1.0.0", "wf-chain", Some("X".to_string()))
        .await
        .unwrap();
    let status = wait_for_close(&fx.source, &run.run_id, 5_000).await;
    assert_eq!(
        status,
        Some(ExecutionStatus::Completed {
            result: Some("success".to_string())
        })
    );

    // Every step of the chain sees the execution input.
    assert_eq!(
        *inputs.lock().unwrap(),
        vec![("a", "X".to_string()), ("b", "X".to_string())]
    );
    let kinds: Vec<&str> = fx
        .source
        .decisions(&run.run_id)
        .await
        .iter()
        .map(Decision::kind)
        .collect();
    assert_eq!(
        kinds,
        vec!["ScheduleActivityTask", "ScheduleActivityTask", "CompleteWorkflowExecution"]
    );

    let reports = runtime.shutdown(ShutdownMode::Graceful).await;
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.exit == WorkerExit::Stopped), "{reports:?}");
    assert_eq!(runtime.live_workers(), 0);
}

#[tokio::test]
async fn retry_policy_reschedules_until_success() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    let a = domain
        .register_activity("a", "1.0.0", move |cfg| {
            cfg.on_fail(FailurePolicy::Retry).perform(move |_task| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err::<String, _>("flaky dependency".to_string())
                    } else {
                        Ok("ok".to_string())
                    }
                }
            });
        })
        .await
        .unwrap();
    let workflow = domain
        .register_workflow("w", "1.0.0", |cfg| {
            cfg.initial_activity("a", "1.0.0");
        })
        .await
        .unwrap();

    let reporter = Arc::new(CapturingReporter::default());
    let runtime = Runtime::new(fx.registry.clone(), reporting(&reporter));
    runtime.start_decision_loop(&workflow, 1).await;
    runtime.start_activity_loop(&a, 1).await.unwrap();

    let run = domain.start_workflow("w", "1.0.0", "wf-retry", None).await.unwrap();
    let status = wait_for_close(&fx.source, &run.run_id, 5_000).await;
    assert!(matches!(status, Some(ExecutionStatus::Completed { .. })), "{status:?}");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    let history = fx.source.history(&run.run_id).await;
    assert_eq!(count_events(&history, "ActivityTaskScheduled"), 2);
    assert_eq!(count_events(&history, "ActivityTaskFailed"), 1);
    let failure = history
        .iter()
        .find(|e| e.event_type == "ActivityTaskFailed")
        .unwrap();
    assert_eq!(failure.details().map(str::to_string), policy_details("retry"));
    assert_eq!(reporter.messages().len(), 1);

    runtime.shutdown(ShutdownMode::Graceful).await;
}

#[tokio::test]
async fn failing_activity_fails_workflow_with_truncated_reason() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let a = domain
        .register_activity("a", "1.0.0", |cfg| {
            cfg.perform(|_task| async move { Err::<String, _>("x".repeat(400)) });
        })
        .await
        .unwrap();
    let workflow = domain
        .register_workflow("w", "1.0.0", |cfg| {
            cfg.initial_activity("a", "1.0.0");
        })
        .await
        .unwrap();

    let reporter = Arc::new(CapturingReporter::default());
    let runtime = Runtime::new(fx.registry.clone(), reporting(&reporter));
    runtime.start_decision_loop(&workflow, 1).await;
    runtime.start_activity_loop(&a, 1).await.unwrap();

    let run = domain
        .start_workflow("w", "1.0.0", "wf-fail", Some("X".to_string()))
        .await
        .unwrap();
    match wait_for_close(&fx.source, &run.run_id, 5_000).await {
        Some(ExecutionStatus::Failed { reason, details }) => {
            assert_eq!(reason, Some("x".repeat(250)));
            assert_eq!(details, policy_details("fail"));
        }
        other => panic!("unexpected status: {other:?}"),
    }

    let reports = reporter.reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 1);
    let (message, context) = &reports[0];
    assert!(message.starts_with("activity a@1.0.0 failed"), "{message}");
    assert_eq!(context.get("input").map(String::as_str), Some("X"));
    assert_eq!(context.get("run_id"), Some(&run.run_id));
    assert_eq!(context.get("activity_id").map(String::as_str), Some("a-3"));

    runtime.shutdown(ShutdownMode::Graceful).await;
}

#[tokio::test]
async fn panicking_activity_is_contained() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let a = domain
        .register_activity("a", "1.0.0", |cfg| {
            cfg.on_fail(FailurePolicy::Cancel).perform(|task| async move {
                if task.input().is_none() {
                    panic!("kaboom");
                }
                Ok::<_, String>(String::new())
            });
        })
        .await
        .unwrap();
    let workflow = domain
        .register_workflow("w", "1.0.0", |cfg| {
            cfg.initial_activity("a", "1.0.0");
        })
        .await
        .unwrap();

    let reporter = Arc::new(CapturingReporter::default());
    let runtime = Runtime::new(fx.registry.clone(), reporting(&reporter));
    runtime.start_decision_loop(&workflow, 1).await;
    runtime.start_activity_loop(&a, 1).await.unwrap();

    let run = domain.start_workflow("w", "1.0.0", "wf-panic", None).await.unwrap();
    let status = wait_for_close(&fx.source, &run.run_id, 5_000).await;
    assert_eq!(
        status,
        Some(ExecutionStatus::Canceled {
            details: policy_details("cancel")
        })
    );
    assert_eq!(runtime.live_workers(), 2);
    assert!(reporter.messages()[0].contains("kaboom"));

    let reports = runtime.shutdown(ShutdownMode::Graceful).await;
    assert!(reports.iter().all(|r| r.exit.is_clean()), "{reports:?}");
}

#[tokio::test]
async fn handler_may_respond_itself() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let a = domain
        .register_activity("a", "1.0.0", |cfg| {
            cfg.perform(|task| async move {
                task.complete(Some("manual".to_string()))
                    .await
                    .map_err(|e| e.to_string())?;
                Ok::<_, String>("ignored".to_string())
            });
        })
        .await
        .unwrap();
    let workflow = domain
        .register_workflow("w", "1.0.0", |cfg| {
            cfg.initial_activity("a", "1.0.0");
        })
        .await
        .unwrap();

    let runtime = Runtime::new(fx.registry.clone(), fast_options());
    runtime.start_decision_loop(&workflow, 1).await;
    runtime.start_activity_loop(&a, 1).await.unwrap();

    let run = domain.start_workflow("w", "1.0.0", "wf-manual", None).await.unwrap();
    assert!(matches!(
        wait_for_close(&fx.source, &run.run_id, 5_000).await,
        Some(ExecutionStatus::Completed { .. })
    ));
    let history = fx.source.history(&run.run_id).await;
    let completions: Vec<_> = history
        .iter()
        .filter(|e| e.event_type == "ActivityTaskCompleted")
        .collect();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].result(), Some("manual"));

    runtime.shutdown(ShutdownMode::Graceful).await;
}

#[tokio::test]
async fn immediate_shutdown_kills_polling_workers() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let workflow = domain
        .register_workflow("w", "1.0.0", |cfg| {
            cfg.initial_activity("a", "1.0.0");
        })
        .await
        .unwrap();

    let options = WorkerOptions::default().with_poll_timeout(Duration::from_secs(30));
    let runtime = Runtime::new(fx.registry.clone(), options);
    runtime.start_decision_loop(&workflow, 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let reports = runtime.shutdown(ShutdownMode::Immediate).await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.exit == WorkerExit::Killed), "{reports:?}");
    assert_eq!(runtime.live_workers(), 0);
}

#[tokio::test]
async fn immediate_shutdown_abandons_a_running_handler() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let entered = Arc::new(Notify::new());
    let finished = Arc::new(AtomicBool::new(false));

    let (on_enter, on_finish) = (entered.clone(), finished.clone());
    let a = domain
        .register_activity("a", "1.0.0", move |cfg| {
            cfg.perform(move |_task| {
                let (on_enter, on_finish) = (on_enter.clone(), on_finish.clone());
                async move {
                    on_enter.notify_one();
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    on_finish.store(true, Ordering::SeqCst);
                    Ok::<_, String>(String::new())
                }
            });
        })
        .await
        .unwrap();
    let workflow = domain
        .register_workflow("w", "1.0.0", |cfg| {
            cfg.initial_activity("a", "1.0.0");
        })
        .await
        .unwrap();

    let runtime = Runtime::new(fx.registry.clone(), fast_options());
    runtime.start_decision_loop(&workflow, 1).await;
    runtime.start_activity_loop(&a, 1).await.unwrap();
    let run = domain.start_workflow("w", "1.0.0", "wf-kill", None).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("handler should start");
    let reports = runtime.shutdown(ShutdownMode::Immediate).await;
    assert!(reports.iter().all(|r| r.exit == WorkerExit::Killed), "{reports:?}");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!finished.load(Ordering::SeqCst));
    let history = fx.source.history(&run.run_id).await;
    assert_eq!(count_events(&history, "ActivityTaskCompleted"), 0);
}

#[tokio::test]
async fn graceful_stop_during_a_poll_takes_no_new_task() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let workflow = domain
        .register_workflow("w", "1.0.0", |cfg| {
            cfg.initial_activity("a", "1.0.0");
        })
        .await
        .unwrap();
    domain.register_activity("a", "1.0.0", |_| {}).await.unwrap();

    let options = fast_options().with_poll_timeout(Duration::from_millis(200));
    let runtime = Runtime::new(fx.registry.clone(), options);
    runtime.start_decision_loop(&workflow, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The worker is inside its long poll when the stop arrives.
    runtime.request_stop().await;
    assert_eq!(runtime.live_workers(), 1);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while runtime.live_workers() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "worker did not exit after its poll");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let run = domain.start_workflow("w", "1.0.0", "wf-late", None).await.unwrap();
    let reports = runtime.join().await;
    assert_eq!(reports[0].exit, WorkerExit::Stopped);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let history = fx.source.history(&run.run_id).await;
    assert_eq!(count_events(&history, "DecisionTaskStarted"), 0);
    assert_eq!(count_events(&history, "DecisionTaskCompleted"), 0);
    assert_eq!(count_events(&history, "ActivityTaskScheduled"), 0);
}

#[tokio::test]
async fn retryable_respond_failure_still_ends_the_decision_worker() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let workflow = domain
        .register_workflow("w", "1.0.0", |cfg| {
            cfg.initial_activity("a", "1.0.0");
        })
        .await
        .unwrap();
    domain.register_activity("a", "1.0.0", |_| {}).await.unwrap();

    fx.source
        .inject_response_error(ProviderError::retryable("respond_decision_task_completed", "throttled"))
        .await;
    let reporter = Arc::new(CapturingReporter::default());
    let runtime = Runtime::new(fx.registry.clone(), reporting(&reporter));
    runtime.start_decision_loop(&workflow, 1).await;
    let run = domain.start_workflow("w", "1.0.0", "wf-respond", None).await.unwrap();

    let reports = tokio::time::timeout(Duration::from_secs(5), runtime.join())
        .await
        .expect("worker should stop on its own");
    assert!(
        matches!(&reports[0].exit, WorkerExit::Failed(m) if m.contains("throttled")),
        "{reports:?}"
    );
    assert_eq!(runtime.live_workers(), 0);

    let captured = reporter.reports.lock().unwrap().clone();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].0, "respond_decision_task_completed: throttled");
    assert_eq!(captured[0].1.get("run_id"), Some(&run.run_id));
}

#[tokio::test]
async fn activity_response_failures_are_reported() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let ok = domain
        .register_activity("ok", "1.0.0", |cfg| {
            cfg.perform(|_task| async move { Ok::<_, String>("done".to_string()) });
        })
        .await
        .unwrap();
    let broken = domain
        .register_activity("broken", "1.0.0", |cfg| {
            cfg.perform(|_task| async move { Err::<String, _>("bad input".to_string()) });
        })
        .await
        .unwrap();
    let first = domain
        .register_workflow("first", "1.0.0", |cfg| {
            cfg.initial_activity("ok", "1.0.0");
        })
        .await
        .unwrap();
    let second = domain
        .register_workflow("second", "1.0.0", |cfg| {
            cfg.initial_activity("broken", "1.0.0");
        })
        .await
        .unwrap();

    let reporter = Arc::new(CapturingReporter::default());
    let runtime = Runtime::new(fx.registry.clone(), reporting(&reporter));

    domain.start_workflow("first", "1.0.0", "wf-ok", None).await.unwrap();
    assert!(runtime.poll_for_single_decision_task(&first).await.unwrap());
    fx.source
        .inject_response_error(ProviderError::retryable("respond_activity_task_completed", "unreachable"))
        .await;
    let err = runtime.poll_for_single_activity_task(&ok).await.unwrap_err();
    assert!(err.is_retryable());

    let reports = reporter.reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, "respond_activity_task_completed: unreachable");
    assert_eq!(reports[0].1.get("workflow_id").map(String::as_str), Some("wf-ok"));
    assert_eq!(reports[0].1.get("activity_id").map(String::as_str), Some("ok-3"));

    domain.start_workflow("second", "1.0.0", "wf-broken", None).await.unwrap();
    assert!(runtime.poll_for_single_decision_task(&second).await.unwrap());
    fx.source
        .inject_response_error(ProviderError::retryable("respond_activity_task_failed", "unreachable"))
        .await;
    runtime.poll_for_single_activity_task(&broken).await.unwrap_err();

    let messages = reporter.messages();
    assert_eq!(messages.len(), 3);
    assert!(messages[1].contains("bad input"), "{messages:?}");
    assert_eq!(messages[2], "respond_activity_task_failed: unreachable");
}

#[tokio::test]
async fn decision_errors_stop_the_worker_and_are_reported() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    // No initial activity: the start event cannot be decided.
    let workflow = domain.register_workflow("w", "1.0.0", |_| {}).await.unwrap();

    let reporter = Arc::new(CapturingReporter::default());
    let runtime = Runtime::new(fx.registry.clone(), reporting(&reporter));
    let ids = runtime.start_decision_loop(&workflow, 1).await;
    let run = domain.start_workflow("w", "1.0.0", "wf-broken", None).await.unwrap();

    let reports = runtime.join().await;
    assert_eq!(reports[0].worker_id, ids[0]);
    match &reports[0].exit {
        WorkerExit::Failed(message) => assert!(message.contains("declares no initial activity"), "{message}"),
        other => panic!("unexpected exit: {other:?}"),
    }

    let captured = reporter.reports.lock().unwrap().clone();
    assert_eq!(captured.len(), 1);
    let context = &captured[0].1;
    assert_eq!(context.get("worker_id"), Some(&ids[0]));
    assert_eq!(context.get("workflow_id").map(String::as_str), Some("wf-broken"));
    assert_eq!(context.get("run_id"), Some(&run.run_id));
    assert_eq!(context.get("domain").map(String::as_str), Some("d"));
}

#[tokio::test]
async fn start_hook_sees_every_worker() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let workflow = domain.register_workflow("w", "1.0.0", |_| {}).await.unwrap();
    let a = domain
        .register_activity("a", "1.0.0", |cfg| {
            cfg.perform(|_task| async move { Ok::<_, String>(String::new()) });
        })
        .await
        .unwrap();

    let started = Arc::new(Mutex::new(Vec::new()));
    let sink = started.clone();
    let options = fast_options().on_worker_start(move |id| sink.lock().unwrap().push(id.to_string()));
    let runtime = Runtime::new(fx.registry.clone(), options);
    let mut ids = runtime.start_decision_loop(&workflow, 2).await;
    ids.extend(runtime.start_activity_loop(&a, 1).await.unwrap());
    assert_eq!(ids, vec!["decision-0-w@1.0.0", "decision-1-w@1.0.0", "activity-2-a@1.0.0"]);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let mut seen = started.lock().unwrap().clone();
    seen.sort();
    ids.sort();
    assert_eq!(seen, ids);

    runtime.shutdown(ShutdownMode::Graceful).await;
}

#[tokio::test]
async fn activity_loop_requires_a_handler() {
    let fx = fixture();
    let declared_only = fx
        .registry
        .register_activity("d", "a", "1.0.0", |_| {})
        .await
        .unwrap();
    let runtime = Runtime::new(fx.registry.clone(), fast_options());
    let err = runtime.start_activity_loop(&declared_only, 1).await.unwrap_err();
    assert!(matches!(err, RegistryError::MissingHandler(_)));
    assert_eq!(runtime.live_workers(), 0);
}

#[tokio::test]
async fn retryable_poll_errors_are_survived() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let workflow = domain
        .register_workflow("w", "1.0.0", |cfg| {
            cfg.initial_activity("a", "1.0.0");
        })
        .await
        .unwrap();
    domain.register_activity("a", "1.0.0", |_| {}).await.unwrap();

    fx.source
        .inject_poll_error(ProviderError::retryable("poll_decision_task", "throttled"))
        .await;
    let runtime = Runtime::new(fx.registry.clone(), fast_options());
    runtime.start_decision_loop(&workflow, 1).await;

    let run = domain.start_workflow("w", "1.0.0", "wf-throttle", None).await.unwrap();
    let scheduled = wait_for_history(
        &fx.source,
        &run.run_id,
        |h| count_events(h, "ActivityTaskScheduled") == 1,
        5_000,
    )
    .await;
    assert!(scheduled);
    assert_eq!(runtime.live_workers(), 1);

    let reports = runtime.shutdown(ShutdownMode::Graceful).await;
    assert_eq!(reports[0].exit, WorkerExit::Stopped);
}

#[tokio::test]
async fn permanent_poll_error_ends_run_until_signal() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let workflow = domain.register_workflow("w", "1.0.0", |_| {}).await.unwrap();

    fx.source
        .inject_poll_error(ProviderError::permanent("poll_decision_task", "access denied"))
        .await;
    let reporter = Arc::new(CapturingReporter::default());
    let runtime = Runtime::new(fx.registry.clone(), reporting(&reporter));
    runtime.start_decision_loop(&workflow, 1).await;

    let reports = tokio::time::timeout(Duration::from_secs(5), runtime.run_until_signal())
        .await
        .expect("workers should exit on their own")
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert!(matches!(&reports[0].exit, WorkerExit::Failed(m) if m.contains("access denied")));
    assert_eq!(reporter.messages().len(), 1);
}

#[tokio::test]
async fn activity_workers_outlive_permanent_poll_errors() {
    let fx = fixture();
    let a = fx
        .registry
        .register_activity("d", "a", "1.0.0", |cfg| {
            cfg.perform(|_task| async move { Ok::<_, String>(String::new()) });
        })
        .await
        .unwrap();

    fx.source
        .inject_poll_error(ProviderError::permanent("poll_activity_task", "access denied"))
        .await;
    let reporter = Arc::new(CapturingReporter::default());
    let runtime = Runtime::new(fx.registry.clone(), reporting(&reporter));
    runtime.start_activity_loop(&a, 1).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runtime.live_workers(), 1);
    assert_eq!(reporter.messages(), vec!["poll_activity_task: access denied".to_string()]);

    let reports = runtime.shutdown(ShutdownMode::Graceful).await;
    assert_eq!(reports[0].exit, WorkerExit::Stopped);
}

#[tokio::test]
async fn service_timeouts_reschedule_until_heartbeat_is_lost() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let workflow = domain
        .register_workflow("w", "1.0.0", |cfg| {
            cfg.initial_activity("a", "1.0.0");
        })
        .await
        .unwrap();
    domain.register_activity("a", "1.0.0", |_| {}).await.unwrap();

    let runtime = Runtime::new(fx.registry.clone(), fast_options());
    runtime.start_decision_loop(&workflow, 1).await;
    let run = domain.start_workflow("w", "1.0.0", "wf-timeout", None).await.unwrap();

    let scheduled_ids = |count: usize| {
        let source = fx.source.clone();
        let run_id = run.run_id.clone();
        async move {
            assert!(
                wait_for_history(&source, &run_id, |h| count_events(h, "ActivityTaskScheduled") == count, 5_000).await
            );
            source
                .history(&run_id)
                .await
                .iter()
                .filter(|e| e.event_type == "ActivityTaskScheduled")
                .map(|e| e.event_id)
                .collect::<Vec<_>>()
        }
    };

    let first = scheduled_ids(1).await;
    fx.source
        .time_out_activity(&run.run_id, first[0], TimeoutType::StartToClose)
        .await
        .unwrap();
    let both = scheduled_ids(2).await;
    assert_eq!(domain.count_pending_activity_tasks("a").await.unwrap(), 1);

    fx.source
        .time_out_activity(&run.run_id, both[1], TimeoutType::Heartbeat)
        .await
        .unwrap();
    assert_eq!(
        wait_for_close(&fx.source, &run.run_id, 5_000).await,
        Some(ExecutionStatus::Failed {
            reason: Some("activity heartbeat timed out".to_string()),
            details: None,
        })
    );

    runtime.shutdown(ShutdownMode::Graceful).await;
}

#[tokio::test]
async fn single_task_polling_for_tests_and_tooling() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let workflow = domain
        .register_workflow("w", "1.0.0", |cfg| {
            cfg.initial_activity("a", "1.0.0");
        })
        .await
        .unwrap();
    let a = domain
        .register_activity("a", "1.0.0", |cfg| {
            cfg.perform(|task| async move { Ok::<_, String>(task.input().unwrap_or_default().to_uppercase()) });
        })
        .await
        .unwrap();
    let runtime = Runtime::new(fx.registry.clone(), fast_options());

    assert!(!runtime.poll_for_single_decision_task(&workflow).await.unwrap());

    let run = domain
        .start_workflow("w", "1.0.0", "wf-single", Some("abc".to_string()))
        .await
        .unwrap();
    assert!(runtime.poll_for_single_decision_task(&workflow).await.unwrap());
    assert!(runtime.poll_for_single_activity_task(&a).await.unwrap());
    assert!(runtime.poll_for_single_decision_task(&workflow).await.unwrap());

    assert_eq!(
        fx.source.execution_status(&run.run_id).await,
        Some(ExecutionStatus::Completed {
            result: Some("success".to_string())
        })
    );
    let history = fx.source.history(&run.run_id).await;
    let completion = history
        .iter()
        .find(|e| e.event_type == "ActivityTaskCompleted")
        .unwrap();
    assert_eq!(completion.result(), Some("ABC"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn several_workers_share_one_task_list() {
    let fx = fixture();
    let domain = fx.registry.domain("d").await.unwrap();
    let a = domain
        .register_activity("a", "1.0.0", |cfg| {
            cfg.perform(|_task| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, String>(String::new())
            });
        })
        .await
        .unwrap();
    let workflow = domain
        .register_workflow("w", "1.0.0", |cfg| {
            cfg.initial_activity("a", "1.0.0");
        })
        .await
        .unwrap();

    let runtime = Runtime::new(fx.registry.clone(), fast_options());
    runtime.start_decision_loop(&workflow, 2).await;
    runtime.start_activity_loop(&a, 3).await.unwrap();

    let workflow_ids: Vec<String> = (0..6).map(|i| format!("wf-{i}")).collect();
    let runs = join_all(workflow_ids.iter().map(|id| domain.start_workflow("w", "1.0.0", id, None)))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    for run in &runs {
        let status = wait_for_close(&fx.source, &run.run_id, 5_000).await;
        assert!(matches!(status, Some(ExecutionStatus::Completed { .. })), "{status:?}");
    }

    let reports = runtime.shutdown(ShutdownMode::Graceful).await;
    assert_eq!(reports.len(), 5);
    assert!(reports.iter().all(|r| r.exit.is_clean()));
}
