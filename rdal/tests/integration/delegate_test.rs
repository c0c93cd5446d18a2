use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rdal::config::WorkerConfig;
use rdal::error::ErrorKind;
use rdal::rdal_error;
use rdal::task::Task;
use rdal::test_utils::{RecordingCloseable, init_test_tracing, log_entries, new_shutdown_log};
use rdal::workers::WorkerDelegate;

#[tokio::test(flavor = "multi_thread")]
async fn hooks_shut_down_in_registration_order() {
    init_test_tracing();

    let delegate = WorkerDelegate::spawn(WorkerConfig::default());
    let log = new_shutdown_log();

    let first = RecordingCloseable::new("h1", log.clone());
    let second = RecordingCloseable::with_delay("h2", log.clone(), Duration::from_millis(50));
    let third = RecordingCloseable::new("h3", log.clone());

    delegate.add_pre_shutdown_hook(first.clone()).unwrap();
    delegate.add_pre_shutdown_hook(second.clone()).unwrap();
    delegate.add_pre_shutdown_hook(third.clone()).unwrap();

    delegate
        .shutdown(Task::noop(), Some(Duration::from_secs(5)))
        .await
        .unwrap();

    let entries = log_entries(&log);
    let called: Vec<&String> = entries.iter().filter(|e| e.ends_with(":called")).collect();
    assert_eq!(called, ["h1:called", "h2:called", "h3:called"]);

    // The combined handle resolves only once every hook has resolved.
    assert!(entries.contains(&"h1:done".to_string()));
    assert!(entries.contains(&"h2:done".to_string()));
    assert!(entries.contains(&"h3:done".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_hooks_collapse_by_identity() {
    init_test_tracing();

    let delegate = WorkerDelegate::spawn(WorkerConfig::default());
    let log = new_shutdown_log();
    let hook = RecordingCloseable::new("hook", log.clone());

    delegate.add_pre_shutdown_hook(hook.clone()).unwrap();
    delegate.add_pre_shutdown_hook(hook.clone()).unwrap();

    delegate
        .shutdown(Task::noop(), Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(hook.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn hook_registration_fails_once_shutdown_started() {
    init_test_tracing();

    let delegate = WorkerDelegate::spawn(WorkerConfig::default());
    let log = new_shutdown_log();
    let late = RecordingCloseable::new("late", log.clone());

    let shutdown = delegate.shutdown(Task::noop(), Some(Duration::from_secs(5)));

    let failure = delegate.add_pre_shutdown_hook(late.clone()).unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::InvalidState);

    shutdown.await.unwrap();
    assert_eq!(late.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_shutdown_runs_hooks_and_final_task_at_most_once() {
    init_test_tracing();

    let delegate = WorkerDelegate::spawn(WorkerConfig::default());
    let log = new_shutdown_log();
    let hook = RecordingCloseable::new("hook", log.clone());
    delegate.add_pre_shutdown_hook(hook.clone()).unwrap();

    let final_runs = Arc::new(AtomicUsize::new(0));

    let first_counter = final_runs.clone();
    let first = delegate.shutdown(
        Task::unit(move || {
            let counter = first_counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
        Some(Duration::from_secs(5)),
    );

    let second_counter = final_runs.clone();
    let second = delegate.shutdown(
        Task::unit(move || {
            let counter = second_counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
        Some(Duration::from_secs(5)),
    );

    assert!(first.await.is_ok());
    assert!(second.await.is_ok());
    assert_eq!(final_runs.load(Ordering::SeqCst), 1);
    assert_eq!(hook.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn final_task_failure_outranks_hook_failure() {
    init_test_tracing();

    let delegate = WorkerDelegate::spawn(WorkerConfig::default());
    let log = new_shutdown_log();
    let hook = RecordingCloseable::failing("hook", log.clone(), ErrorKind::Unknown);
    delegate.add_pre_shutdown_hook(hook).unwrap();

    let failure = delegate
        .shutdown(
            Task::unit(|| async {
                Err(rdal_error!(
                    ErrorKind::InvalidState,
                    "Final cleanup failed",
                    "final-cleanup"
                ))
            }),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::InvalidState);
    assert_eq!(failure.detail(), Some("final-cleanup"));
}

#[tokio::test(flavor = "multi_thread")]
async fn hook_failure_surfaces_when_final_task_succeeds() {
    init_test_tracing();

    let delegate = WorkerDelegate::spawn(WorkerConfig::default());
    let log = new_shutdown_log();
    let first = RecordingCloseable::failing("h1", log.clone(), ErrorKind::Unknown);
    let second = RecordingCloseable::failing("h2", log.clone(), ErrorKind::InvalidState);
    delegate.add_pre_shutdown_hook(first).unwrap();
    delegate.add_pre_shutdown_hook(second).unwrap();

    let failure = delegate
        .shutdown(Task::noop(), Some(Duration::from_secs(5)))
        .await
        .unwrap_err();

    // First hook failure in registration order wins.
    assert_eq!(failure.kind(), ErrorKind::Unknown);
}

#[tokio::test(flavor = "multi_thread")]
async fn submissions_after_shutdown_fail_with_distinct_rejection_kind() {
    init_test_tracing();

    let delegate = WorkerDelegate::spawn(WorkerConfig::default());

    let shutdown = delegate.shutdown(Task::noop(), Some(Duration::from_secs(5)));

    let handle = delegate.schedule_hot(Task::<()>::noop(), false);
    let failure = handle.wait().await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::RejectedSubmission);

    let cold = delegate.schedule_cold(Task::<()>::noop(), false);
    let cold_failure = cold.subscribe().wait().await.unwrap_err();
    assert_eq!(cold_failure.kind(), ErrorKind::RejectedSubmission);

    shutdown.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn tasks_scheduled_before_shutdown_still_complete() {
    init_test_tracing();

    let delegate = WorkerDelegate::spawn(WorkerConfig::default());
    let completions = Arc::new(AtomicUsize::new(0));

    let counter = completions.clone();
    let queued = delegate.schedule_hot(
        Task::unit(move || {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
        false,
    );

    delegate
        .shutdown(Task::noop(), Some(Duration::from_secs(5)))
        .await
        .unwrap();

    queued.wait().await.unwrap();
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}
