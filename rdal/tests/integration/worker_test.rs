use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use rdal::config::WorkerConfig;
use rdal::error::ErrorKind;
use rdal::rdal_error;
use rdal::task::{Emitter, Task};
use rdal::test_utils::init_test_tracing;
use rdal::workers::SingleWorker;
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread")]
async fn tasks_execute_in_submission_order_without_interleaving() {
    init_test_tracing();

    let worker = SingleWorker::spawn(WorkerConfig::default());
    let log = Arc::new(Mutex::new(Vec::new()));

    let first_log = log.clone();
    let first = worker.schedule_hot(Task::unit(move || {
        let log = first_log.clone();
        async move {
            log.lock().unwrap().push("first:start");
            sleep(Duration::from_millis(50)).await;
            log.lock().unwrap().push("first:end");
            Ok(())
        }
    }));

    let second_log = log.clone();
    let second = worker.schedule_hot(Task::unit(move || {
        let log = second_log.clone();
        async move {
            log.lock().unwrap().push("second:start");
            log.lock().unwrap().push("second:end");
            Ok(())
        }
    }));

    first.wait().await.unwrap();
    second.wait().await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["first:start", "first:end", "second:start", "second:end"]
    );

    assert!(
        worker
            .shutdown(Task::noop(), Some(Duration::from_secs(5)))
            .await
            .is_ok()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn cold_scheduling_defers_execution_and_re_executes_per_subscription() {
    init_test_tracing();

    let worker = SingleWorker::spawn(WorkerConfig::default());
    let executions = Arc::new(AtomicUsize::new(0));

    let counter = executions.clone();
    let handle = worker.schedule_cold(Task::new(move |emitter: Emitter<u64>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            emitter.emit(7);
            Ok(())
        }
    }));

    // Nothing runs until somebody subscribes.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(executions.load(Ordering::SeqCst), 0);

    handle.subscribe().wait().await.unwrap();
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    let values: Vec<u64> = handle
        .subscribe()
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(values, vec![7]);
    assert_eq!(executions.load(Ordering::SeqCst), 2);

    assert!(
        worker
            .shutdown(Task::noop(), Some(Duration::from_secs(5)))
            .await
            .is_ok()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn hot_scheduling_executes_once_regardless_of_observers() {
    init_test_tracing();

    let worker = SingleWorker::spawn(WorkerConfig::default());
    let executions = Arc::new(AtomicUsize::new(0));

    let counter = executions.clone();
    let handle = worker.schedule_hot(Task::new(move |emitter: Emitter<u64>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            emitter.emit(42);
            Ok(())
        }
    }));

    handle.wait().await.unwrap();

    // Late observers replay the same single execution.
    let first: Vec<u64> = handle
        .subscribe()
        .map(|item| item.unwrap())
        .collect()
        .await;
    let second: Vec<u64> = handle
        .subscribe()
        .map(|item| item.unwrap())
        .collect()
        .await;

    assert_eq!(first, vec![42]);
    assert_eq!(second, vec![42]);
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    assert!(
        worker
            .shutdown(Task::noop(), Some(Duration::from_secs(5)))
            .await
            .is_ok()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn hot_task_delivers_value_then_worker_shuts_down_within_bound() {
    init_test_tracing();

    let worker = SingleWorker::spawn(WorkerConfig::default());

    let handle = worker.schedule_hot(Task::new(|emitter: Emitter<i64>| async move {
        emitter.emit(42);
        Ok(())
    }));

    let mut subscription = handle.subscribe();
    assert_eq!(subscription.next().await.unwrap().unwrap(), 42);
    assert!(subscription.next().await.is_none());

    assert!(
        worker
            .shutdown(Task::noop(), Some(Duration::from_secs(5)))
            .await
            .is_ok()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_runs_the_final_task_exactly_once() {
    init_test_tracing();

    let worker = SingleWorker::spawn(WorkerConfig::default());
    let final_runs = Arc::new(AtomicUsize::new(0));

    let first_counter = final_runs.clone();
    let first = worker.shutdown(
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
    let second = worker.shutdown(
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
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_surfaces_timeout_when_execution_context_is_delayed() {
    init_test_tracing();

    let worker = SingleWorker::spawn(WorkerConfig::default());

    let _blocker = worker.schedule_hot(Task::unit(|| async {
        sleep(Duration::from_millis(500)).await;
        Ok(())
    }));

    let failure = worker
        .shutdown(Task::noop(), Some(Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::ShutdownTimeout);
}

#[tokio::test(flavor = "multi_thread")]
async fn final_task_failure_outranks_termination_outcome() {
    init_test_tracing();

    let worker = SingleWorker::spawn(WorkerConfig::default());

    let failure = worker
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
async fn dropping_a_cold_subscription_before_start_cancels_the_execution() {
    init_test_tracing();

    let worker = SingleWorker::spawn(WorkerConfig::default());
    let executions = Arc::new(AtomicUsize::new(0));

    // Occupy the execution context so the cold execution stays queued.
    let blocker = worker.schedule_hot(Task::unit(|| async {
        sleep(Duration::from_millis(100)).await;
        Ok(())
    }));

    let counter = executions.clone();
    let handle = worker.schedule_cold(Task::unit(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }));

    let subscription = handle.subscribe();
    drop(subscription);

    blocker.wait().await.unwrap();

    // The fence task runs after the cancelled item, so by now the worker has
    // already skipped it.
    let fence = worker.schedule_hot(Task::<()>::noop());
    fence.wait().await.unwrap();
    assert_eq!(executions.load(Ordering::SeqCst), 0);

    assert!(
        worker
            .shutdown(Task::noop(), Some(Duration::from_secs(5)))
            .await
            .is_ok()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribe_hot_consumes_external_chains_on_the_worker() {
    init_test_tracing();

    let worker = SingleWorker::spawn(WorkerConfig::default());
    let observed = Arc::new(AtomicBool::new(false));

    let flag = observed.clone();
    worker
        .subscribe_hot(async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    // Failing chains are swallowed; the worker keeps running.
    worker
        .subscribe_hot(async { Err(rdal_error!(ErrorKind::Unknown, "Chain failed")) })
        .unwrap();

    let fence = worker.schedule_hot(Task::<()>::noop());
    fence.wait().await.unwrap();
    assert!(observed.load(Ordering::SeqCst));

    assert!(
        worker
            .shutdown(Task::noop(), Some(Duration::from_secs(5)))
            .await
            .is_ok()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn cold_subscriptions_after_shutdown_are_rejected() {
    init_test_tracing();

    let worker = SingleWorker::spawn(WorkerConfig::default());
    let handle = worker.schedule_cold(Task::<()>::noop());

    assert!(
        worker
            .shutdown(Task::noop(), Some(Duration::from_secs(5)))
            .await
            .is_ok()
    );

    let failure = handle.subscribe().wait().await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::RejectedSubmission);
}
