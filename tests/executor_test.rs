use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use fuse_task_queue::events::{BroadcastEventSink, NoopEventSink, TaskEventKind};
use fuse_task_queue::queue::PriorityQueue;
use fuse_task_queue::scheduler::Scheduler;
use fuse_task_queue::storage::memory::MemoryStore;
use fuse_task_queue::task::executor::{Executor, TaskHandler};
use fuse_task_queue::task::{Task, TaskDependency, TaskStatus};
use fuse_task_queue::TaskQueueError;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

fn setup() -> (Arc<PriorityQueue>, Arc<Executor>) {
    let queue = Arc::new(PriorityQueue::new(Arc::new(MemoryStore::new()), "test"));
    let scheduler = Scheduler::new(Arc::clone(&queue));
    let executor = Executor::new(Arc::clone(&queue), scheduler, Arc::new(NoopEventSink));
    (queue, Arc::new(executor))
}

struct UppercaseHandler;

#[async_trait]
impl TaskHandler for UppercaseHandler {
    async fn handle(&self, task: &Task) -> anyhow::Result<serde_json::Value> {
        let text = task
            .payload
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("payload must be a string"))?;
        Ok(serde_json::json!(text.to_uppercase()))
    }
}

#[tokio::test]
async fn test_echo_handler_completes_task() {
    let (queue, executor) = setup();
    executor
        .register_fn("echo", |task| async move { anyhow::Ok(task.payload) })
        .await;

    let task = Task::new("echo", serde_json::json!("hi"));
    queue.enqueue(&task, None).await.unwrap();

    let done = executor.process_next(Some("echo")).await.unwrap().unwrap();
    assert_eq!(done.id, task.id);
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result, Some(serde_json::json!("hi")));
    assert!(done.started_at.is_some());
    assert!(done.started_at <= done.completed_at);

    let stored = queue.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored, done);
}

#[tokio::test]
async fn test_trait_handler() {
    let (queue, executor) = setup();
    executor
        .register_executor("upper", Arc::new(UppercaseHandler))
        .await;

    let task = Task::new("upper", serde_json::json!("shout"));
    queue.enqueue(&task, None).await.unwrap();

    let done = executor.process_next(None).await.unwrap().unwrap();
    assert_eq!(done.result, Some(serde_json::json!("SHOUT")));
}

#[tokio::test]
async fn test_handler_error_marks_failed() {
    let (queue, executor) = setup();
    executor
        .register_executor("upper", Arc::new(UppercaseHandler))
        .await;

    let task = Task::new("upper", serde_json::json!(42));
    queue.enqueue(&task, None).await.unwrap();

    // Failure is recorded on the task, not returned as an error
    let failed = executor.process_next(Some("upper")).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.result.is_none());
    assert_eq!(
        failed.metadata.error.as_deref(),
        Some("payload must be a string")
    );

    let stored = queue.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(stored.metadata.failed_at.is_some());
    // No implicit retry
    assert_eq!(queue.get_length(Some("upper")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_registration_replaces_previous_handler() {
    let (queue, executor) = setup();
    executor
        .register_fn("calc", |_task| async move { anyhow::Ok(serde_json::json!(1)) })
        .await;
    executor
        .register_fn("calc", |_task| async move { anyhow::Ok(serde_json::json!(2)) })
        .await;

    assert_eq!(executor.registered_types().await, vec!["calc".to_string()]);

    let task = Task::new("calc", serde_json::json!(null));
    queue.enqueue(&task, None).await.unwrap();

    let done = executor.process_next(Some("calc")).await.unwrap().unwrap();
    assert_eq!(done.result, Some(serde_json::json!(2)));
}

#[tokio::test]
async fn test_missing_handler_requeues_task() {
    let (queue, executor) = setup();
    let task = Task::new("unknown", serde_json::json!(null));
    queue.enqueue(&task, None).await.unwrap();

    let err = executor.process_next(Some("unknown")).await.unwrap_err();
    assert!(matches!(err, TaskQueueError::NoHandler(ref t) if t == "unknown"));

    assert_eq!(queue.get_length(Some("unknown")).await.unwrap(), 1);
    let stored = queue.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_blocked_task_does_not_hide_its_dependency() {
    let (queue, executor) = setup();
    executor
        .register_fn("step", |task| async move { anyhow::Ok(task.payload) })
        .await;

    let parent = Task::new("step", serde_json::json!("parent"));
    let child = Task::new("step", serde_json::json!("child"))
        .with_priority(10)
        .with_dependencies(vec![TaskDependency::new(parent.id.clone())]);
    queue.enqueue(&parent, None).await.unwrap();
    queue.enqueue(&child, None).await.unwrap();
    assert_eq!(
        executor.unmet_dependencies(&child).await.unwrap(),
        vec![parent.id.clone()]
    );

    // Child scores higher but is set aside; the parent runs in the same call
    let first = executor.process_next(Some("step")).await.unwrap().unwrap();
    assert_eq!(first.id, parent.id);
    assert_eq!(first.status, TaskStatus::Completed);
    assert_eq!(queue.get_length(Some("step")).await.unwrap(), 1);

    let second = executor.process_next(Some("step")).await.unwrap().unwrap();
    assert_eq!(second.id, child.id);
    assert_eq!(second.status, TaskStatus::Completed);
    assert_eq!(queue.get_length(Some("step")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_only_blocked_tasks_are_put_back() {
    let (queue, executor) = setup();
    executor
        .register_fn("step", |task| async move { anyhow::Ok(task.payload) })
        .await;

    let first = Task::new("step", serde_json::json!(1))
        .with_priority(3)
        .with_dependencies(vec![TaskDependency::new("never-created")]);
    let second = Task::new("step", serde_json::json!(2))
        .with_dependencies(vec![TaskDependency::new("never-created")]);
    queue.enqueue(&first, None).await.unwrap();
    queue.enqueue(&second, None).await.unwrap();

    assert!(executor.process_next(Some("step")).await.unwrap().is_none());
    assert_eq!(queue.get_length(Some("step")).await.unwrap(), 2);

    // Order is kept for the next scan
    let head = queue.peek(Some("step")).await.unwrap().unwrap();
    assert_eq!(head.id, first.id);
    for task in [&first, &second] {
        let stored = queue.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
    }
}

#[tokio::test]
async fn test_unhandled_type_does_not_block_other_types() {
    let (queue, executor) = setup();
    executor
        .register_fn("echo", |task| async move { anyhow::Ok(task.payload) })
        .await;

    let orphan = Task::new("unknown", serde_json::json!(null)).with_priority(9);
    let echo = Task::new("echo", serde_json::json!("hi"));
    queue.enqueue(&orphan, None).await.unwrap();
    queue.enqueue(&echo, None).await.unwrap();

    let done = executor.process_next(None).await.unwrap().unwrap();
    assert_eq!(done.id, echo.id);
    assert_eq!(done.status, TaskStatus::Completed);

    // The orphan is still waiting for a handler
    assert_eq!(queue.get_length(Some("unknown")).await.unwrap(), 1);
    let err = executor.process_next(None).await.unwrap_err();
    assert!(matches!(err, TaskQueueError::NoHandler(ref t) if t == "unknown"));
    assert_eq!(queue.get_length(Some("unknown")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_execute_runs_pending_task_directly() {
    let (queue, executor) = setup();
    executor
        .register_fn("step", |task| async move { anyhow::Ok(task.payload) })
        .await;

    let task = Task::new("step", serde_json::json!("direct"));
    queue.update(&task).await.unwrap();

    let done = executor.execute(task.clone()).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result, Some(serde_json::json!("direct")));
}

#[tokio::test]
async fn test_execute_skips_task_cancelled_since_read() {
    let (queue, executor) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        executor
            .register_fn("step", move |task| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(task.payload)
                }
            })
            .await;
    }

    let task = Task::new("step", serde_json::json!(null));
    queue.enqueue(&task, None).await.unwrap();
    let stale = task.clone();
    Scheduler::new(Arc::clone(&queue))
        .cancel(&task.id)
        .await
        .unwrap();

    let outcome = executor.execute(stale).await.unwrap();
    assert_eq!(outcome.status, TaskStatus::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_dependency_is_unmet() {
    let (_queue, executor) = setup();
    let task = Task::new("step", serde_json::json!(null))
        .with_dependencies(vec![TaskDependency::new("does-not-exist")]);

    let unmet = executor.unmet_dependencies(&task).await.unwrap();
    assert_eq!(unmet, vec!["does-not-exist".to_string()]);
}

#[tokio::test]
async fn test_non_pending_task_is_skipped() {
    let (queue, executor) = setup();
    executor
        .register_fn("echo", |task| async move { anyhow::Ok(task.payload) })
        .await;

    let mut task = Task::new("echo", serde_json::json!(null));
    queue.enqueue(&task, None).await.unwrap();
    task.transition(TaskStatus::Paused).unwrap();
    queue.update(&task).await.unwrap();

    assert!(executor.process_next(Some("echo")).await.unwrap().is_none());
    let stored = queue.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Paused);
}

#[tokio::test]
async fn test_cancel_while_running_discards_result() {
    let queue = Arc::new(PriorityQueue::new(Arc::new(MemoryStore::new()), "test"));
    let scheduler = Scheduler::new(Arc::clone(&queue));
    let executor = Arc::new(Executor::new(
        Arc::clone(&queue),
        scheduler.clone(),
        Arc::new(NoopEventSink),
    ));

    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    {
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        executor
            .register_fn("slow", move |_task| {
                let started = Arc::clone(&started);
                let release = Arc::clone(&release);
                async move {
                    started.notify_one();
                    release.notified().await;
                    anyhow::Ok(serde_json::json!("late"))
                }
            })
            .await;
    }

    let task = Task::new("slow", serde_json::json!(null));
    queue.enqueue(&task, None).await.unwrap();

    let runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.process_next(Some("slow")).await })
    };

    started.notified().await;
    let running = queue.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(running.status, TaskStatus::Running);

    scheduler.cancel(&task.id).await.unwrap();
    release.notify_one();

    let outcome = runner.await.unwrap().unwrap().unwrap();
    assert_eq!(outcome.status, TaskStatus::Cancelled);

    let stored = queue.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Cancelled);
    assert!(stored.result.is_none());
}

/// Executor whose "slow" handler blocks on its first call until released
fn gated_executor() -> (Arc<PriorityQueue>, Scheduler, Arc<Executor>, Arc<Notify>, Arc<Notify>) {
    let queue = Arc::new(PriorityQueue::new(Arc::new(MemoryStore::new()), "test"));
    let scheduler = Scheduler::new(Arc::clone(&queue));
    let executor = Arc::new(Executor::new(
        Arc::clone(&queue),
        scheduler.clone(),
        Arc::new(NoopEventSink),
    ));
    (queue, scheduler, executor, Arc::new(Notify::new()), Arc::new(Notify::new()))
}

async fn register_gated(executor: &Executor, started: &Arc<Notify>, release: &Arc<Notify>) {
    let started = Arc::clone(started);
    let release = Arc::clone(release);
    let calls = Arc::new(AtomicUsize::new(0));
    executor
        .register_fn("slow", move |_task| {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    started.notify_one();
                    release.notified().await;
                }
                anyhow::Ok(serde_json::json!({ "call": call }))
            }
        })
        .await;
}

#[tokio::test]
async fn test_pause_while_running_discards_result() {
    let (queue, scheduler, executor, started, release) = gated_executor();
    register_gated(&executor, &started, &release).await;

    let task = Task::new("slow", serde_json::json!(null));
    queue.enqueue(&task, None).await.unwrap();

    let runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.process_next(Some("slow")).await })
    };

    started.notified().await;
    let mut running = queue.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(running.status, TaskStatus::Running);

    // Advisory: the handler keeps going
    scheduler.pause(&mut running).await.unwrap();
    release.notify_one();

    let outcome = runner.await.unwrap().unwrap().unwrap();
    assert_eq!(outcome.status, TaskStatus::Paused);
    assert!(outcome.result.is_none());

    let stored = queue.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Paused);
    assert!(stored.result.is_none());
    assert!(stored.completed_at.is_none());
    assert_eq!(queue.get_length(Some("slow")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_pause_and_resume_while_running_runs_again() {
    let (queue, scheduler, executor, started, release) = gated_executor();
    register_gated(&executor, &started, &release).await;

    let task = Task::new("slow", serde_json::json!(null));
    queue.enqueue(&task, None).await.unwrap();

    let runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.process_next(Some("slow")).await })
    };

    started.notified().await;
    let mut current = queue.get_task(&task.id).await.unwrap().unwrap();
    scheduler.pause(&mut current).await.unwrap();
    scheduler.resume(&mut current).await.unwrap();
    release.notify_one();

    // First run's outcome is dropped; the task is pending and queued again
    let outcome = runner.await.unwrap().unwrap().unwrap();
    assert_eq!(outcome.status, TaskStatus::Pending);
    let stored = queue.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
    assert!(stored.result.is_none());
    assert_eq!(queue.get_length(Some("slow")).await.unwrap(), 1);

    let rerun = executor.process_next(Some("slow")).await.unwrap().unwrap();
    assert_eq!(rerun.id, task.id);
    assert_eq!(rerun.status, TaskStatus::Completed);
    assert_eq!(rerun.result, Some(serde_json::json!({ "call": 1 })));
}

#[tokio::test]
async fn test_handler_timeout_marks_failed() {
    let queue = Arc::new(PriorityQueue::new(Arc::new(MemoryStore::new()), "test"));
    let scheduler = Scheduler::new(Arc::clone(&queue));
    let executor = Executor::new(Arc::clone(&queue), scheduler, Arc::new(NoopEventSink))
        .with_timeout(Some(Duration::from_millis(50)));
    executor
        .register_fn("stuck", |_task| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            anyhow::Ok(serde_json::json!(null))
        })
        .await;

    let task = Task::new("stuck", serde_json::json!(null));
    queue.enqueue(&task, None).await.unwrap();

    let failed = executor.process_next(Some("stuck")).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.metadata.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_progress_side_channel() {
    let (queue, executor) = setup();
    let task = Task::new("echo", serde_json::json!(null));
    queue.enqueue(&task, None).await.unwrap();

    assert!(executor.get_task_progress(&task.id).await.unwrap().is_none());

    executor
        .update_task_progress(&task.id, 40.0, Some(serde_json::json!({"step": "parse"})))
        .await
        .unwrap();
    let progress = executor.get_task_progress(&task.id).await.unwrap().unwrap();
    assert_eq!(progress.progress, 40.0);
    assert_eq!(progress.metadata, Some(serde_json::json!({"step": "parse"})));

    let clamped = executor
        .update_task_progress(&task.id, 250.0, None)
        .await
        .unwrap();
    assert_eq!(clamped.progress, 100.0);

    // Progress does not touch status
    let stored = queue.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_execution_events() {
    let queue = Arc::new(PriorityQueue::new(Arc::new(MemoryStore::new()), "test"));
    let scheduler = Scheduler::new(Arc::clone(&queue));
    let sink = BroadcastEventSink::new(16);
    let mut events = sink.subscribe();
    let executor = Executor::new(Arc::clone(&queue), scheduler, Arc::new(sink));
    executor
        .register_fn("fail", |_task| async move {
            Err::<serde_json::Value, _>(anyhow::anyhow!("nope"))
        })
        .await;

    let task = Task::new("fail", serde_json::json!(null));
    queue.enqueue(&task, None).await.unwrap();
    executor.process_next(Some("fail")).await.unwrap();

    let started = events.recv().await.unwrap();
    assert_eq!(started.kind, TaskEventKind::Started);
    assert_eq!(started.task_id, task.id);
    let failed = events.recv().await.unwrap();
    assert_eq!(failed.kind, TaskEventKind::Failed);
}
