//! Integration tests for optimistic task changes.
//!
//! Drives `OptimisticStore` against the in-memory server: local changes
//! show up immediately, confirmed ones stick, refused ones roll back to the
//! exact pre-change snapshot, and polls never clobber a change in flight.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskdash::api::TaskApi;
use taskdash::events::{EventSink, SyncEvent};
use taskdash::tasks::{Mutation, OptimisticStore, Reconciled, TaskError};
use taskdash::transport::Session;
use taskdash::transport::memory::{MemoryBackend, MemoryTransport};
use taskdash_proto::task::{Subtask, SubtaskId, SubtaskStatus, Task, TaskId, TaskStatus, UserId};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SENDER: UserId = UserId::new(1);
const RECEIVER: UserId = UserId::new(2);
const TASK: TaskId = TaskId::new(10);

struct Fixture {
    backend: Arc<MemoryBackend>,
    api: Arc<TaskApi<MemoryTransport>>,
    store: Arc<OptimisticStore>,
    events: mpsc::Receiver<SyncEvent>,
}

fn backend_with(task: &Task) -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_user(SENDER, "sam", "Sam", "pw");
    backend.add_user(RECEIVER, "riley", "Riley", "pw");
    backend.insert_task(task.clone());
    backend
}

/// Store for `user`, already tracking whatever the server holds for them.
async fn fixture(task: &Task, user: UserId) -> Fixture {
    let backend = backend_with(task);
    let api = Arc::new(TaskApi::new(backend.connect(Session::new(user, "t"))));
    let (sink, events) = EventSink::channel(64);
    let store = Arc::new(OptimisticStore::new(user, sink));
    let received = api
        .fetch_tasks(taskdash_proto::task::TaskFilter::All)
        .await
        .unwrap();
    store.sync_snapshot(received);
    Fixture {
        backend,
        api,
        store,
        events,
    }
}

fn todo_task() -> Task {
    Task {
        id: TASK,
        sender_id: SENDER,
        receiver_id: RECEIVER,
        sender_name: Some("Sam".to_string()),
        receiver_name: Some("Riley".to_string()),
        title: "Prepare quarterly report".to_string(),
        description: "Numbers for Q3".to_string(),
        status: TaskStatus::ToDo,
        subtasks: Vec::new(),
        created_at: Utc::now(),
        due_date: None,
        completed_at: None,
    }
}

fn with_subtasks(mut task: Task) -> Task {
    task.subtasks = vec![
        Subtask {
            id: SubtaskId::new("a"),
            title: "Collect data".to_string(),
            status: SubtaskStatus::ToDo,
        },
        Subtask {
            id: SubtaskId::new("b"),
            title: "Draft slides".to_string(),
            status: SubtaskStatus::Completed,
        },
    ];
    task
}

fn drain(rx: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// Waits until the backend is holding `n` requests at its gate.
async fn wait_for_held(backend: &MemoryBackend, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.held_requests() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("request never reached the server");
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[tokio::test]
async fn advance_is_visible_then_confirmed() {
    let mut fx = fixture(&todo_task(), RECEIVER).await;

    fx.store.advance(TASK).unwrap();
    assert_eq!(fx.store.get(TASK).unwrap().status, TaskStatus::InProgress);
    assert_eq!(
        fx.store.view(TASK).unwrap().authoritative().status,
        TaskStatus::ToDo
    );

    fx.store.commit(&fx.api, TASK).await.unwrap();

    let view = fx.store.view(TASK).unwrap();
    assert!(!view.is_pending());
    assert_eq!(view.authoritative().status, TaskStatus::InProgress);
    assert_eq!(
        fx.backend.task(TASK).unwrap().status,
        TaskStatus::InProgress
    );

    let events = drain(&mut fx.events);
    assert!(events.contains(&SyncEvent::MutationApplied { task_id: TASK }));
    assert!(events.contains(&SyncEvent::MutationConfirmed { task_id: TASK }));
    assert!(events.contains(&SyncEvent::RefreshRequested));
}

#[tokio::test]
async fn confirmed_change_wakes_the_refresh_signal() {
    let fx = fixture(&todo_task(), RECEIVER).await;
    let signal = fx.store.refresh_signal();

    fx.store.advance(TASK).unwrap();
    fx.store.commit(&fx.api, TASK).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), signal.notified())
        .await
        .expect("refresh was not requested");
}

#[tokio::test]
async fn failed_commit_reverts_to_original() {
    let original = with_subtasks(todo_task());
    let mut fx = fixture(&original, RECEIVER).await;
    fx.backend.fail_next(1);

    fx.store.advance(TASK).unwrap();
    let err = fx.store.commit(&fx.api, TASK).await.unwrap_err();

    assert!(matches!(err, TaskError::TransportFailure(ref m) if m.contains("503")));
    let visible = fx.store.get(TASK).unwrap();
    assert_eq!(visible, original);
    assert_eq!(visible.status, TaskStatus::ToDo);
    assert_eq!(visible.subtasks, original.subtasks);
    assert!(!fx.store.is_pending(TASK));
    assert_eq!(fx.backend.task(TASK).unwrap().status, TaskStatus::ToDo);

    let events = drain(&mut fx.events);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::MutationFailed { task_id, .. } if *task_id == TASK
    )));
}

#[tokio::test]
async fn failed_subtask_change_reverts_list() {
    let original = with_subtasks(todo_task());
    let fx = fixture(&original, RECEIVER).await;
    fx.backend.set_offline(true);

    fx.store.advance_subtask(TASK, &SubtaskId::new("b")).unwrap();
    assert_eq!(
        fx.store.get(TASK).unwrap().subtasks[1].status,
        SubtaskStatus::ToDo
    );

    assert!(fx.store.commit(&fx.api, TASK).await.is_err());
    assert_eq!(fx.store.get(TASK).unwrap().subtasks, original.subtasks);
}

#[tokio::test]
async fn sender_cannot_advance_own_sent_task() {
    let fx = fixture(&todo_task(), SENDER).await;
    let before = fx.store.view(TASK).unwrap();
    let served = fx.backend.served_requests();

    let err = fx.store.advance(TASK).unwrap_err();

    assert!(matches!(err, TaskError::NotAuthorized(_)));
    assert!(err.is_local());
    assert_eq!(fx.store.get(TASK).unwrap(), *before.visible());
    assert!(!fx.store.is_pending(TASK));
    assert_eq!(fx.backend.served_requests(), served);
}

#[tokio::test]
async fn sender_cancels_and_receiver_sees_it() {
    let fx = fixture(&todo_task(), SENDER).await;
    fx.store.cancel(TASK).unwrap();
    fx.store.commit(&fx.api, TASK).await.unwrap();
    assert_eq!(fx.backend.task(TASK).unwrap().status, TaskStatus::Canceled);

    let receiver = OptimisticStore::new(RECEIVER, EventSink::disabled());
    receiver.track(fx.backend.task(TASK).unwrap());
    assert!(matches!(
        receiver.advance(TASK),
        Err(TaskError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn server_refusal_rolls_back() {
    // The sender closed the task on the server; the receiver's view is stale.
    let fx = fixture(&todo_task(), RECEIVER).await;
    fx.backend.set_task_status(TASK, TaskStatus::Canceled);

    fx.store.advance(TASK).unwrap();
    let err = fx.store.commit(&fx.api, TASK).await.unwrap_err();

    assert!(matches!(err, TaskError::TransportFailure(ref m) if m.contains("already closed")));
    assert_eq!(fx.store.get(TASK).unwrap().status, TaskStatus::ToDo);
}

#[tokio::test]
async fn add_subtask_reaches_server() {
    let fx = fixture(&todo_task(), RECEIVER).await;

    let id = fx.store.add_subtask(TASK, "Book meeting room").unwrap();
    fx.store.commit(&fx.api, TASK).await.unwrap();

    let stored = fx.backend.task(TASK).unwrap();
    let added = stored.subtask(&id).unwrap();
    assert_eq!(added.title, "Book meeting room");
    assert_eq!(added.status, SubtaskStatus::ToDo);
}

#[tokio::test]
async fn commit_without_change_is_rejected() {
    let fx = fixture(&todo_task(), RECEIVER).await;
    assert_eq!(
        fx.store.commit(&fx.api, TASK).await.unwrap_err(),
        TaskError::NothingPending(TASK)
    );
}

// ===========================================================================
// Concurrency: one pending slot per task
// ===========================================================================

#[tokio::test]
async fn second_change_rejected_while_first_in_flight() {
    let fx = fixture(&todo_task(), RECEIVER).await;
    fx.backend.hold_requests();

    fx.store.advance(TASK).unwrap();
    let commit = {
        let store = Arc::clone(&fx.store);
        let api = Arc::clone(&fx.api);
        tokio::spawn(async move { store.commit(&api, TASK).await })
    };
    wait_for_held(&fx.backend, 1).await;

    let visible = fx.store.get(TASK).unwrap();
    assert_eq!(
        fx.store.advance(TASK).unwrap_err(),
        TaskError::MutationInProgress(TASK)
    );
    assert_eq!(
        fx.store
            .apply_local(TASK, Mutation::Status(TaskStatus::Completed))
            .unwrap_err(),
        TaskError::MutationInProgress(TASK)
    );
    assert_eq!(
        fx.store.commit(&fx.api, TASK).await.unwrap_err(),
        TaskError::MutationInProgress(TASK)
    );
    assert_eq!(fx.store.get(TASK).unwrap(), visible);

    fx.backend.release_requests();
    commit.await.unwrap().unwrap();
    assert_eq!(
        fx.backend.task(TASK).unwrap().status,
        TaskStatus::InProgress
    );
}

#[tokio::test]
async fn poll_during_flight_does_not_clobber_tentative_state() {
    let fx = fixture(&todo_task(), RECEIVER).await;
    fx.backend.hold_requests();

    fx.store.advance(TASK).unwrap();
    let commit = {
        let store = Arc::clone(&fx.store);
        let api = Arc::clone(&fx.api);
        tokio::spawn(async move { store.commit(&api, TASK).await })
    };
    wait_for_held(&fx.backend, 1).await;

    // A stale read from before the write lands.
    let stale = fx.backend.task(TASK).unwrap();
    assert_eq!(stale.status, TaskStatus::ToDo);
    assert_eq!(fx.store.reconcile(stale.clone()), Reconciled::Deferred);
    let report = fx.store.sync_snapshot(vec![stale]);
    assert_eq!(report.deferred, vec![TASK]);
    assert_eq!(fx.store.get(TASK).unwrap().status, TaskStatus::InProgress);

    fx.backend.release_requests();
    commit.await.unwrap().unwrap();

    // The stale read is discarded once the write is confirmed.
    assert_eq!(fx.store.get(TASK).unwrap().status, TaskStatus::InProgress);
}

#[tokio::test]
async fn held_poll_result_applies_when_change_fails() {
    let fx = fixture(&todo_task(), RECEIVER).await;
    fx.backend.hold_requests();

    fx.store.advance(TASK).unwrap();
    let commit = {
        let store = Arc::clone(&fx.store);
        let api = Arc::clone(&fx.api);
        tokio::spawn(async move { store.commit(&api, TASK).await })
    };
    wait_for_held(&fx.backend, 1).await;

    let mut canceled = fx.backend.task(TASK).unwrap();
    canceled.set_status(TaskStatus::Canceled, Utc::now());
    fx.store.reconcile(canceled.clone());

    fx.backend.fail_next(1);
    fx.backend.release_requests();
    assert!(commit.await.unwrap().is_err());

    assert_eq!(fx.store.get(TASK).unwrap(), canceled);
}

#[tokio::test]
async fn different_tasks_commit_independently() {
    let backend = backend_with(&todo_task());
    let mut other = todo_task();
    other.id = TaskId::new(11);
    backend.insert_task(other);

    let api = TaskApi::new(backend.connect(Session::new(RECEIVER, "t")));
    let store = OptimisticStore::new(RECEIVER, EventSink::disabled());
    store.sync_snapshot(
        api.fetch_tasks(taskdash_proto::task::TaskFilter::Received)
            .await
            .unwrap(),
    );

    store.advance(TASK).unwrap();
    store.advance(TaskId::new(11)).unwrap();
    let (a, b) = tokio::join!(store.commit(&api, TASK), store.commit(&api, TaskId::new(11)));
    a.unwrap();
    b.unwrap();
    assert_eq!(backend.task(TaskId::new(11)).unwrap().status, TaskStatus::InProgress);
}

#[tokio::test(start_paused = true)]
async fn abandoned_commit_rolls_back_and_frees_the_task() {
    let mut f = fixture(&todo_task(), RECEIVER).await;
    f.store.advance(TASK).unwrap();
    f.backend.hold_requests();

    let outcome =
        tokio::time::timeout(Duration::from_millis(50), f.store.commit(&f.api, TASK)).await;
    assert!(outcome.is_err(), "commit should still be waiting on the server");
    f.backend.release_requests();

    // The server never saw the write, so the view is back where it started.
    assert!(!f.store.is_pending(TASK));
    assert_eq!(f.store.get(TASK).unwrap().status, TaskStatus::ToDo);
    assert_eq!(f.backend.task(TASK).unwrap().status, TaskStatus::ToDo);
    let events: Vec<SyncEvent> = std::iter::from_fn(|| f.events.try_recv().ok()).collect();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SyncEvent::MutationFailed { task_id, .. } if *task_id == TASK))
    );

    // Polls apply again and the task accepts a new change.
    let polled = f
        .api
        .fetch_tasks(taskdash_proto::task::TaskFilter::All)
        .await
        .unwrap();
    let report = f.store.sync_snapshot(polled);
    assert!(report.deferred.is_empty());
    f.store.advance(TASK).unwrap();
    f.store.commit(&f.api, TASK).await.unwrap();
    assert_eq!(f.backend.task(TASK).unwrap().status, TaskStatus::InProgress);
}

#[tokio::test(start_paused = true)]
async fn abandoned_commit_applies_the_held_poll() {
    let f = fixture(&todo_task(), RECEIVER).await;
    f.store.advance(TASK).unwrap();

    let mut external = todo_task();
    external.description = "Numbers for Q3 and Q4".to_string();
    assert_eq!(f.store.reconcile(external.clone()), Reconciled::Deferred);

    f.backend.hold_requests();
    let outcome =
        tokio::time::timeout(Duration::from_millis(50), f.store.commit(&f.api, TASK)).await;
    assert!(outcome.is_err());
    f.backend.release_requests();

    let view = f.store.view(TASK).unwrap();
    assert!(!view.is_pending());
    assert_eq!(view.authoritative(), &external);
}
