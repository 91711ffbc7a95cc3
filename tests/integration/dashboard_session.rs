//! End-to-end tests for a logged-in dashboard session.
//!
//! Two users share one in-memory server: tasks flow from sender to
//! receiver, status changes come back, notifications follow, and logout
//! tears the session down without leaving anything running.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;
use std::time::Duration;

use taskdash::dashboard::{Dashboard, SyncConfig};
use taskdash::events::SyncEvent;
use taskdash::tasks::TaskError;
use taskdash::tasks::query::{Direction, TaskQuery};
use taskdash::transport::Session;
use taskdash::transport::memory::{MemoryBackend, MemoryTransport};
use taskdash_proto::task::{NewTask, Subtask, SubtaskStatus, TaskId, TaskStatus, UserId};
use tokio::sync::mpsc;

const ALICE: UserId = UserId::new(1);
const BOB: UserId = UserId::new(2);

fn login(
    backend: &Arc<MemoryBackend>,
    user: UserId,
) -> (Dashboard<MemoryTransport>, mpsc::Receiver<SyncEvent>) {
    let config = SyncConfig {
        task_poll_interval: Duration::from_secs(5),
        notification_poll_interval: Duration::from_secs(10),
        event_buffer: 256,
    };
    Dashboard::new(backend.connect(Session::new(user, "t")), config)
}

fn new_task(receiver: UserId, title: &str) -> NewTask {
    NewTask {
        receiver_id: receiver,
        title: title.to_string(),
        description: "Details inside".to_string(),
        due_date: None,
        subtasks: vec![Subtask::new("Outline"), Subtask::new("Review")],
    }
}

fn drain(rx: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

// ===========================================================================
// Task flow between two users
// ===========================================================================

#[tokio::test]
async fn assigned_task_flows_both_ways() {
    let backend = Arc::new(MemoryBackend::demo());
    let (alice, _alice_rx) = login(&backend, ALICE);
    let (bob, _bob_rx) = login(&backend, BOB);

    let created = alice.create_task(new_task(BOB, "Ship release notes")).await.unwrap();
    assert_eq!(created.status, TaskStatus::ToDo);
    assert_eq!(alice.task(created.id).unwrap().title, "Ship release notes");

    bob.refresh_tasks().await.unwrap();
    bob.advance(created.id).await.unwrap();
    let first = bob.task(created.id).unwrap().subtasks[0].id.clone();
    bob.advance_subtask(created.id, &first).await.unwrap();

    alice.refresh_tasks().await.unwrap();
    let seen = alice.task(created.id).unwrap();
    assert_eq!(seen.status, TaskStatus::InProgress);
    assert_eq!(seen.subtasks[0].status, SubtaskStatus::InProgress);

    // Bob got the assignment, alice got the status change.
    bob.refresh_notifications().await.unwrap();
    alice.refresh_notifications().await.unwrap();
    assert!(
        bob.notification_list()
            .iter()
            .any(|n| n.message.contains("Ship release notes"))
    );
    assert!(alice.unread() >= 1);
}

#[tokio::test]
async fn roles_are_enforced_per_side() {
    let backend = Arc::new(MemoryBackend::demo());
    let (alice, _rx) = login(&backend, ALICE);
    alice.refresh_tasks().await.unwrap();

    // Task 3 was sent by alice: she may cancel but not advance it.
    assert!(matches!(
        alice.advance(TaskId::new(3)).await,
        Err(TaskError::NotAuthorized(_))
    ));
    // Task 1 was received by alice: she may advance but not cancel it.
    assert!(matches!(
        alice.cancel(TaskId::new(1)).await,
        Err(TaskError::NotAuthorized(_))
    ));

    alice.cancel(TaskId::new(3)).await.unwrap();
    assert_eq!(
        backend.task(TaskId::new(3)).unwrap().status,
        TaskStatus::Canceled
    );
    assert!(matches!(
        alice.cancel(TaskId::new(3)).await,
        Err(TaskError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn advance_runs_to_completion_then_stops() {
    let backend = Arc::new(MemoryBackend::demo());
    let (alice, _rx) = login(&backend, ALICE);
    alice.refresh_tasks().await.unwrap();

    alice.advance(TaskId::new(1)).await.unwrap();
    alice.advance(TaskId::new(1)).await.unwrap();
    let done = backend.task(TaskId::new(1)).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.completed_at.is_some());

    assert!(matches!(
        alice.advance(TaskId::new(1)).await,
        Err(TaskError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn self_assigned_task_allows_both_roles() {
    let backend = Arc::new(MemoryBackend::demo());
    let (alice, _rx) = login(&backend, ALICE);
    let task = alice.create_task(new_task(ALICE, "Note to self")).await.unwrap();

    alice.advance(task.id).await.unwrap();
    alice.cancel(task.id).await.unwrap();
    assert_eq!(backend.task(task.id).unwrap().status, TaskStatus::Canceled);

    alice.refresh_tasks().await.unwrap();
    let received = alice.tasks(Direction::Received, &TaskQuery::default());
    let sent = alice.tasks(Direction::Sent, &TaskQuery::default());
    assert!(received.iter().any(|t| t.id == task.id));
    assert!(sent.iter().any(|t| t.id == task.id));
}

#[tokio::test(start_paused = true)]
async fn abandoned_change_can_be_retried() {
    let backend = Arc::new(MemoryBackend::demo());
    let (alice, _rx) = login(&backend, ALICE);
    alice.refresh_tasks().await.unwrap();

    backend.hold_requests();
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), alice.advance(TaskId::new(1))).await;
    assert!(abandoned.is_err());
    backend.release_requests();

    assert_eq!(alice.task(TaskId::new(1)).unwrap().status, TaskStatus::ToDo);
    let report = alice.refresh_tasks().await.unwrap();
    assert!(report.deferred.is_empty());

    alice.advance(TaskId::new(1)).await.unwrap();
    assert_eq!(
        backend.task(TaskId::new(1)).unwrap().status,
        TaskStatus::InProgress
    );
}

// ===========================================================================
// Creation and purge
// ===========================================================================

#[tokio::test]
async fn create_validates_before_sending() {
    let backend = Arc::new(MemoryBackend::demo());
    let (alice, _rx) = login(&backend, ALICE);
    let served = backend.served_requests();

    let mut blank_subtask = new_task(BOB, "Valid title");
    blank_subtask.subtasks.push(Subtask::new("  "));
    assert_eq!(
        alice.create_task(blank_subtask).await.unwrap_err(),
        TaskError::EmptyTitle
    );
    assert_eq!(
        alice.create_task(new_task(BOB, "")).await.unwrap_err(),
        TaskError::EmptyTitle
    );
    assert_eq!(
        alice
            .create_task(new_task(BOB, &"x".repeat(300)))
            .await
            .unwrap_err(),
        TaskError::TitleTooLong
    );
    assert_eq!(backend.served_requests(), served);
}

#[tokio::test]
async fn delete_all_requires_credentials() {
    let backend = Arc::new(MemoryBackend::demo());
    let (alice, _rx) = login(&backend, ALICE);
    alice.refresh_tasks().await.unwrap();

    let err = alice.delete_all_tasks("alice", "wrong").await.unwrap_err();
    assert!(matches!(err, TaskError::TransportFailure(ref m) if m.contains("Invalid credentials")));
    assert_eq!(alice.store().len(), 3);

    let report = alice.delete_all_tasks("alice", "password").await.unwrap();
    assert_eq!(report.evicted.len(), 3);
    assert!(alice.store().is_empty());
}

#[tokio::test]
async fn admin_view_follows_user_removal() {
    let backend = Arc::new(MemoryBackend::demo());
    let (alice, _rx) = login(&backend, ALICE);
    let carol = UserId::new(3);
    backend.add_user(carol, "carol", "Carol", "pw");
    alice.create_task(new_task(carol, "Hand over keys")).await.unwrap();

    let before = alice.user_tasks(ALICE).await.unwrap();
    assert_eq!(before.received.len(), 2);
    assert_eq!(before.sent.len(), 2);
    let bob_view = alice.user_tasks(BOB).await.unwrap();
    assert_eq!(bob_view.sent.len(), 2);
    assert_eq!(bob_view.received.len(), 1);

    alice.delete_user(carol).await.unwrap();
    assert!(alice.fetch_users().await.unwrap().iter().all(|u| u.id != carol));

    let after = alice.user_tasks(ALICE).await.unwrap();
    assert_eq!(after.sent.len(), 1);
    assert!(after.sent.iter().all(|t| t.receiver_id != carol));
    assert!(alice.user_tasks(carol).await.unwrap().received.is_empty());

    assert!(matches!(
        alice.delete_user(ALICE).await,
        Err(TaskError::TransportFailure(_))
    ));
}

// ===========================================================================
// Queries
// ===========================================================================

#[tokio::test]
async fn queries_partition_and_count() {
    let backend = Arc::new(MemoryBackend::demo());
    let (alice, _rx) = login(&backend, ALICE);
    alice.refresh_tasks().await.unwrap();

    assert_eq!(alice.tasks(Direction::Received, &TaskQuery::default()).len(), 2);
    assert_eq!(alice.tasks(Direction::Sent, &TaskQuery::default()).len(), 1);

    let in_progress = TaskQuery {
        status: Some(TaskStatus::InProgress),
        search: None,
    };
    let hits = alice.tasks(Direction::Received, &in_progress);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Fix invoice export");

    let by_name = TaskQuery {
        status: None,
        search: Some("BOB".to_string()),
    };
    assert_eq!(alice.tasks(Direction::Sent, &by_name).len(), 1);

    let counts = alice.counts(Direction::Received);
    assert_eq!(counts.to_do, 1);
    assert_eq!(counts.in_progress, 1);
    assert_eq!(counts.total(), 2);
}

// ===========================================================================
// Running session
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn running_session_sees_other_users_changes() {
    let backend = Arc::new(MemoryBackend::demo());
    let (mut alice, mut alice_rx) = login(&backend, ALICE);
    let (bob, _bob_rx) = login(&backend, BOB);
    alice.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(alice.store().len(), 3);
    drain(&mut alice_rx);

    bob.refresh_tasks().await.unwrap();
    bob.advance(TaskId::new(3)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(
        alice.task(TaskId::new(3)).unwrap().status,
        TaskStatus::InProgress
    );
    let events = drain(&mut alice_rx);
    assert!(events.contains(&SyncEvent::TaskChanged {
        task_id: TaskId::new(3)
    }));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(alice.unread(), 1);

    alice.logout().await;
}

#[tokio::test(start_paused = true)]
async fn logout_discards_in_flight_poll() {
    let backend = Arc::new(MemoryBackend::demo());
    let (mut alice, mut rx) = login(&backend, ALICE);
    alice.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let store = Arc::clone(alice.store());
    let tracker = Arc::clone(alice.notifications());

    backend.hold_requests();
    backend.push_notification(ALICE, "Too late");
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(backend.held_requests() >= 2);

    alice.logout().await;
    backend.release_requests();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(store.is_closed());
    assert!(store.is_empty());
    assert_eq!(tracker.unread(), 0);

    // Every sender is gone once the session is torn down.
    drop(store);
    drop(tracker);
    drain(&mut rx);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn change_after_logout_is_refused() {
    let backend = Arc::new(MemoryBackend::demo());
    let (alice, _rx) = login(&backend, ALICE);
    alice.refresh_tasks().await.unwrap();
    let store = Arc::clone(alice.store());

    alice.logout().await;
    assert_eq!(
        store.advance(TaskId::new(1)).unwrap_err(),
        TaskError::TaskNotFound(TaskId::new(1))
    );
}
