//! Property-based tests for the JSON wire format.
//!
//! Uses proptest to verify:
//! 1. Status names on the wire are stable and parse back to the same status.
//! 2. Any task survives serialize → deserialize unchanged.
//! 3. Subtask lists decode the same whether sent as an array or as an
//!    encoded JSON string, and numeric subtask ids become strings.
//! 4. Arbitrary JSON text never causes a panic when decoding a task.

#![allow(clippy::unwrap_used)]

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;
use taskdash_proto::notification::Notification;
use taskdash_proto::task::{
    Subtask, SubtaskId, SubtaskStatus, Task, TaskId, TaskPatch, TaskStatus, UserId,
};

// --- Strategies ---

fn arb_task_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

fn arb_subtask_status() -> impl Strategy<Value = SubtaskStatus> {
    prop_oneof![
        Just(SubtaskStatus::ToDo),
        Just(SubtaskStatus::InProgress),
        Just(SubtaskStatus::Completed),
    ]
}

/// Whole seconds keep the RFC 3339 text short; sub-second precision is
/// covered by the unit tests.
fn arb_time() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

fn arb_subtask() -> impl Strategy<Value = Subtask> {
    ("[a-z0-9-]{1,24}", "[^\\x00]{1,40}", arb_subtask_status()).prop_map(|(id, title, status)| {
        Subtask {
            id: SubtaskId::new(id),
            title,
            status,
        }
    })
}

prop_compose! {
    fn arb_task()(
        id in 1i64..1_000_000,
        sender in 1i64..100,
        receiver in 1i64..100,
        names in proptest::option::of(("[A-Za-z ]{1,20}", "[A-Za-z ]{1,20}")),
        title in "[^\\x00]{1,80}",
        description in "[^\\x00]{0,200}",
        status in arb_task_status(),
        subtasks in prop::collection::vec(arb_subtask(), 0..6),
        created_at in arb_time(),
        due_date in proptest::option::of(arb_time()),
        completed in arb_time(),
    ) -> Task {
        let (sender_name, receiver_name) = names.map_or((None, None), |(s, r)| (Some(s), Some(r)));
        let mut task = Task {
            id: TaskId::new(id),
            sender_id: UserId::new(sender),
            receiver_id: UserId::new(receiver),
            sender_name,
            receiver_name,
            title,
            description,
            status: TaskStatus::ToDo,
            subtasks,
            created_at,
            due_date,
            completed_at: None,
        };
        task.set_status(status, completed);
        task
    }
}

// --- Properties ---

proptest! {
    #[test]
    fn status_wire_names_are_stable(status in arb_task_status()) {
        let wire = serde_json::to_value(status).unwrap();
        let name = wire.as_str().unwrap();
        prop_assert!(["To-Do", "In Progress", "Completed", "Canceled"].contains(&name));
        prop_assert_eq!(name, status.as_str());
        prop_assert_eq!(name.parse::<TaskStatus>().unwrap(), status);
        let back: TaskStatus = serde_json::from_value(wire).unwrap();
        prop_assert_eq!(back, status);
    }

    #[test]
    fn task_survives_json(task in arb_task()) {
        let text = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&text).unwrap();
        prop_assert_eq!(back.completed_at.is_some(), task.status == TaskStatus::Completed);
        prop_assert_eq!(back, task);
    }

    #[test]
    fn encoded_subtask_list_matches_array(subtasks in prop::collection::vec(arb_subtask(), 0..6)) {
        let array = serde_json::to_value(&subtasks).unwrap();
        let encoded = serde_json::Value::String(array.to_string());
        let base = |list: serde_json::Value| json!({
            "id": 1,
            "sender_id": 1,
            "receiver_id": 2,
            "title": "t",
            "status": "To-Do",
            "subtasks": list,
            "created_at": "2026-01-01T00:00:00Z",
        });
        let from_array: Task = serde_json::from_value(base(array)).unwrap();
        let from_text: Task = serde_json::from_value(base(encoded)).unwrap();
        prop_assert_eq!(&from_array.subtasks, &subtasks);
        prop_assert_eq!(from_text.subtasks, subtasks);
    }

    #[test]
    fn numeric_subtask_ids_decode_as_text(raw in any::<u32>()) {
        let value = json!({ "id": raw, "title": "step", "status": "Completed" });
        let subtask: Subtask = serde_json::from_value(value).unwrap();
        prop_assert_eq!(subtask.id.as_str(), raw.to_string());
        prop_assert_eq!(serde_json::to_value(&subtask.id).unwrap(), json!(raw.to_string()));
    }

    #[test]
    fn patch_carries_only_what_changed(status in proptest::option::of(arb_task_status())) {
        let patch = TaskPatch { status, subtasks: None };
        let value = serde_json::to_value(&patch).unwrap();
        let object = value.as_object().unwrap();
        prop_assert!(!object.contains_key("subtasks"));
        prop_assert_eq!(object.contains_key("status"), status.is_some());
    }

    #[test]
    fn notification_read_flag_defaults_to_unread(id in "[a-f0-9]{6,24}", message in "[^\\x00]{0,60}") {
        let value = json!({ "_id": &id, "message": message, "createdAt": "2026-01-01T00:00:00Z" });
        let notification: Notification = serde_json::from_value(value).unwrap();
        prop_assert!(!notification.is_read);
        prop_assert_eq!(notification.id.as_str(), id.as_str());
    }

    #[test]
    fn arbitrary_text_never_panics(text in "\\PC{0,256}") {
        let _ = serde_json::from_str::<Task>(&text);
        let _ = serde_json::from_str::<Notification>(&text);
    }
}
