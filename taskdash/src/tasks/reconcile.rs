//! Task poll source: fetches both directions and merges them into the store.

use std::collections::HashMap;
use std::sync::Arc;

use taskdash_proto::task::{Task, TaskFilter, TaskId};

use super::OptimisticStore;
use crate::api::TaskApi;
use crate::poll::PollSource;
use crate::transport::{Transport, TransportError};

/// Polls the received and sent task lists and reconciles the store with
/// their union.
pub struct TaskReconciler<T: Transport> {
    api: Arc<TaskApi<T>>,
    store: Arc<OptimisticStore>,
}

impl<T: Transport> TaskReconciler<T> {
    #[must_use]
    pub const fn new(api: Arc<TaskApi<T>>, store: Arc<OptimisticStore>) -> Self {
        Self { api, store }
    }

    /// Fetches both lists concurrently and returns their union, deduplicated
    /// by id (a self-assigned task appears in both).
    ///
    /// # Errors
    ///
    /// Returns the first [`TransportError`] if either fetch fails. A partial
    /// result is never returned, since it would evict the missing half.
    pub async fn fetch_all(&self) -> Result<Vec<Task>, TransportError> {
        let (received, sent) = tokio::join!(
            self.api.fetch_tasks(TaskFilter::Received),
            self.api.fetch_tasks(TaskFilter::Sent),
        );
        let mut merged: HashMap<TaskId, Task> = HashMap::new();
        for task in received?.into_iter().chain(sent?) {
            merged.insert(task.id, task);
        }
        Ok(merged.into_values().collect())
    }
}

impl<T: Transport + 'static> PollSource for TaskReconciler<T> {
    type Snapshot = Vec<Task>;

    fn name(&self) -> &'static str {
        "tasks"
    }

    async fn fetch(&self) -> Result<Vec<Task>, TransportError> {
        self.fetch_all().await
    }

    fn apply(&self, snapshot: Vec<Task>) {
        let report = self.store.sync_snapshot(snapshot);
        tracing::debug!(
            added = report.added.len(),
            changed = report.changed.len(),
            evicted = report.evicted.len(),
            deferred = report.deferred.len(),
            "reconciled tasks"
        );
    }
}
