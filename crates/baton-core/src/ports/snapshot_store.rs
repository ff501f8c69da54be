//! SnapshotStore port - write-behind の永続化先

use async_trait::async_trait;

use crate::domain::{CoordinationError, TaskId, TaskRecord};

/// Durable copy of task records.
///
/// `save` must be durable when it returns `Ok`; the flusher then marks the
/// record SAVED at exactly the version it wrote.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &TaskRecord) -> Result<(), CoordinationError>;

    async fn load(&self, task_id: TaskId) -> Result<Option<TaskRecord>, CoordinationError>;
}
