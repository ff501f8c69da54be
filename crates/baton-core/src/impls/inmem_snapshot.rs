//! InMemorySnapshotStore - 開発用の永続化先（テストで書き込みを観測する）

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::domain::{CoordinationError, TaskId, TaskRecord};
use crate::ports::SnapshotStore;

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<HashMap<TaskId, TaskRecord>>,
    writes: Mutex<u64>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn write_count(&self) -> u64 {
        *self.writes.lock()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &TaskRecord) -> Result<(), CoordinationError> {
        self.snapshots.lock().insert(snapshot.task_id(), snapshot.clone());
        *self.writes.lock() += 1;
        Ok(())
    }

    async fn load(&self, task_id: TaskId) -> Result<Option<TaskRecord>, CoordinationError> {
        Ok(self.snapshots.lock().get(&task_id).cloned())
    }
}
