//! InMemoryTaskStore - 開発用のタスクレコードストア

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::domain::{CoordinationError, TaskId, TaskRecord};
use crate::ports::TaskStore;

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, record: TaskRecord) -> Result<(), CoordinationError> {
        let mut records = self.records.write();
        let task_id = record.task_id();
        if records.contains_key(&task_id) {
            return Err(CoordinationError::TaskExists(task_id));
        }
        records.insert(task_id, record);
        Ok(())
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<TaskRecord>, CoordinationError> {
        Ok(self.records.read().get(&task_id).cloned())
    }

    async fn compare_and_swap(&self, record: TaskRecord, expected_version: u64) -> Result<bool, CoordinationError> {
        let mut records = self.records.write();
        let task_id = record.task_id();
        match records.get_mut(&task_id) {
            None => Err(CoordinationError::TaskNotFound(task_id)),
            Some(current) if current.version != expected_version => Ok(false),
            Some(current) => {
                *current = record;
                Ok(true)
            }
        }
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, CoordinationError> {
        let mut all: Vec<TaskRecord> = self.records.read().values().cloned().collect();
        all.sort_by_key(|r| (r.identity.sequence_number, r.task_id()));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ParticipantName, ReasonType, TaskIdentity, TaskSequenceNumber};
    use chrono::Utc;
    use ulid::Ulid;

    fn record(minor: u32) -> TaskRecord {
        let identity = TaskIdentity::new(
            TaskId::from_ulid(Ulid::new()),
            TaskSequenceNumber::new(100, minor),
            ReasonType::MessageProcessing,
        );
        TaskRecord::new(identity, ParticipantName::new("P-alpha"), serde_json::json!(null), true, Utc::now())
    }

    #[tokio::test]
    async fn insert_rejects_duplicates() {
        let store = InMemoryTaskStore::new();
        let r = record(1);
        store.insert(r.clone()).await.unwrap();

        let err = store.insert(r.clone()).await.unwrap_err();
        assert!(matches!(err, CoordinationError::TaskExists(id) if id == r.task_id()));
    }

    #[tokio::test]
    async fn stale_version_is_not_written() {
        let store = InMemoryTaskStore::new();
        let r = record(1);
        store.insert(r.clone()).await.unwrap();

        let mut first = r.clone();
        first.version = 1;
        first.retry_count = 1;
        assert!(store.compare_and_swap(first, 0).await.unwrap());

        let mut second = r.clone();
        second.version = 1;
        second.retry_count = 7;
        assert!(!store.compare_and_swap(second, 0).await.unwrap());

        let stored = store.get(r.task_id()).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 1);
    }

    #[tokio::test]
    async fn list_is_in_sequence_order() {
        let store = InMemoryTaskStore::new();
        let later = record(2);
        let earlier = record(1);
        store.insert(later.clone()).await.unwrap();
        store.insert(earlier.clone()).await.unwrap();

        let ids: Vec<TaskId> = store.list().await.unwrap().iter().map(TaskRecord::task_id).collect();
        assert_eq!(ids, vec![earlier.task_id(), later.task_id()]);
    }
}
