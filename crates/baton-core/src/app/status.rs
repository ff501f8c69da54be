//! Status - タスク数の集計（outcome 別 / storage 別）

use serde::{Deserialize, Serialize};

use crate::domain::{CoordinationError, OutcomeState, StorageState, TaskRecord};
use crate::ports::TaskStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub unknown: usize,
    pub waiting: usize,
    pub active: usize,
    pub cancelled: usize,
    pub finished: usize,
    pub finalised: usize,
    pub failed: usize,

    pub unsaved: usize,
    pub has_updates: usize,
    pub saved: usize,
}

impl TaskCounts {
    pub async fn collect(tasks: &dyn TaskStore) -> Result<Self, CoordinationError> {
        let mut counts = Self::default();
        for record in tasks.list().await? {
            counts.record(&record);
        }
        Ok(counts)
    }

    pub fn record(&mut self, record: &TaskRecord) {
        match record.state() {
            OutcomeState::Unknown => self.unknown += 1,
            OutcomeState::Waiting => self.waiting += 1,
            OutcomeState::Active => self.active += 1,
            OutcomeState::Cancelled => self.cancelled += 1,
            OutcomeState::Finished => self.finished += 1,
            OutcomeState::Finalised => self.finalised += 1,
            OutcomeState::Failed => self.failed += 1,
        }
        match record.storage.state() {
            StorageState::Unsaved => self.unsaved += 1,
            StorageState::HasUpdates => self.has_updates += 1,
            StorageState::Saved => self.saved += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.unknown + self.waiting + self.active + self.cancelled + self.finished + self.finalised + self.failed
    }

    /// Tasks that can still change outcome.
    pub fn in_flight(&self) -> usize {
        self.unknown + self.waiting + self.active + self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ParticipantName, ReasonType, TaskId, TaskIdentity, TaskSequenceNumber, TransitionCause};
    use crate::impls::InMemoryTaskStore;
    use chrono::Utc;
    use ulid::Ulid;

    fn record(minor: u32) -> TaskRecord {
        let identity = TaskIdentity::new(
            TaskId::from_ulid(Ulid::new()),
            TaskSequenceNumber::new(100, minor),
            ReasonType::MessageProcessing,
        );
        TaskRecord::new(identity, ParticipantName::new("P-alpha"), serde_json::json!({}), true, Utc::now())
    }

    #[tokio::test]
    async fn counts_by_outcome_and_storage() {
        let store = InMemoryTaskStore::new();
        store.insert(record(0)).await.unwrap();

        let mut waiting = record(1);
        waiting
            .transition(OutcomeState::Waiting, TransitionCause::Enqueued, Utc::now())
            .unwrap();
        waiting.storage.mark_saved(0);
        store.insert(waiting).await.unwrap();

        let counts = TaskCounts::collect(&store).await.unwrap();

        assert_eq!(counts.total(), 2);
        assert_eq!(counts.unknown, 1);
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.unsaved, 1);
        assert_eq!(counts.saved, 1);
        assert_eq!(counts.in_flight(), 2);
    }

    #[test]
    fn serializes_flat() {
        let json = serde_json::to_value(TaskCounts {
            failed: 2,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["failed"], 2);
        assert_eq!(json["has_updates"], 0);
    }
}
