//! Optimistic read-modify-write of task records.

use crate::domain::{CoordinationError, TaskId, TaskRecord};
use crate::ports::TaskStore;

/// Attempts before a contended update gives up with `Conflict`.
pub const MAX_UPDATE_ATTEMPTS: u32 = 16;

/// Read the record, apply `mutate`, and compare-and-swap it back, re-reading
/// on version conflicts.
///
/// `mutate` may run several times and must only touch the record it is given.
/// If it returns `Err`, nothing is written. Every stored write bumps
/// `version` and marks the record dirty for the snapshot flusher.
pub async fn update_task<T, F>(
    store: &dyn TaskStore,
    task_id: TaskId,
    mut mutate: F,
) -> Result<(TaskRecord, T), CoordinationError>
where
    F: FnMut(&mut TaskRecord) -> Result<T, CoordinationError> + Send,
    T: Send,
{
    for attempt in 1..=MAX_UPDATE_ATTEMPTS {
        let current = store.get(task_id).await?.ok_or(CoordinationError::TaskNotFound(task_id))?;
        let expected = current.version;

        let mut next = current;
        let out = mutate(&mut next)?;
        next.version = expected + 1;
        next.storage.mark_dirty();

        if store.compare_and_swap(next.clone(), expected).await? {
            return Ok((next, out));
        }
        tracing::debug!(task_id = %task_id, expected, attempt, "task record changed concurrently; retrying");
    }
    Err(CoordinationError::Conflict {
        task_id,
        attempts: MAX_UPDATE_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        OutcomeState, ParticipantName, ReasonType, TaskIdentity, TaskSequenceNumber, TransitionCause,
    };
    use crate::impls::InMemoryTaskStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;
    use ulid::Ulid;

    fn record() -> TaskRecord {
        let identity = TaskIdentity::new(
            TaskId::from_ulid(Ulid::new()),
            TaskSequenceNumber::new(100, 1),
            ReasonType::MessageProcessing,
        );
        TaskRecord::new(identity, ParticipantName::new("P-alpha"), serde_json::json!({}), true, Utc::now())
    }

    #[tokio::test]
    async fn update_bumps_version_once_per_write() {
        let store = InMemoryTaskStore::new();
        let r = record();
        store.insert(r.clone()).await.unwrap();

        let (stored, prev) = update_task(&store, r.task_id(), |rec| {
            rec.transition(OutcomeState::Waiting, TransitionCause::Enqueued, Utc::now())
        })
        .await
        .unwrap();

        assert_eq!(prev, OutcomeState::Unknown);
        assert_eq!(stored.version, 1);
        assert_eq!(store.get(r.task_id()).await.unwrap().unwrap().state(), OutcomeState::Waiting);
    }

    #[tokio::test]
    async fn failed_mutation_writes_nothing() {
        let store = InMemoryTaskStore::new();
        let r = record();
        store.insert(r.clone()).await.unwrap();

        let err = update_task(&store, r.task_id(), |rec| {
            rec.transition(OutcomeState::Finished, TransitionCause::ExecutorFinished, Utc::now())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, CoordinationError::InvalidTransition { .. }));
        assert_eq!(store.get(r.task_id()).await.unwrap().unwrap().version, 0);
    }

    #[tokio::test]
    async fn missing_task_is_reported() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::from_ulid(Ulid::new());
        let err = update_task(&store, id, |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, CoordinationError::TaskNotFound(t) if t == id));
    }

    /// Store whose CAS always loses.
    struct AlwaysStale(InMemoryTaskStore);

    #[async_trait]
    impl TaskStore for AlwaysStale {
        async fn insert(&self, record: TaskRecord) -> Result<(), CoordinationError> {
            self.0.insert(record).await
        }
        async fn get(&self, task_id: TaskId) -> Result<Option<TaskRecord>, CoordinationError> {
            self.0.get(task_id).await
        }
        async fn compare_and_swap(&self, _record: TaskRecord, _expected: u64) -> Result<bool, CoordinationError> {
            Ok(false)
        }
        async fn list(&self) -> Result<Vec<TaskRecord>, CoordinationError> {
            self.0.list().await
        }
    }

    #[tokio::test]
    async fn endless_contention_gives_up_with_conflict() {
        let store = AlwaysStale(InMemoryTaskStore::new());
        let r = record();
        store.insert(r.clone()).await.unwrap();

        let err = update_task(&store, r.task_id(), |_| Ok(())).await.unwrap_err();
        assert!(matches!(err, CoordinationError::Conflict { attempts: MAX_UPDATE_ATTEMPTS, .. }));
    }

    #[tokio::test]
    async fn concurrent_updates_are_all_applied() {
        let store = Arc::new(InMemoryTaskStore::new());
        let r = record();
        store.insert(r.clone()).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = r.task_id();
                tokio::spawn(async move {
                    update_task(store.as_ref(), id, |rec| {
                        rec.retry_count += 1;
                        Ok(())
                    })
                    .await
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let stored = store.get(r.task_id()).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 8);
        assert_eq!(stored.version, 8);
    }
}
