//! PersisterLoop - task snapshot の write-behind
//!
//! # フロー（1 レコード）
//! 1. storage が SAVED でないレコードを SnapshotStore::save()（version v）
//! 2. version v に対する CAS で SAVED(v) を記録。負けたら次回に回す
//! 3. FINISHED なら同じ CAS で FINALISED に進め、もう一度 1 から保存する
//!
//! FINALISED になるのは FINISHED の snapshot が永続化された後だけです。
//! 保存に失敗したレコードは数えて飛ばし、残りはそのまま続けます。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::app::events::EventGate;
use crate::domain::{CoordinationError, DomainEvent, OutcomeState, TaskRecord, TransitionCause};
use crate::ports::{Clock, SnapshotStore, TaskStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Snapshots written.
    pub saved: usize,
    /// FINISHED tasks moved to FINALISED.
    pub finalised: usize,
    /// Records that changed while being written; retried next time.
    pub conflicts: usize,
    /// Records whose snapshot could not be written; retried next time.
    pub failed: usize,
}

enum Flushed {
    Saved(TaskRecord),
    Finalised(TaskRecord),
    Stale,
}

pub struct SnapshotFlusher {
    tasks: Arc<dyn TaskStore>,
    snapshots: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    events: EventGate,
    interval: Duration,
}

impl SnapshotFlusher {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        snapshots: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        events: EventGate,
        interval: Duration,
    ) -> Self {
        Self {
            tasks,
            snapshots,
            clock,
            events,
            interval,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            match self.flush_once().await {
                Ok(report) if report != FlushReport::default() => {
                    tracing::debug!(
                        saved = report.saved,
                        finalised = report.finalised,
                        conflicts = report.conflicts,
                        failed = report.failed,
                        "snapshot flush"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "snapshot flush failed"),
            }
        }

        // 止まる前に最後の 1 回
        if let Err(e) = self.flush_once().await {
            tracing::error!(error = %e, "final snapshot flush failed");
        }
        tracing::debug!("snapshot flusher stopped");
    }

    pub async fn flush_once(&self) -> Result<FlushReport, CoordinationError> {
        let mut report = FlushReport::default();

        for record in self.tasks.list().await? {
            if !record.storage.needs_flush() {
                continue;
            }

            let task_id = record.task_id();
            let mut current = record;
            loop {
                let flushed = match self.flush(current).await {
                    Ok(flushed) => flushed,
                    Err(e) => {
                        // 1 件の失敗で残りを止めない。dirty のままなので次回また試す
                        tracing::warn!(task_id = %task_id, error = %e, "snapshot write failed");
                        report.failed += 1;
                        break;
                    }
                };
                match flushed {
                    Flushed::Saved(_) => {
                        report.saved += 1;
                        break;
                    }
                    Flushed::Finalised(next) => {
                        report.saved += 1;
                        report.finalised += 1;
                        current = next;
                    }
                    Flushed::Stale => {
                        report.conflicts += 1;
                        break;
                    }
                }
            }
        }
        Ok(report)
    }

    async fn flush(&self, record: TaskRecord) -> Result<Flushed, CoordinationError> {
        let task_id = record.task_id();
        let version = record.version;
        self.snapshots.save(&record).await?;

        let now = self.clock.now();
        let mut next = record;
        next.version = version + 1;
        next.storage.mark_saved(version);

        let finalising = next.state() == OutcomeState::Finished;
        if finalising {
            finalise(&mut next, now)?;
        }

        if !self.tasks.compare_and_swap(next.clone(), version).await? {
            tracing::debug!(task_id = %task_id, version, "record changed during flush");
            return Ok(Flushed::Stale);
        }

        self.events.emit(DomainEvent::SnapshotSaved { task_id, version });
        if !finalising {
            return Ok(Flushed::Saved(next));
        }

        self.events.emit(DomainEvent::Transitioned {
            task_id,
            from: OutcomeState::Finished,
            to: OutcomeState::Finalised,
            cause: TransitionCause::Persisted,
            at: now,
        });
        tracing::debug!(task_id = %task_id, "task finalised");
        Ok(Flushed::Finalised(next))
    }
}

fn finalise(record: &mut TaskRecord, now: DateTime<Utc>) -> Result<(), CoordinationError> {
    record.transition(OutcomeState::Finalised, TransitionCause::Persisted, now)?;
    record.oversight.record_finalisation(now)?;
    record.storage.mark_dirty();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::records::update_task;
    use crate::domain::{AuditGranularity, ExecutorId, ParticipantName, ReasonType, StorageState, TaskId, TaskIdentity};
    use crate::domain::TaskSequenceNumber;
    use crate::impls::{InMemorySnapshotStore, InMemoryTaskStore, RecordingEventSink};
    use crate::ports::FixedClock;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use ulid::Ulid;

    struct Fixture {
        tasks: Arc<InMemoryTaskStore>,
        snapshots: Arc<InMemorySnapshotStore>,
        sink: Arc<RecordingEventSink>,
        flusher: SnapshotFlusher,
        clock: FixedClock,
    }

    fn fixture() -> Fixture {
        let clock = FixedClock::new(Utc.timestamp_opt(100, 0).unwrap());
        let tasks = Arc::new(InMemoryTaskStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let sink = Arc::new(RecordingEventSink::new());
        let flusher = SnapshotFlusher::new(
            tasks.clone(),
            snapshots.clone(),
            Arc::new(clock.clone()),
            EventGate::new(sink.clone(), AuditGranularity::Extreme),
            Duration::from_secs(1),
        );
        Fixture {
            tasks,
            snapshots,
            sink,
            flusher,
            clock,
        }
    }

    async fn insert(f: &Fixture) -> TaskId {
        let identity = TaskIdentity::new(
            TaskId::from_ulid(Ulid::new()),
            TaskSequenceNumber::new(100, 1),
            ReasonType::MessageProcessing,
        );
        let record = TaskRecord::new(identity, ParticipantName::new("P-alpha"), serde_json::json!({}), true, f.clock.now());
        f.tasks.insert(record).await.unwrap();
        identity.task_id
    }

    async fn drive_to_finished(f: &Fixture, task_id: TaskId) {
        let now = f.clock.now();
        update_task(f.tasks.as_ref(), task_id, |rec| {
            rec.transition(OutcomeState::Waiting, TransitionCause::Enqueued, now)?;
            rec.transition(OutcomeState::Active, TransitionCause::LeaseAcquired, now)?;
            rec.oversight.record_start(ExecutorId::new("E1"), now)?;
            rec.transition(OutcomeState::Finished, TransitionCause::ExecutorFinished, now)?;
            rec.oversight.record_finish(now)
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unsaved_record_is_written_and_marked_saved() {
        let f = fixture();
        let id = insert(&f).await;

        let report = f.flusher.flush_once().await.unwrap();

        assert_eq!(report, FlushReport { saved: 1, ..Default::default() });
        let stored = f.tasks.get(id).await.unwrap().unwrap();
        assert_eq!(stored.storage.state(), StorageState::Saved);
        assert_eq!(stored.storage.saved_version(), Some(0));
        assert_eq!(f.snapshots.load(id).await.unwrap().unwrap().version, 0);

        // 変更がなければ何もしない
        assert_eq!(f.flusher.flush_once().await.unwrap(), FlushReport::default());
        assert_eq!(f.snapshots.write_count(), 1);
    }

    #[tokio::test]
    async fn update_after_save_makes_record_dirty_again() {
        let f = fixture();
        let id = insert(&f).await;
        f.flusher.flush_once().await.unwrap();

        update_task(f.tasks.as_ref(), id, |rec| {
            rec.retry_count += 1;
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(f.tasks.get(id).await.unwrap().unwrap().storage.state(), StorageState::HasUpdates);

        f.flusher.flush_once().await.unwrap();
        assert_eq!(f.snapshots.load(id).await.unwrap().unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn finished_task_is_finalised_and_saved_again() {
        let f = fixture();
        let id = insert(&f).await;
        drive_to_finished(&f, id).await;

        let report = f.flusher.flush_once().await.unwrap();

        assert_eq!(report, FlushReport { saved: 2, finalised: 1, ..Default::default() });
        let stored = f.tasks.get(id).await.unwrap().unwrap();
        assert_eq!(stored.state(), OutcomeState::Finalised);
        assert_eq!(stored.storage.state(), StorageState::Saved);
        assert!(stored.oversight.finalisation_instant().is_some());

        let durable = f.snapshots.load(id).await.unwrap().unwrap();
        assert_eq!(durable.state(), OutcomeState::Finalised);
        assert_eq!(f.sink.states_of(id), vec![OutcomeState::Finalised]);
    }

    /// Task store that sneaks in a write between the snapshot and the CAS.
    struct Racing(InMemoryTaskStore);

    #[async_trait]
    impl TaskStore for Racing {
        async fn insert(&self, record: TaskRecord) -> Result<(), CoordinationError> {
            self.0.insert(record).await
        }
        async fn get(&self, task_id: TaskId) -> Result<Option<TaskRecord>, CoordinationError> {
            self.0.get(task_id).await
        }
        async fn compare_and_swap(&self, record: TaskRecord, expected: u64) -> Result<bool, CoordinationError> {
            update_task(&self.0, record.task_id(), |rec| {
                rec.retry_count += 1;
                Ok(())
            })
            .await?;
            self.0.compare_and_swap(record, expected).await
        }
        async fn list(&self) -> Result<Vec<TaskRecord>, CoordinationError> {
            self.0.list().await
        }
    }

    #[tokio::test]
    async fn concurrent_write_leaves_record_dirty() {
        let f = fixture();
        let tasks = Arc::new(Racing(InMemoryTaskStore::new()));
        let flusher = SnapshotFlusher::new(
            tasks.clone(),
            f.snapshots.clone(),
            Arc::new(f.clock.clone()),
            EventGate::new(f.sink.clone(), AuditGranularity::Extreme),
            Duration::from_secs(1),
        );
        let identity = TaskIdentity::new(
            TaskId::from_ulid(Ulid::new()),
            TaskSequenceNumber::new(100, 1),
            ReasonType::MessageProcessing,
        );
        tasks
            .insert(TaskRecord::new(identity, ParticipantName::new("P-alpha"), serde_json::json!({}), true, f.clock.now()))
            .await
            .unwrap();

        let report = flusher.flush_once().await.unwrap();

        assert_eq!(report.conflicts, 1);
        let stored = tasks.get(identity.task_id).await.unwrap().unwrap();
        assert_eq!(stored.storage.state(), StorageState::Unsaved);
        assert_eq!(stored.version, 1);
    }

    /// Snapshot store that refuses one task.
    struct Refusing {
        inner: InMemorySnapshotStore,
        refused: TaskId,
    }

    #[async_trait]
    impl SnapshotStore for Refusing {
        async fn save(&self, snapshot: &TaskRecord) -> Result<(), CoordinationError> {
            if snapshot.task_id() == self.refused {
                return Err(CoordinationError::Store("disk full".into()));
            }
            self.inner.save(snapshot).await
        }
        async fn load(&self, task_id: TaskId) -> Result<Option<TaskRecord>, CoordinationError> {
            self.inner.load(task_id).await
        }
    }

    #[tokio::test]
    async fn failed_write_does_not_hold_back_other_records() {
        let f = fixture();
        let refused = insert(&f).await;
        let other = insert(&f).await;
        let flusher = SnapshotFlusher::new(
            f.tasks.clone(),
            Arc::new(Refusing {
                inner: InMemorySnapshotStore::new(),
                refused,
            }),
            Arc::new(f.clock.clone()),
            EventGate::new(f.sink.clone(), AuditGranularity::Extreme),
            Duration::from_secs(1),
        );

        let report = flusher.flush_once().await.unwrap();

        assert_eq!(report, FlushReport { saved: 1, failed: 1, ..Default::default() });
        let saved = f.tasks.get(other).await.unwrap().unwrap();
        assert_eq!(saved.storage.state(), StorageState::Saved);
        let pending = f.tasks.get(refused).await.unwrap().unwrap();
        assert_eq!(pending.storage.state(), StorageState::Unsaved);
    }

    #[tokio::test(start_paused = true)]
    async fn run_flushes_until_shutdown() {
        let f = fixture();
        let id = insert(&f).await;
        let flusher = Arc::new(f.flusher);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(flusher.run(rx));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(f.tasks.get(id).await.unwrap().unwrap().storage.state(), StorageState::Saved);
    }
}
