//! TaskBroker - タスクの生成・enqueue・取消・結果報告
//!
//! タスクレコードへの書き込みはすべて `records::update_task`（version CAS）経由です。
//! 状態遷移が起きたら `Transitioned` イベントを出します。

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::app::events::EventGate;
use crate::app::records::update_task;
use crate::app::sequencer::SequenceGenerator;
use crate::domain::{
    CoordinationError, DomainEvent, ExecutorId, OutcomeState, ParticipantName, ParticipantTaskQueueEntry,
    ReasonType, ReleaseOutcome, TaskId, TaskIdentity, TaskPayload, TaskRecord, TransitionCause,
};
use crate::ports::{Clock, IdGenerator, LeaseStore, ParticipantQueue, TaskStore};

/// What an executor reports when it stops working on a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeReport {
    Finished,
    Failed { reason: String },
}

pub struct TaskBroker {
    tasks: Arc<dyn TaskStore>,
    queue: Arc<dyn ParticipantQueue>,
    leases: Arc<dyn LeaseStore>,
    sequencer: Arc<SequenceGenerator>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    events: EventGate,
}

impl TaskBroker {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        queue: Arc<dyn ParticipantQueue>,
        leases: Arc<dyn LeaseStore>,
        sequencer: Arc<SequenceGenerator>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        events: EventGate,
    ) -> Self {
        Self {
            tasks,
            queue,
            leases,
            sequencer,
            ids,
            clock,
            events,
        }
    }

    pub async fn get(&self, task_id: TaskId) -> Result<TaskRecord, CoordinationError> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or(CoordinationError::TaskNotFound(task_id))
    }

    pub async fn state(&self, task_id: TaskId) -> Result<OutcomeState, CoordinationError> {
        Ok(self.get(task_id).await?.state())
    }

    /// Create and sequence a task owned by `participant`. It starts UNKNOWN.
    #[tracing::instrument(skip(self, participant, body), fields(participant = %participant))]
    pub async fn create_task(
        &self,
        participant: ParticipantName,
        reason: ReasonType,
        body: serde_json::Value,
        resilient_activity: bool,
    ) -> Result<TaskRecord, CoordinationError> {
        let now = self.clock.now();
        let identity = TaskIdentity::new(self.ids.task_id(), self.sequencer.next(), reason);

        let mut record = TaskRecord::new(identity, participant, body, resilient_activity, now);
        record.oversight.record_registration(now)?;
        self.tasks.insert(record.clone()).await?;

        tracing::debug!(task_id = %identity.task_id, sequence = %identity.sequence_number, "task created");
        self.events.emit(DomainEvent::TaskCreated {
            task_id: identity.task_id,
            participant: record.participant.clone(),
            sequence_number: identity.sequence_number,
        });
        Ok(record)
    }

    /// Make the task WAITING and add it to `participant`'s queue.
    ///
    /// Enqueuing a task that is already WAITING only (re-)adds the queue entry.
    /// Returns whether a new queue entry was added.
    pub async fn enqueue(&self, task_id: TaskId, participant: &ParticipantName) -> Result<bool, CoordinationError> {
        let current = self.get(task_id).await?;
        let sequence_number = current.identity.sequence_number;

        if current.state() != OutcomeState::Waiting {
            let now = self.clock.now();
            let (_, from) = update_task(self.tasks.as_ref(), task_id, |rec| {
                let from = rec.transition(OutcomeState::Waiting, TransitionCause::Enqueued, now)?;
                rec.oversight.record_ready(now)?;
                Ok(from)
            })
            .await?;
            self.emit_transition(task_id, from, OutcomeState::Waiting, TransitionCause::Enqueued, now);
        }

        let entry = ParticipantTaskQueueEntry::new(participant.clone(), task_id, sequence_number);
        let added = self.queue.add(entry).await?;
        tracing::debug!(task_id = %task_id, participant = %participant, added, "task enqueued");
        Ok(added)
    }

    /// Cancel at any non-terminal state. An executor holding the lease notices
    /// on its next heartbeat.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, task_id: TaskId) -> Result<OutcomeState, CoordinationError> {
        let now = self.clock.now();
        let (record, from) = update_task(self.tasks.as_ref(), task_id, |rec| {
            rec.transition(OutcomeState::Cancelled, TransitionCause::CancelRequested, now)
        })
        .await?;

        self.queue.remove(&record.participant, task_id).await?;
        self.emit_transition(task_id, from, OutcomeState::Cancelled, TransitionCause::CancelRequested, now);
        tracing::info!(task_id = %task_id, from = %from, "task cancelled");
        Ok(from)
    }

    /// Outcome reported by the current lease holder. The lease is released
    /// whether or not the transition applies.
    #[tracing::instrument(skip(self, holder), fields(holder = %holder))]
    pub async fn report_outcome(
        &self,
        task_id: TaskId,
        holder: &ExecutorId,
        report: OutcomeReport,
    ) -> Result<OutcomeState, CoordinationError> {
        let held = self
            .leases
            .get(task_id)
            .await?
            .is_some_and(|card| card.is_held_by(holder));
        if !held {
            return Err(CoordinationError::LeaseNotHeld {
                task_id,
                holder: holder.clone(),
            });
        }

        let now = self.clock.now();
        let updated = update_task(self.tasks.as_ref(), task_id, |rec| {
            if rec.oversight.tracking_id() != Some(holder) {
                return Err(CoordinationError::LeaseNotHeld {
                    task_id,
                    holder: holder.clone(),
                });
            }
            match &report {
                OutcomeReport::Finished => {
                    let from = rec.transition(OutcomeState::Finished, TransitionCause::ExecutorFinished, now)?;
                    rec.oversight.record_finish(now)?;
                    Ok((from, TransitionCause::ExecutorFinished))
                }
                OutcomeReport::Failed { reason } => {
                    let from = rec.fail(TransitionCause::ExecutorFailed, reason.clone(), now)?;
                    Ok((from, TransitionCause::ExecutorFailed))
                }
            }
        })
        .await;

        self.release_quietly(task_id, holder).await;

        let (record, (from, cause)) = updated?;
        self.emit_transition(task_id, from, record.state(), cause, now);
        if let OutcomeReport::Failed { reason } = &report {
            self.surface(task_id, format!("executor {holder} failed: {reason}"));
        }
        Ok(record.state())
    }

    /// Record a task that arrived from another node.
    ///
    /// Redelivery of an already registered task returns the existing record.
    pub async fn register_inbound(
        &self,
        payload: &TaskPayload,
        participant: ParticipantName,
    ) -> Result<TaskRecord, CoordinationError> {
        let now = self.clock.now();
        let mut record = TaskRecord::new(payload.identity, participant, payload.body.clone(), false, now);
        record.oversight.record_registration(now)?;

        match self.tasks.insert(record.clone()).await {
            Ok(()) => {
                self.events.emit(DomainEvent::TaskCreated {
                    task_id: payload.task_id(),
                    participant: record.participant.clone(),
                    sequence_number: payload.identity.sequence_number,
                });
                Ok(record)
            }
            Err(CoordinationError::TaskExists(task_id)) => {
                tracing::debug!(task_id = %task_id, "inbound task already registered");
                self.get(task_id).await
            }
            Err(e) => Err(e),
        }
    }

    /// UNKNOWN -> FINISHED for an inbound task the local pipeline accepted.
    /// The flusher finalises it like any other finished task.
    ///
    /// A task that is already FINISHED or FINALISED (redelivery after the
    /// idempotency window) is left alone.
    pub async fn complete_inbound(&self, task_id: TaskId) -> Result<(), CoordinationError> {
        let now = self.clock.now();
        let completed = update_task(self.tasks.as_ref(), task_id, |rec| {
            let from = rec.transition(OutcomeState::Finished, TransitionCause::InboundProcessed, now)?;
            rec.oversight.record_finish(now)?;
            Ok(from)
        })
        .await;

        match completed {
            Ok((_, from)) => {
                self.emit_transition(task_id, from, OutcomeState::Finished, TransitionCause::InboundProcessed, now);
                Ok(())
            }
            Err(CoordinationError::InvalidTransition {
                from: OutcomeState::Finished | OutcomeState::Finalised,
                ..
            }) => {
                tracing::debug!(task_id = %task_id, "inbound task already completed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// FAILED with `cause`, then surfaced for operator attention.
    pub async fn fail_task(
        &self,
        task_id: TaskId,
        cause: TransitionCause,
        reason: impl Into<String>,
    ) -> Result<(), CoordinationError> {
        let reason = reason.into();
        let now = self.clock.now();
        let (_, from) = update_task(self.tasks.as_ref(), task_id, |rec| rec.fail(cause, reason.clone(), now)).await?;
        self.emit_transition(task_id, from, OutcomeState::Failed, cause, now);
        self.surface(task_id, reason);
        Ok(())
    }

    pub fn surface(&self, task_id: TaskId, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(task_id = %task_id, reason = %reason, "task needs operator attention");
        self.events.emit(DomainEvent::TaskSurfaced { task_id, reason });
    }

    pub(crate) fn emit_transition(
        &self,
        task_id: TaskId,
        from: OutcomeState,
        to: OutcomeState,
        cause: TransitionCause,
        at: DateTime<Utc>,
    ) {
        self.events.emit(DomainEvent::Transitioned {
            task_id,
            from,
            to,
            cause,
            at,
        });
    }

    async fn release_quietly(&self, task_id: TaskId, holder: &ExecutorId) {
        match self.leases.release(task_id, holder).await {
            Ok(ReleaseOutcome::Released) => self.events.emit(DomainEvent::LeaseReleased {
                task_id,
                holder_id: holder.clone(),
            }),
            Ok(ReleaseOutcome::NotHeldByCaller) => {}
            Err(e) => tracing::warn!(task_id = %task_id, error = %e, "lease release failed; watchdog will reclaim"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuditGranularity, JobCard};
    use crate::impls::{InMemoryLeaseStore, InMemoryParticipantQueue, InMemoryTaskStore, RecordingEventSink};
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{Duration, TimeZone};

    struct Fixture {
        broker: TaskBroker,
        queue: Arc<InMemoryParticipantQueue>,
        leases: Arc<InMemoryLeaseStore>,
        sink: Arc<RecordingEventSink>,
        clock: FixedClock,
    }

    fn fixture() -> Fixture {
        let clock = FixedClock::new(Utc.timestamp_opt(100, 0).unwrap());
        let queue = Arc::new(InMemoryParticipantQueue::new());
        let leases = Arc::new(InMemoryLeaseStore::new());
        let sink = Arc::new(RecordingEventSink::new());
        let broker = TaskBroker::new(
            Arc::new(InMemoryTaskStore::new()),
            queue.clone(),
            leases.clone(),
            Arc::new(SequenceGenerator::new(Arc::new(clock.clone()))),
            Arc::new(UlidGenerator::new(clock.clone())),
            Arc::new(clock.clone()),
            EventGate::new(sink.clone(), AuditGranularity::Extreme),
        );
        Fixture {
            broker,
            queue,
            leases,
            sink,
            clock,
        }
    }

    async fn enqueued(f: &Fixture) -> TaskRecord {
        let p = ParticipantName::new("P-alpha");
        let record = f
            .broker
            .create_task(p.clone(), ReasonType::MessageProcessing, serde_json::json!({"n": 1}), true)
            .await
            .unwrap();
        f.broker.enqueue(record.task_id(), &p).await.unwrap();
        record
    }

    #[tokio::test]
    async fn create_then_enqueue_sets_ready_and_queues() {
        let f = fixture();
        let record = enqueued(&f).await;

        let stored = f.broker.get(record.task_id()).await.unwrap();
        assert_eq!(stored.state(), OutcomeState::Waiting);
        assert_eq!(stored.identity.sequence_number.epoch_seconds, 100);
        assert!(stored.oversight.registration_instant().is_some());
        assert!(stored.oversight.ready_instant().is_some());
        assert_eq!(f.queue.len(&"P-alpha".into()).await.unwrap(), 1);
        assert_eq!(f.sink.states_of(record.task_id()), vec![OutcomeState::Waiting]);
    }

    #[tokio::test]
    async fn enqueue_is_idempotent() {
        let f = fixture();
        let record = enqueued(&f).await;

        let added = f.broker.enqueue(record.task_id(), &"P-alpha".into()).await.unwrap();
        assert!(!added);
        assert_eq!(f.broker.get(record.task_id()).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn cancel_removes_queue_entry_and_is_terminal() {
        let f = fixture();
        let record = enqueued(&f).await;

        assert_eq!(f.broker.cancel(record.task_id()).await.unwrap(), OutcomeState::Waiting);
        assert_eq!(f.queue.len(&"P-alpha".into()).await.unwrap(), 0);

        let err = f.broker.cancel(record.task_id()).await.unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidTransition { from: OutcomeState::Cancelled, .. }));
    }

    #[tokio::test]
    async fn only_lease_holder_can_report() {
        let f = fixture();
        let record = enqueued(&f).await;
        let e1 = ExecutorId::new("E1");

        let err = f
            .broker
            .report_outcome(record.task_id(), &e1, OutcomeReport::Finished)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::LeaseNotHeld { .. }));
    }

    #[tokio::test]
    async fn finished_report_sets_finish_instant_and_releases() {
        let f = fixture();
        let record = enqueued(&f).await;
        let task_id = record.task_id();
        let e1 = ExecutorId::new("E1");

        // lease + ACTIVE を手で用意する
        let now = f.clock.now();
        f.leases
            .try_acquire(JobCard::new(task_id, e1.clone(), now, Duration::seconds(30)), now)
            .await
            .unwrap();
        update_task(f.broker.tasks.as_ref(), task_id, |rec| {
            rec.transition(OutcomeState::Active, TransitionCause::LeaseAcquired, now)?;
            rec.oversight.record_start(e1.clone(), now)
        })
        .await
        .unwrap();

        f.clock.advance(Duration::seconds(3));
        let state = f.broker.report_outcome(task_id, &e1, OutcomeReport::Finished).await.unwrap();

        assert_eq!(state, OutcomeState::Finished);
        let stored = f.broker.get(task_id).await.unwrap();
        assert_eq!(stored.oversight.finish_instant(), Some(now + Duration::seconds(3)));
        assert!(f.leases.get(task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_report_is_surfaced() {
        let f = fixture();
        let record = enqueued(&f).await;
        let task_id = record.task_id();
        let e1 = ExecutorId::new("E1");
        let now = f.clock.now();
        f.leases
            .try_acquire(JobCard::new(task_id, e1.clone(), now, Duration::seconds(30)), now)
            .await
            .unwrap();
        update_task(f.broker.tasks.as_ref(), task_id, |rec| {
            rec.transition(OutcomeState::Active, TransitionCause::LeaseAcquired, now)?;
            rec.oversight.record_start(e1.clone(), now)
        })
        .await
        .unwrap();

        let state = f
            .broker
            .report_outcome(task_id, &e1, OutcomeReport::Failed { reason: "disk full".into() })
            .await
            .unwrap();

        assert_eq!(state, OutcomeState::Failed);
        assert_eq!(f.sink.surfaced(), vec![task_id]);
        assert_eq!(
            f.broker.get(task_id).await.unwrap().failure_reason.as_deref(),
            Some("disk full")
        );
    }

    #[tokio::test]
    async fn inbound_registration_is_idempotent() {
        let f = fixture();
        let identity = TaskIdentity::new(
            f.broker.ids.task_id(),
            crate::domain::TaskSequenceNumber::new(50, 3),
            ReasonType::TaskRouting,
        );
        let payload = TaskPayload::new(identity, serde_json::json!("x"));

        let first = f.broker.register_inbound(&payload, "P-beta".into()).await.unwrap();
        let again = f.broker.register_inbound(&payload, "P-beta".into()).await.unwrap();

        assert_eq!(first.task_id(), again.task_id());
        assert_eq!(again.identity.sequence_number, identity.sequence_number);
        assert!(again.oversight.registration_instant().is_some());
    }
}
