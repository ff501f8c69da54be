//! LeaseManager - job card の取得・更新・解放
//!
//! # acquire のフロー
//! 0. タスクが WAITING でなければ store に触らず NotEligible
//! 1. LeaseStore::try_acquire（card が無いか期限切れのときだけ成功）
//! 2. タスクを WAITING -> ACTIVE（start_instant と tracking_id を記録）
//! 3. 2 が失敗したら NotEligible。タスクが ACTIVE なら card は残す
//!    （上書きした期限切れ card の代わりに watchdog の回収対象になる）。それ以外なら消す
//!
//! 期限切れだがまだ watchdog が回収していない lease はタスクが ACTIVE のままなので
//! 0 で弾かれます。再実行は watchdog の回収後です。

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::app::events::EventGate;
use crate::app::records::update_task;
use crate::domain::{
    AcquireOutcome, CoordinationError, DomainEvent, ExecutorId, JobCard, OutcomeState, ReleaseOutcome,
    RenewOutcome, TaskId, TransitionCause,
};
use crate::ports::{Clock, LeaseStore, ParticipantQueue, TaskStore};

pub struct LeaseManager {
    leases: Arc<dyn LeaseStore>,
    tasks: Arc<dyn TaskStore>,
    queue: Arc<dyn ParticipantQueue>,
    clock: Arc<dyn Clock>,
    events: EventGate,
}

fn lease_span(lease: Duration) -> Result<chrono::Duration, CoordinationError> {
    chrono::Duration::from_std(lease).map_err(|e| CoordinationError::Config(format!("lease duration: {e}")))
}

impl LeaseManager {
    pub fn new(
        leases: Arc<dyn LeaseStore>,
        tasks: Arc<dyn TaskStore>,
        queue: Arc<dyn ParticipantQueue>,
        clock: Arc<dyn Clock>,
        events: EventGate,
    ) -> Self {
        Self {
            leases,
            tasks,
            queue,
            clock,
            events,
        }
    }

    #[tracing::instrument(skip(self, holder), fields(holder = %holder))]
    pub async fn acquire(
        &self,
        task_id: TaskId,
        holder: &ExecutorId,
        lease: Duration,
    ) -> Result<AcquireOutcome, CoordinationError> {
        let state = self
            .tasks
            .get(task_id)
            .await?
            .ok_or(CoordinationError::TaskNotFound(task_id))?
            .state();
        if state != OutcomeState::Waiting {
            return Ok(AcquireOutcome::NotEligible(state));
        }

        let now = self.clock.now();
        let card = JobCard::new(task_id, holder.clone(), now, lease_span(lease)?);

        let card = match self.leases.try_acquire(card, now).await? {
            AcquireOutcome::Acquired(card) => card,
            held => {
                tracing::debug!(task_id = %task_id, "lease already held");
                return Ok(held);
            }
        };

        let started = update_task(self.tasks.as_ref(), task_id, |rec| {
            let from = rec.transition(OutcomeState::Active, TransitionCause::LeaseAcquired, now)?;
            rec.oversight.record_start(holder.clone(), now)?;
            Ok(from)
        })
        .await;

        let record = match started {
            Ok((record, _)) => record,
            Err(CoordinationError::InvalidTransition { from, .. }) => {
                tracing::debug!(task_id = %task_id, state = %from, "task stopped being eligible during acquisition");
                if from != OutcomeState::Active {
                    self.leases.release(task_id, holder).await?;
                }
                return Ok(AcquireOutcome::NotEligible(from));
            }
            Err(err) => {
                self.leases.release(task_id, holder).await?;
                return Err(err);
            }
        };

        self.queue.remove(&record.participant, task_id).await?;

        self.events.emit(DomainEvent::LeaseAcquired {
            task_id,
            holder_id: holder.clone(),
            lease_expiry: card.lease_expiry,
        });
        self.events.emit(DomainEvent::Transitioned {
            task_id,
            from: OutcomeState::Waiting,
            to: OutcomeState::Active,
            cause: TransitionCause::LeaseAcquired,
            at: now,
        });
        tracing::debug!(task_id = %task_id, expiry = %card.lease_expiry, "lease acquired");
        Ok(AcquireOutcome::Acquired(card))
    }

    /// Extend the lease to `new_expiry` and stamp `last_checked_instant`.
    pub async fn renew(
        &self,
        task_id: TaskId,
        holder: &ExecutorId,
        new_expiry: DateTime<Utc>,
    ) -> Result<RenewOutcome, CoordinationError> {
        let outcome = self.leases.renew(task_id, holder, new_expiry).await?;
        let RenewOutcome::Renewed(card) = &outcome else {
            tracing::debug!(task_id = %task_id, holder = %holder, "renewal refused; lease lost");
            return Ok(outcome);
        };

        let now = self.clock.now();
        let checked = update_task(self.tasks.as_ref(), task_id, |rec| {
            if rec.oversight.tracking_id() == Some(holder) {
                rec.oversight.record_check(now)?;
            }
            Ok(())
        })
        .await;
        if let Err(e) = checked {
            tracing::warn!(task_id = %task_id, error = %e, "could not stamp last checked instant");
        }

        self.events.emit(DomainEvent::LeaseRenewed {
            task_id,
            holder_id: holder.clone(),
            lease_expiry: card.lease_expiry,
        });
        Ok(outcome)
    }

    /// Renew for another `lease` from now.
    pub async fn renew_for(
        &self,
        task_id: TaskId,
        holder: &ExecutorId,
        lease: Duration,
    ) -> Result<RenewOutcome, CoordinationError> {
        let new_expiry = self.clock.now() + lease_span(lease)?;
        self.renew(task_id, holder, new_expiry).await
    }

    pub async fn release(&self, task_id: TaskId, holder: &ExecutorId) -> Result<ReleaseOutcome, CoordinationError> {
        let outcome = self.leases.release(task_id, holder).await?;
        if outcome == ReleaseOutcome::Released {
            self.events.emit(DomainEvent::LeaseReleased {
                task_id,
                holder_id: holder.clone(),
            });
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::broker::TaskBroker;
    use crate::app::sequencer::SequenceGenerator;
    use crate::domain::{AuditGranularity, ParticipantName, ReasonType};
    use crate::impls::{InMemoryLeaseStore, InMemoryParticipantQueue, InMemoryTaskStore, RecordingEventSink};
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::TimeZone;

    struct Fixture {
        broker: TaskBroker,
        manager: LeaseManager,
        queue: Arc<InMemoryParticipantQueue>,
        tasks: Arc<InMemoryTaskStore>,
        clock: FixedClock,
    }

    fn fixture() -> Fixture {
        let clock = FixedClock::new(Utc.timestamp_opt(100, 0).unwrap());
        let tasks = Arc::new(InMemoryTaskStore::new());
        let queue = Arc::new(InMemoryParticipantQueue::new());
        let leases = Arc::new(InMemoryLeaseStore::new());
        let events = EventGate::new(Arc::new(RecordingEventSink::new()), AuditGranularity::Extreme);
        let broker = TaskBroker::new(
            tasks.clone(),
            queue.clone(),
            leases.clone(),
            Arc::new(SequenceGenerator::new(Arc::new(clock.clone()))),
            Arc::new(UlidGenerator::new(clock.clone())),
            Arc::new(clock.clone()),
            events.clone(),
        );
        let manager = LeaseManager::new(leases, tasks.clone(), queue.clone(), Arc::new(clock.clone()), events);
        Fixture {
            broker,
            manager,
            queue,
            tasks,
            clock,
        }
    }

    async fn waiting_task(f: &Fixture) -> TaskId {
        let p = ParticipantName::new("P-alpha");
        let record = f
            .broker
            .create_task(p.clone(), ReasonType::MessageProcessing, serde_json::json!({}), true)
            .await
            .unwrap();
        f.broker.enqueue(record.task_id(), &p).await.unwrap();
        record.task_id()
    }

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn acquire_activates_task_and_dequeues() {
        let f = fixture();
        let task_id = waiting_task(&f).await;
        let e1 = ExecutorId::new("E1");

        let outcome = f.manager.acquire(task_id, &e1, LEASE).await.unwrap();

        let AcquireOutcome::Acquired(card) = outcome else {
            panic!("expected acquisition, got {outcome:?}");
        };
        assert_eq!(card.lease_expiry, f.clock.now() + chrono::Duration::seconds(30));

        let record = f.tasks.get(task_id).await.unwrap().unwrap();
        assert_eq!(record.state(), OutcomeState::Active);
        assert_eq!(record.oversight.tracking_id(), Some(&e1));
        assert_eq!(record.oversight.start_instant(), Some(f.clock.now()));
        assert_eq!(f.queue.len(&"P-alpha".into()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn second_executor_sees_holder() {
        let f = fixture();
        let task_id = waiting_task(&f).await;
        f.manager.acquire(task_id, &ExecutorId::new("E1"), LEASE).await.unwrap();

        let outcome = f.manager.acquire(task_id, &ExecutorId::new("E2"), LEASE).await.unwrap();
        assert!(matches!(outcome, AcquireOutcome::AlreadyHeld { holder_id, .. } if holder_id == ExecutorId::new("E1")));
    }

    #[tokio::test]
    async fn cancelled_task_is_not_eligible_and_card_is_returned() {
        let f = fixture();
        let task_id = waiting_task(&f).await;
        f.broker.cancel(task_id).await.unwrap();

        let outcome = f.manager.acquire(task_id, &ExecutorId::new("E1"), LEASE).await.unwrap();

        assert_eq!(outcome, AcquireOutcome::NotEligible(OutcomeState::Cancelled));
        let again = f.manager.acquire(task_id, &ExecutorId::new("E2"), LEASE).await.unwrap();
        assert_eq!(again, AcquireOutcome::NotEligible(OutcomeState::Cancelled));
    }

    #[tokio::test]
    async fn expired_but_unreclaimed_lease_blocks_new_holder() {
        let f = fixture();
        let task_id = waiting_task(&f).await;
        f.manager.acquire(task_id, &ExecutorId::new("E1"), LEASE).await.unwrap();

        f.clock.advance(chrono::Duration::seconds(31));
        let outcome = f.manager.acquire(task_id, &ExecutorId::new("E2"), LEASE).await.unwrap();

        assert_eq!(outcome, AcquireOutcome::NotEligible(OutcomeState::Active));
        let card = f.manager.leases.get(task_id).await.unwrap().unwrap();
        assert_eq!(card.holder_id, ExecutorId::new("E1"));
    }

    #[tokio::test]
    async fn renew_stamps_last_checked_and_extends() {
        let f = fixture();
        let task_id = waiting_task(&f).await;
        let e1 = ExecutorId::new("E1");
        f.manager.acquire(task_id, &e1, LEASE).await.unwrap();

        f.clock.advance(chrono::Duration::seconds(10));
        let outcome = f.manager.renew_for(task_id, &e1, LEASE).await.unwrap();

        let RenewOutcome::Renewed(card) = outcome else {
            panic!("expected renewal");
        };
        assert_eq!(card.lease_expiry, f.clock.now() + chrono::Duration::seconds(30));
        let record = f.tasks.get(task_id).await.unwrap().unwrap();
        assert_eq!(record.oversight.last_checked_instant(), Some(f.clock.now()));
    }

    #[tokio::test]
    async fn non_holder_cannot_renew_or_release() {
        let f = fixture();
        let task_id = waiting_task(&f).await;
        f.manager.acquire(task_id, &ExecutorId::new("E1"), LEASE).await.unwrap();

        let e2 = ExecutorId::new("E2");
        assert_eq!(
            f.manager.renew_for(task_id, &e2, LEASE).await.unwrap(),
            RenewOutcome::NotHeldByCaller
        );
        assert_eq!(f.manager.release(task_id, &e2).await.unwrap(), ReleaseOutcome::NotHeldByCaller);
        assert_eq!(
            f.manager.release(task_id, &ExecutorId::new("E1")).await.unwrap(),
            ReleaseOutcome::Released
        );
    }
}
