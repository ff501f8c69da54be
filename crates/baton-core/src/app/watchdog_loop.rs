//! WatchdogLoop - 期限切れ lease の回収
//!
//! # フロー（1 回の scan）
//! 1. LeaseStore::expired(now) で期限切れ card を列挙
//! 2. reclaim_if_expired で条件付き削除（その間に renew されていたら何もしない）
//! 3. タスクが ACTIVE なら retry_count を +1 して WAITING に戻し、キューに再投入
//!    - 上限を超えた / resilient_activity でない場合は FAILED にして surface
//! 4. タスクが既に ACTIVE でなければ（取消済みなど）card を消すだけ
//!
//! 持ち主が renew を止めた lease は `lease + scan_interval` 以内に回収されます。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::app::broker::TaskBroker;
use crate::app::events::EventGate;
use crate::app::records::update_task;
use crate::domain::{
    CoordinationError, DomainEvent, JobCard, OutcomeState, ParticipantTaskQueueEntry, TaskId, TransitionCause,
};
use crate::ports::{Clock, LeaseStore, ParticipantQueue, TaskStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Cards deleted by this scan.
    pub reclaimed: usize,
    pub requeued: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    /// Cards whose task had already left ACTIVE.
    pub skipped: usize,
}

enum Verdict {
    Requeued,
    Failed(String),
}

pub struct WatchdogLoop {
    leases: Arc<dyn LeaseStore>,
    tasks: Arc<dyn TaskStore>,
    queue: Arc<dyn ParticipantQueue>,
    broker: Arc<TaskBroker>,
    clock: Arc<dyn Clock>,
    events: EventGate,
    max_retries: u32,
    scan_interval: Duration,
}

impl WatchdogLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        leases: Arc<dyn LeaseStore>,
        tasks: Arc<dyn TaskStore>,
        queue: Arc<dyn ParticipantQueue>,
        broker: Arc<TaskBroker>,
        clock: Arc<dyn Clock>,
        events: EventGate,
        max_retries: u32,
        scan_interval: Duration,
    ) -> Self {
        Self {
            leases,
            tasks,
            queue,
            broker,
            clock,
            events,
            max_retries,
            scan_interval,
        }
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    /// Run scans on a fixed interval until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.scan_interval);
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

            match self.scan_once().await {
                Ok(report) if report.reclaimed > 0 => {
                    tracing::info!(
                        reclaimed = report.reclaimed,
                        requeued = report.requeued.len(),
                        failed = report.failed.len(),
                        skipped = report.skipped,
                        "watchdog scan"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "watchdog scan failed"),
            }
        }
        tracing::debug!("watchdog stopped");
    }

    pub async fn scan_once(&self) -> Result<ScanReport, CoordinationError> {
        let now = self.clock.now();
        let mut report = ScanReport::default();

        for card in self.leases.expired(now).await? {
            if !self.leases.reclaim_if_expired(&card, now).await? {
                // 直前に renew された / 既に消えていた
                continue;
            }
            report.reclaimed += 1;

            match self.recover(&card, now).await {
                Ok(Some(Verdict::Requeued)) => report.requeued.push(card.task_id),
                Ok(Some(Verdict::Failed(_))) => report.failed.push(card.task_id),
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(task_id = %card.task_id, error = %e, "reclaimed lease but could not recover task");
                }
            }
        }
        Ok(report)
    }

    async fn recover(&self, card: &JobCard, now: DateTime<Utc>) -> Result<Option<Verdict>, CoordinationError> {
        let task_id = card.task_id;
        let Some(current) = self.tasks.get(task_id).await? else {
            tracing::warn!(task_id = %task_id, "expired card for unknown task");
            return Ok(None);
        };
        if current.state() != OutcomeState::Active {
            tracing::debug!(task_id = %task_id, state = %current.state(), "lease reclaimed from inactive task");
            return Ok(None);
        }

        let max_retries = self.max_retries;
        let updated = update_task(self.tasks.as_ref(), task_id, |rec| {
            if rec.state() != OutcomeState::Active {
                return Err(CoordinationError::InvalidTransition {
                    task_id,
                    from: rec.state(),
                    to: OutcomeState::Waiting,
                });
            }
            let previous = rec.retry_count;
            rec.retry_count += 1;

            if !rec.oversight.resilient_activity() {
                let reason = "lease lost on a non-resilient task".to_string();
                rec.fail(TransitionCause::RetryExhausted, reason.clone(), now)?;
                return Ok(Verdict::Failed(reason));
            }
            if previous >= max_retries {
                let reason = format!("retry limit of {max_retries} exhausted");
                rec.fail(TransitionCause::RetryExhausted, reason.clone(), now)?;
                return Ok(Verdict::Failed(reason));
            }
            rec.transition(OutcomeState::Waiting, TransitionCause::LeaseReclaimed, now)?;
            if rec.oversight.ready_instant().is_none_or(|ready| ready <= now) {
                rec.oversight.record_ready(now)?;
            }
            Ok(Verdict::Requeued)
        })
        .await;

        let (record, verdict) = match updated {
            Ok(done) => done,
            Err(CoordinationError::InvalidTransition { from, .. }) => {
                tracing::debug!(task_id = %task_id, state = %from, "task left ACTIVE during reclamation");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if record.oversight.tracking_id() != Some(&card.holder_id) {
            tracing::warn!(
                task_id = %task_id,
                holder = %card.holder_id,
                "reclaimed card did not belong to the tracked executor"
            );
        }
        self.events.emit(DomainEvent::LeaseReclaimed {
            task_id,
            holder_id: card.holder_id.clone(),
            retry_count: record.retry_count,
        });

        match &verdict {
            Verdict::Requeued => {
                self.broker
                    .emit_transition(task_id, OutcomeState::Active, OutcomeState::Waiting, TransitionCause::LeaseReclaimed, now);
                let entry =
                    ParticipantTaskQueueEntry::new(record.participant.clone(), task_id, record.identity.sequence_number);
                self.queue.add(entry).await?;
                tracing::info!(task_id = %task_id, retry_count = record.retry_count, "stalled task re-queued");
            }
            Verdict::Failed(reason) => {
                self.broker
                    .emit_transition(task_id, OutcomeState::Active, OutcomeState::Failed, TransitionCause::RetryExhausted, now);
                self.broker.surface(task_id, reason.clone());
            }
        }
        Ok(Some(verdict))
    }
}
