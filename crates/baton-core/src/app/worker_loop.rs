//! WorkerLoop - executor の実行ループ
//!
//! # フロー（1 件分）
//! 1. ParticipantQueue::take_next() で次の entry を取る
//! 2. LeaseManager::acquire() で job card を取る（取れなければ次へ）
//!    - 取れなかったときタスクがまだ WAITING なら entry を queue に戻す
//! 3. ProcessingPipeline::process() を実行しつつ、renew_interval ごとに heartbeat
//!    - heartbeat でタスクが CANCELLED なら作業を捨てて lease を返す
//!    - renew が NotHeldByCaller なら lease は失われている。作業を捨てて何もしない
//! 4. 結果を TaskBroker::report_outcome() で報告（lease もここで返る）

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::broker::{OutcomeReport, TaskBroker};
use crate::app::lease_manager::LeaseManager;
use crate::domain::{
    AcquireOutcome, CoordinationError, ExecutorId, NodeId, OutcomeState, ParticipantName, ParticipantTaskQueueEntry,
    RenewOutcome, TaskId, TaskPayload,
};
use crate::ports::{ParticipantQueue, PipelineError, ProcessingPipeline};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub lease: Duration,
    pub renew_interval: Duration,
    /// Sleep between polls of an empty queue.
    pub idle_poll: Duration,
}

/// What one pass of [`Executor::run_once`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Queue was empty.
    Idle,
    /// Lease could not be taken; someone else has the task or it left WAITING.
    Skipped(TaskId),
    Reported { task_id: TaskId, state: OutcomeState },
    Cancelled(TaskId),
    LeaseLost(TaskId),
}

enum Execution {
    Done(Result<(), PipelineError>),
    Cancelled,
    LeaseLost,
}

pub struct Executor {
    id: ExecutorId,
    participant: ParticipantName,
    queue: Arc<dyn ParticipantQueue>,
    leases: Arc<LeaseManager>,
    broker: Arc<TaskBroker>,
    pipeline: Arc<dyn ProcessingPipeline>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(
        id: ExecutorId,
        participant: ParticipantName,
        queue: Arc<dyn ParticipantQueue>,
        leases: Arc<LeaseManager>,
        broker: Arc<TaskBroker>,
        pipeline: Arc<dyn ProcessingPipeline>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            id,
            participant,
            queue,
            leases,
            broker,
            pipeline,
            settings,
        }
    }

    /// `{node}-{participant}-w{index}`
    pub fn id_for(node: &NodeId, participant: &ParticipantName, index: usize) -> ExecutorId {
        ExecutorId::new(format!("{node}-{participant}-w{index}"))
    }

    pub fn id(&self) -> &ExecutorId {
        &self.id
    }

    pub fn participant(&self) -> &ParticipantName {
        &self.participant
    }

    #[tracing::instrument(skip(self), fields(executor = %self.id))]
    pub async fn run_once(&self) -> Result<RunOutcome, CoordinationError> {
        let Some(entry) = self.queue.take_next(&self.participant).await? else {
            return Ok(RunOutcome::Idle);
        };
        let task_id = entry.task_id;

        match self.leases.acquire(task_id, &self.id, self.settings.lease).await {
            Ok(AcquireOutcome::Acquired(_)) => {}
            Ok(other) => {
                tracing::debug!(task_id = %task_id, outcome = ?other, "skipping task");
                self.return_if_waiting(entry).await;
                return Ok(RunOutcome::Skipped(task_id));
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "lease acquisition failed");
                self.return_if_waiting(entry).await;
                return Err(e);
            }
        }

        let payload = self.broker.get(task_id).await?.payload();

        match self.execute(task_id, &payload).await {
            Execution::Done(result) => {
                let report = match result {
                    Ok(()) => OutcomeReport::Finished,
                    Err(e) => OutcomeReport::Failed { reason: e.to_string() },
                };
                match self.broker.report_outcome(task_id, &self.id, report).await {
                    Ok(state) => Ok(RunOutcome::Reported { task_id, state }),
                    Err(CoordinationError::LeaseNotHeld { .. }) => {
                        tracing::warn!(task_id = %task_id, "lease lost before the outcome was reported");
                        Ok(RunOutcome::LeaseLost(task_id))
                    }
                    Err(e) => Err(e),
                }
            }
            Execution::Cancelled => {
                tracing::info!(task_id = %task_id, "task cancelled during execution");
                self.leases.release(task_id, &self.id).await?;
                Ok(RunOutcome::Cancelled(task_id))
            }
            Execution::LeaseLost => {
                tracing::warn!(task_id = %task_id, "lease lost; abandoning work");
                Ok(RunOutcome::LeaseLost(task_id))
            }
        }
    }

    /// Put a taken entry back while its task still waits. Without a job card
    /// the watchdog never sees the task, so the queue is its only way back.
    async fn return_if_waiting(&self, entry: ParticipantTaskQueueEntry) {
        let task_id = entry.task_id;
        match self.broker.state(task_id).await {
            Ok(OutcomeState::Waiting) => {
                if let Err(e) = self.queue.add(entry).await {
                    tracing::error!(task_id = %task_id, error = %e, "could not return task to the queue");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(task_id = %task_id, error = %e, "could not read task state after a failed acquisition"),
        }
    }

    /// Run the pipeline, heartbeating until it finishes or must be abandoned.
    async fn execute(&self, task_id: TaskId, payload: &TaskPayload) -> Execution {
        let work = self.pipeline.process(&self.participant, payload);
        tokio::pin!(work);

        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.settings.renew_interval,
            self.settings.renew_interval,
        );
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut work => return Execution::Done(result),
                _ = heartbeat.tick() => {
                    if let Some(stop) = self.heartbeat(task_id).await {
                        return stop;
                    }
                }
            }
        }
    }

    async fn heartbeat(&self, task_id: TaskId) -> Option<Execution> {
        match self.broker.state(task_id).await {
            Ok(OutcomeState::Cancelled) => return Some(Execution::Cancelled),
            Ok(_) => {}
            Err(e) => tracing::warn!(task_id = %task_id, error = %e, "heartbeat could not read task state"),
        }

        match self.leases.renew_for(task_id, &self.id, self.settings.lease).await {
            Ok(RenewOutcome::Renewed(_)) => None,
            Ok(RenewOutcome::NotHeldByCaller) => Some(Execution::LeaseLost),
            Err(e) => {
                // 次の tick でもう一度試す。失敗が続けば watchdog が回収する
                tracing::warn!(task_id = %task_id, error = %e, "lease renewal failed");
                None
            }
        }
    }
}

/// Worker group handle.
/// - `shutdown_tx` を送ると全ループが止まる（実行中の pipeline は最後まで走る）
/// - `attach()` で watchdog や flusher も同じ shutdown に乗せられる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn one loop per executor.
    pub fn spawn(executors: Vec<Arc<Executor>>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let mut group = Self {
            shutdown_tx,
            joins: Vec::with_capacity(executors.len()),
        };
        for executor in executors {
            group.attach(move |rx| worker_loop(executor, rx));
        }
        group
    }

    /// Spawn another background loop tied to this group's shutdown signal.
    pub fn attach<F, Fut>(&mut self, start: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rx = self.shutdown_tx.subscribe();
        self.joins.push(tokio::spawn(start(rx)));
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new work. In-flight pipeline calls are not cancelled.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            if let Err(e) = j.await {
                tracing::error!(error = %e, "background task panicked");
            }
        }
    }
}

async fn worker_loop(executor: Arc<Executor>, mut shutdown: watch::Receiver<bool>) {
    let idle_poll = executor.settings.idle_poll;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let rest = match executor.run_once().await {
            Ok(RunOutcome::Idle) => true,
            Ok(outcome) => {
                tracing::debug!(executor = %executor.id, ?outcome, "executor pass");
                false
            }
            Err(e) => {
                tracing::error!(executor = %executor.id, error = %e, "executor pass failed");
                true
            }
        };

        if rest {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(idle_poll) => {}
            }
        }
    }
    tracing::debug!(executor = %executor.id, "worker stopped");
}
