//! CoordinatorBuilder - ports とサービスのワイヤリング
//!
//! # 学習ポイント
//! - Builder パターン（未指定の port は in-memory 実装で埋める）
//! - 起動時検証（Fail-fast 設計）
//!
//! # 使用例
//! ```ignore
//! let coordinator = CoordinatorBuilder::new(BatonConfig::load(None)?)
//!     .register("P-alpha", Arc::new(MyHandler))?
//!     .expect_participants(&["P-alpha"])
//!     .build()?;
//! let workers = coordinator.spawn_background();
//! ```

use std::sync::Arc;

use crate::app::broker::{OutcomeReport, TaskBroker};
use crate::app::events::EventGate;
use crate::app::handover::{HandoverReceipt, HandoverReceiver, HandoverSender, SendPolicy};
use crate::app::lease_manager::LeaseManager;
use crate::app::persister_loop::{FlushReport, SnapshotFlusher};
use crate::app::sequencer::SequenceGenerator;
use crate::app::status::TaskCounts;
use crate::app::watchdog_loop::{ScanReport, WatchdogLoop};
use crate::app::worker_loop::{Executor, ExecutorSettings, WorkerGroup};
use crate::config::BatonConfig;
use crate::domain::{
    AcquireOutcome, CoordinationError, ExecutorId, HandoverPacket, HandoverResponsePacket, Manifest, NodeId,
    OutcomeState, ParticipantName, ReasonType, ReleaseOutcome, RenewOutcome, TaskId, TaskRecord,
};
use crate::impls::{
    DuplicateHandler, HandlerPipeline, HandlerRegistry, InMemoryLeaseStore, InMemoryParticipantQueue,
    InMemorySnapshotStore, InMemoryTaskStore, LoopbackTransport, RuleManifestMatcher, StaticTopology, TaskHandler,
    TracingEventSink,
};
use crate::ports::{
    Clock, EventSink, HandoverTransport, IdGenerator, LeaseStore, ManifestMatcher, ParticipantQueue,
    ProcessingPipeline, SnapshotStore, SystemClock, TaskStore, Topology, UlidGenerator,
};

/// BuildError は Coordinator 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing handlers: {0:?}. These participants were expected but not registered.")]
    MissingHandlers(Vec<ParticipantName>),

    #[error(transparent)]
    DuplicateHandler(#[from] DuplicateHandler),

    #[error("invalid configuration: {0}")]
    Config(#[from] CoordinationError),
}

/// CoordinatorBuilder は Coordinator を構築
///
/// # Fail-fast 設計
/// - expect_participants() で処理すべき participant を宣言
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 設定値も build() で検証
pub struct CoordinatorBuilder {
    config: BatonConfig,
    registry: HandlerRegistry,
    expected: Option<Vec<ParticipantName>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    tasks: Option<Arc<dyn TaskStore>>,
    queue: Option<Arc<dyn ParticipantQueue>>,
    leases: Option<Arc<dyn LeaseStore>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    transport: Option<Arc<dyn HandoverTransport>>,
    topology: Option<Arc<dyn Topology>>,
    matcher: Option<Arc<dyn ManifestMatcher>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl CoordinatorBuilder {
    pub fn new(config: BatonConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            expected: None,
            clock: None,
            ids: None,
            tasks: None,
            queue: None,
            leases: None,
            snapshots: None,
            transport: None,
            topology: None,
            matcher: None,
            sink: None,
        }
    }

    /// Handler を登録
    pub fn register(
        mut self,
        participant: impl Into<ParticipantName>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, BuildError> {
        self.registry.register(participant, handler)?;
        Ok(self)
    }

    /// 期待される participant のリストを設定
    pub fn expect_participants(mut self, participants: &[&str]) -> Self {
        self.expected = Some(participants.iter().map(|&p| ParticipantName::new(p)).collect());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn task_store(mut self, tasks: Arc<dyn TaskStore>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn participant_queue(mut self, queue: Arc<dyn ParticipantQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn lease_store(mut self, leases: Arc<dyn LeaseStore>) -> Self {
        self.leases = Some(leases);
        self
    }

    pub fn snapshot_store(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HandoverTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn topology(mut self, topology: Arc<dyn Topology>) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn manifest_matcher(mut self, matcher: Arc<dyn ManifestMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Coordinator, BuildError> {
        self.config.validate()?;

        let served = self.registry.participants();
        if let Some(expected) = &self.expected {
            let missing: Vec<ParticipantName> = expected.iter().filter(|p| !served.contains(p)).cloned().collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingHandlers(missing));
            }
        }

        let config = self.config;
        let node = config.node_id();

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let tasks = self.tasks.unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let queue = self.queue.unwrap_or_else(|| Arc::new(InMemoryParticipantQueue::new()));
        let leases = self.leases.unwrap_or_else(|| Arc::new(InMemoryLeaseStore::new()));
        let snapshots = self.snapshots.unwrap_or_else(|| Arc::new(InMemorySnapshotStore::new()));
        let transport = self.transport.unwrap_or_else(|| Arc::new(LoopbackTransport::new()));
        let topology = self.topology.unwrap_or_else(|| {
            let local = served
                .iter()
                .fold(StaticTopology::new(node.clone()), |t, p| t.with_participant(p.clone(), node.clone()));
            Arc::new(local)
        });
        let matcher = self.matcher.unwrap_or_else(|| Arc::new(RuleManifestMatcher::new()));
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingEventSink));
        let events = EventGate::new(sink, config.audit.granularity);
        let pipeline: Arc<dyn ProcessingPipeline> = Arc::new(HandlerPipeline::new(Arc::new(self.registry)));

        let sequencer = Arc::new(SequenceGenerator::new(Arc::clone(&clock)));
        let broker = Arc::new(TaskBroker::new(
            Arc::clone(&tasks),
            Arc::clone(&queue),
            Arc::clone(&leases),
            sequencer,
            Arc::clone(&ids),
            Arc::clone(&clock),
            events.clone(),
        ));
        let lease_manager = Arc::new(LeaseManager::new(
            Arc::clone(&leases),
            Arc::clone(&tasks),
            Arc::clone(&queue),
            Arc::clone(&clock),
            events.clone(),
        ));
        let watchdog = Arc::new(WatchdogLoop::new(
            Arc::clone(&leases),
            Arc::clone(&tasks),
            Arc::clone(&queue),
            Arc::clone(&broker),
            Arc::clone(&clock),
            events.clone(),
            config.watchdog.max_retries,
            config.watchdog.scan_interval(),
        ));
        let flusher = Arc::new(SnapshotFlusher::new(
            Arc::clone(&tasks),
            snapshots,
            Arc::clone(&clock),
            events.clone(),
            config.workers.flush_interval(),
        ));
        let sender = Arc::new(HandoverSender::new(
            transport,
            Arc::clone(&topology),
            Arc::clone(&broker),
            ids,
            Arc::clone(&clock),
            events.clone(),
            SendPolicy {
                response_timeout: config.handover.response_timeout(),
                max_attempts: config.handover.max_attempts,
                backoff: config.handover.retry_policy(),
            },
        ));
        let receiver = Arc::new(HandoverReceiver::new(
            Arc::clone(&broker),
            Arc::clone(&pipeline),
            clock,
            events,
            config.handover.idempotency_window(),
        ));

        tracing::info!(node = %node, participants = ?served, "coordinator built");
        Ok(Coordinator {
            config,
            node,
            served,
            tasks,
            queue,
            topology,
            matcher,
            pipeline,
            broker,
            lease_manager,
            watchdog,
            flusher,
            sender,
            receiver,
        })
    }
}

/// What `submit` did for one matched participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Local participant; the task is WAITING on its queue.
    Enqueued { participant: ParticipantName, task_id: TaskId },
    /// Remote participant answered the handover.
    HandedOver {
        participant: ParticipantName,
        task_id: TaskId,
        node: NodeId,
        accepted: bool,
        attempts: u32,
    },
    /// Handover gave up; the routing task is FAILED.
    HandoverFailed {
        participant: ParticipantName,
        task_id: TaskId,
        reason: String,
    },
    /// No node hosts the participant.
    Unroutable { participant: ParticipantName },
}

/// One node's coordination services behind a single handle.
pub struct Coordinator {
    config: BatonConfig,
    node: NodeId,
    served: Vec<ParticipantName>,
    tasks: Arc<dyn TaskStore>,
    queue: Arc<dyn ParticipantQueue>,
    topology: Arc<dyn Topology>,
    matcher: Arc<dyn ManifestMatcher>,
    pipeline: Arc<dyn ProcessingPipeline>,
    broker: Arc<TaskBroker>,
    lease_manager: Arc<LeaseManager>,
    watchdog: Arc<WatchdogLoop>,
    flusher: Arc<SnapshotFlusher>,
    sender: Arc<HandoverSender>,
    receiver: Arc<HandoverReceiver>,
}

impl Coordinator {
    pub fn node_id(&self) -> &NodeId {
        &self.node
    }

    pub fn config(&self) -> &BatonConfig {
        &self.config
    }

    /// Participants this node runs executors for.
    pub fn served_participants(&self) -> &[ParticipantName] {
        &self.served
    }

    /// Inbox to register with a transport so other nodes can reach this one.
    pub fn inbox(&self) -> Arc<HandoverReceiver> {
        Arc::clone(&self.receiver)
    }

    pub async fn create_task(
        &self,
        participant: ParticipantName,
        reason: ReasonType,
        body: serde_json::Value,
        resilient_activity: bool,
    ) -> Result<TaskRecord, CoordinationError> {
        self.broker.create_task(participant, reason, body, resilient_activity).await
    }

    pub async fn get(&self, task_id: TaskId) -> Result<TaskRecord, CoordinationError> {
        self.broker.get(task_id).await
    }

    pub async fn enqueue(&self, task_id: TaskId, participant: &ParticipantName) -> Result<bool, CoordinationError> {
        self.broker.enqueue(task_id, participant).await
    }

    /// Acquire with the configured lease duration.
    pub async fn acquire_lease(&self, task_id: TaskId, holder: &ExecutorId) -> Result<AcquireOutcome, CoordinationError> {
        self.lease_manager.acquire(task_id, holder, self.config.lease.duration()).await
    }

    /// Extend by the configured lease duration from now.
    pub async fn renew(&self, task_id: TaskId, holder: &ExecutorId) -> Result<RenewOutcome, CoordinationError> {
        self.lease_manager.renew_for(task_id, holder, self.config.lease.duration()).await
    }

    pub async fn release(&self, task_id: TaskId, holder: &ExecutorId) -> Result<ReleaseOutcome, CoordinationError> {
        self.lease_manager.release(task_id, holder).await
    }

    pub async fn report_outcome(
        &self,
        task_id: TaskId,
        holder: &ExecutorId,
        report: OutcomeReport,
    ) -> Result<OutcomeState, CoordinationError> {
        self.broker.report_outcome(task_id, holder, report).await
    }

    pub async fn cancel(&self, task_id: TaskId) -> Result<OutcomeState, CoordinationError> {
        self.broker.cancel(task_id).await
    }

    pub async fn send_handover(&self, packet: HandoverPacket) -> Result<HandoverReceipt, CoordinationError> {
        self.sender.send(packet).await
    }

    pub async fn receive_handover(&self, packet: HandoverPacket) -> HandoverResponsePacket {
        self.receiver.receive(packet).await
    }

    pub async fn status(&self) -> Result<TaskCounts, CoordinationError> {
        TaskCounts::collect(self.tasks.as_ref()).await
    }

    /// One watchdog pass, outside the background schedule.
    pub async fn scan_once(&self) -> Result<ScanReport, CoordinationError> {
        self.watchdog.scan_once().await
    }

    /// One flusher pass, outside the background schedule.
    pub async fn flush_once(&self) -> Result<FlushReport, CoordinationError> {
        self.flusher.flush_once().await
    }

    /// `workers.per_participant` executors for every served participant.
    pub fn executors(&self) -> Vec<Arc<Executor>> {
        let settings = ExecutorSettings {
            lease: self.config.lease.duration(),
            renew_interval: self.config.lease.renew_interval(),
            idle_poll: self.config.workers.idle_poll(),
        };
        self.served
            .iter()
            .flat_map(|participant| {
                (0..self.config.workers.per_participant).map(move |i| (participant, i))
            })
            .map(|(participant, i)| {
                Arc::new(Executor::new(
                    Executor::id_for(&self.node, participant, i),
                    participant.clone(),
                    Arc::clone(&self.queue),
                    Arc::clone(&self.lease_manager),
                    Arc::clone(&self.broker),
                    Arc::clone(&self.pipeline),
                    settings.clone(),
                ))
            })
            .collect()
    }

    /// Start executors, the watchdog and the snapshot flusher under one shutdown signal.
    pub fn spawn_background(&self) -> WorkerGroup {
        let mut group = WorkerGroup::spawn(self.executors());
        let watchdog = Arc::clone(&self.watchdog);
        group.attach(move |rx| watchdog.run(rx));
        let flusher = Arc::clone(&self.flusher);
        group.attach(move |rx| flusher.run(rx));
        tracing::info!(node = %self.node, loops = group.len(), "background loops started");
        group
    }

    /// Distribute `body` to every participant the manifest matches.
    ///
    /// Local participants get a WAITING task on their queue. Remote ones get a
    /// routing task that is leased for the duration of the handover and
    /// finished or failed by the answer.
    #[tracing::instrument(skip(self, body), fields(direction = ?manifest.direction, content_type = %manifest.content_type))]
    pub async fn submit(
        &self,
        manifest: &Manifest,
        body: serde_json::Value,
    ) -> Result<Vec<SubmitOutcome>, CoordinationError> {
        let participants = self.matcher.participants_for(manifest);
        if participants.is_empty() {
            tracing::warn!("manifest matched no participants");
        }

        let mut outcomes = Vec::with_capacity(participants.len());
        for participant in participants {
            let outcome = match self.topology.node_for(&participant) {
                None => {
                    tracing::warn!(participant = %participant, "no node hosts participant");
                    SubmitOutcome::Unroutable { participant }
                }
                Some(node) if node == self.node => self.submit_local(participant, body.clone()).await?,
                Some(node) => self.submit_remote(participant, node, body.clone()).await?,
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn submit_local(
        &self,
        participant: ParticipantName,
        body: serde_json::Value,
    ) -> Result<SubmitOutcome, CoordinationError> {
        let record = self
            .broker
            .create_task(participant.clone(), ReasonType::MessageProcessing, body, true)
            .await?;
        let task_id = record.task_id();
        self.broker.enqueue(task_id, &participant).await?;
        Ok(SubmitOutcome::Enqueued { participant, task_id })
    }

    async fn submit_remote(
        &self,
        participant: ParticipantName,
        node: NodeId,
        body: serde_json::Value,
    ) -> Result<SubmitOutcome, CoordinationError> {
        let record = self
            .broker
            .create_task(participant.clone(), ReasonType::TaskRouting, body, false)
            .await?;
        let task_id = record.task_id();
        self.broker.enqueue(task_id, &participant).await?;

        // 送信が終わるまで watchdog に回収されない長さを取る
        let holder = ExecutorId::new(format!("handover:{node}"));
        let lease = self.config.lease.duration().max(self.config.handover.worst_case_send());
        let acquired = self.lease_manager.acquire(task_id, &holder, lease).await?;
        if !acquired.is_acquired() {
            tracing::warn!(task_id = %task_id, outcome = ?acquired, "routing task was taken before handover");
            return Err(CoordinationError::LeaseNotHeld { task_id, holder });
        }

        let source = ParticipantName::new(self.node.as_str());
        match self.sender.hand_over(&record.payload(), source, participant.clone()).await {
            Ok(receipt) => {
                let report = if receipt.response.accepted {
                    OutcomeReport::Finished
                } else {
                    let reason = receipt.response.reason_if_rejected.as_deref().unwrap_or("no reason given");
                    OutcomeReport::Failed {
                        reason: format!("rejected by {node}: {reason}"),
                    }
                };
                self.broker.report_outcome(task_id, &holder, report).await?;
                Ok(SubmitOutcome::HandedOver {
                    participant,
                    task_id,
                    node,
                    accepted: receipt.response.accepted,
                    attempts: receipt.attempts,
                })
            }
            Err(CoordinationError::HandoverFailed { reason, .. }) => {
                self.lease_manager.release(task_id, &holder).await?;
                Ok(SubmitOutcome::HandoverFailed {
                    participant,
                    task_id,
                    reason,
                })
            }
            Err(e) => {
                self.lease_manager.release(task_id, &holder).await?;
                Err(e)
            }
        }
    }
}
