//! Handover - ノード間でタスクを受け渡す request/response プロトコル
//!
//! # Sender
//! - 1 回の handover につき correlation id は 1 つ。retry でも同じ id を使う
//! - 1 回の試行は `response_timeout` で打ち切る。unreachable も 1 回と数える
//! - correlation id の違う応答は壊れた応答として扱い、もう一度送る
//! - 試行を使い切ったらタスクを FAILED にして surface
//!
//! # Receiver
//! - correlation id ごとに応答を idempotency window の間だけ覚えておく
//! - 重複は pipeline を再実行せず、覚えている応答をそのまま返す
//! - 処理は correlation id ごとに 1 回だけ別 task で走る。呼び出し側が timeout で
//!   待つのをやめても処理は続き、後から来た重複はその結果を待つ
//! - pipeline が受け入れたタスクは UNKNOWN -> FINISHED、拒否したら FAILED
//!
//! 配送は at-least-once です。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::app::broker::TaskBroker;
use crate::app::events::EventGate;
use crate::app::retry::RetryPolicy;
use crate::domain::{
    CorrelationId, CoordinationError, DomainEvent, HandoverPacket, HandoverResponsePacket, NodeId, OutcomeState,
    ParticipantName, TaskPayload, TransitionCause, TransportError,
};
use crate::ports::{Clock, HandoverInbox, HandoverTransport, IdGenerator, ProcessingPipeline, Topology};

/// Sender-side knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct SendPolicy {
    pub response_timeout: Duration,
    pub max_attempts: u32,
    pub backoff: RetryPolicy,
}

/// A response that matched the packet, and how many transmissions it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoverReceipt {
    pub response: HandoverResponsePacket,
    pub attempts: u32,
}

pub struct HandoverSender {
    transport: Arc<dyn HandoverTransport>,
    topology: Arc<dyn Topology>,
    broker: Arc<TaskBroker>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    events: EventGate,
    policy: SendPolicy,
}

impl HandoverSender {
    pub fn new(
        transport: Arc<dyn HandoverTransport>,
        topology: Arc<dyn Topology>,
        broker: Arc<TaskBroker>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        events: EventGate,
        policy: SendPolicy,
    ) -> Self {
        Self {
            transport,
            topology,
            broker,
            ids,
            clock,
            events,
            policy,
        }
    }

    /// Package `payload` for `target` under a fresh correlation id and send it.
    pub async fn hand_over(
        &self,
        payload: &TaskPayload,
        source: ParticipantName,
        target: ParticipantName,
    ) -> Result<HandoverReceipt, CoordinationError> {
        let packet = HandoverPacket::new(self.ids.correlation_id(), source, target, payload, self.clock.now())?;
        self.send(packet).await
    }

    /// Transmit until a matching response arrives or attempts run out.
    #[tracing::instrument(skip_all, fields(correlation_id = %packet.correlation_id, target = %packet.target_participant))]
    pub async fn send(&self, packet: HandoverPacket) -> Result<HandoverReceipt, CoordinationError> {
        let node = self
            .topology
            .node_for(&packet.target_participant)
            .ok_or_else(|| CoordinationError::UnknownParticipant(packet.target_participant.clone()))?;

        let correlation_id = packet.correlation_id;
        let mut last_failure = String::new();

        for attempt in 1..=self.policy.max_attempts {
            self.events.emit(DomainEvent::HandoverSent {
                correlation_id,
                attempt,
            });

            match self.attempt(&node, packet.clone()).await {
                Ok(response) if response.correlation_id == correlation_id => {
                    tracing::debug!(attempt, accepted = response.accepted, "handover answered");
                    self.events.emit(DomainEvent::HandoverDelivered {
                        correlation_id,
                        attempts: attempt,
                        accepted: response.accepted,
                    });
                    return Ok(HandoverReceipt {
                        response,
                        attempts: attempt,
                    });
                }
                Ok(response) => {
                    tracing::warn!(
                        attempt,
                        got = %response.correlation_id,
                        "handover response carried a different correlation id"
                    );
                    last_failure = format!("malformed response (correlation id {})", response.correlation_id);
                }
                Err(e) => {
                    tracing::warn!(attempt, node = %node, error = %e, "handover attempt failed");
                    last_failure = e.to_string();
                }
            }

            if attempt < self.policy.max_attempts {
                let delay = self.policy.backoff.next_delay(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.give_up(&packet, last_failure).await
    }

    async fn attempt(&self, node: &NodeId, packet: HandoverPacket) -> Result<HandoverResponsePacket, TransportError> {
        match tokio::time::timeout(self.policy.response_timeout, self.transport.deliver(node, packet)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.policy.response_timeout)),
        }
    }

    async fn give_up(&self, packet: &HandoverPacket, reason: String) -> Result<HandoverReceipt, CoordinationError> {
        let attempts = self.policy.max_attempts;
        let payload = TaskPayload::decode(&packet.task_payload)?;
        let task_id = payload.task_id();
        let reason = format!(
            "handover {} to {} failed after {attempts} attempts: {reason}",
            packet.correlation_id, packet.target_participant
        );

        match self.broker.fail_task(task_id, TransitionCause::HandoverFailed, reason.clone()).await {
            Ok(()) => {}
            Err(CoordinationError::TaskNotFound(_)) => self.broker.surface(task_id, reason.clone()),
            Err(e) => tracing::error!(task_id = %task_id, error = %e, "could not mark task failed after handover"),
        }

        Err(CoordinationError::HandoverFailed {
            task_id,
            attempts,
            reason,
        })
    }
}

struct WindowEntry {
    response: watch::Receiver<Option<HandoverResponsePacket>>,
    inserted_at: DateTime<Utc>,
}

/// What runs once per correlation id, detached from the caller.
struct Intake {
    broker: Arc<TaskBroker>,
    pipeline: Arc<dyn ProcessingPipeline>,
    clock: Arc<dyn Clock>,
    events: EventGate,
}

pub struct HandoverReceiver {
    intake: Arc<Intake>,
    window: chrono::Duration,
    seen: Mutex<HashMap<CorrelationId, WindowEntry>>,
}

impl HandoverReceiver {
    pub fn new(
        broker: Arc<TaskBroker>,
        pipeline: Arc<dyn ProcessingPipeline>,
        clock: Arc<dyn Clock>,
        events: EventGate,
        window: Duration,
    ) -> Self {
        Self {
            intake: Arc::new(Intake {
                broker,
                pipeline,
                clock,
                events,
            }),
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Correlation ids currently remembered.
    pub fn remembered(&self) -> usize {
        self.seen.lock().len()
    }

    #[tracing::instrument(skip_all, fields(correlation_id = %packet.correlation_id))]
    pub async fn receive(&self, packet: HandoverPacket) -> HandoverResponsePacket {
        let correlation_id = packet.correlation_id;
        let (mut response, duplicate) = self.window_slot(packet);

        if duplicate {
            tracing::debug!("duplicate handover");
            self.intake.events.emit(DomainEvent::HandoverDuplicate { correlation_id });
        }

        let ready = response.wait_for(Option::is_some).await.ok().and_then(|r| (*r).clone());
        match ready {
            Some(response) => response,
            None => {
                tracing::error!("handover processing ended without a response");
                HandoverResponsePacket::reject(
                    correlation_id,
                    "handover processing aborted".to_string(),
                    self.intake.clock.now(),
                )
            }
        }
    }

    /// Response slot for the packet's correlation id, dropping entries older
    /// than the window. A new slot starts processing on its own task, so a
    /// caller that gives up waiting does not abort it.
    fn window_slot(&self, packet: HandoverPacket) -> (watch::Receiver<Option<HandoverResponsePacket>>, bool) {
        let now = self.intake.clock.now();
        let window = self.window;
        let mut seen = self.seen.lock();
        seen.retain(|_, entry| entry.inserted_at.checked_add_signed(window).is_none_or(|until| until > now));

        if let Some(entry) = seen.get(&packet.correlation_id) {
            return (entry.response.clone(), true);
        }

        let (tx, rx) = watch::channel(None);
        seen.insert(
            packet.correlation_id,
            WindowEntry {
                response: rx.clone(),
                inserted_at: now,
            },
        );
        let intake = Arc::clone(&self.intake);
        tokio::spawn(async move {
            let response = intake.process(packet).await;
            tx.send_replace(Some(response));
        });
        (rx, false)
    }
}

impl Intake {
    async fn process(&self, packet: HandoverPacket) -> HandoverResponsePacket {
        let correlation_id = packet.correlation_id;

        let payload = match TaskPayload::decode(&packet.task_payload) {
            Ok(payload) => payload,
            Err(e) => {
                let reason = format!("undecodable task payload: {e}");
                tracing::error!(reason = %reason, "rejecting handover");
                self.events.emit(DomainEvent::HandoverRejected {
                    correlation_id,
                    reason: reason.clone(),
                });
                return HandoverResponsePacket::reject(correlation_id, reason, self.clock.now());
            }
        };
        let task_id = payload.task_id();

        if let Err(e) = self.broker.register_inbound(&payload, packet.target_participant.clone()).await {
            tracing::error!(task_id = %task_id, error = %e, "could not register inbound task");
            return HandoverResponsePacket::reject(correlation_id, e.to_string(), self.clock.now());
        }
        self.events.emit(DomainEvent::HandoverReceived {
            correlation_id,
            task_id,
        });

        match self.pipeline.process(&packet.target_participant, &payload).await {
            Ok(()) => {
                if let Err(e) = self.broker.complete_inbound(task_id).await {
                    tracing::warn!(task_id = %task_id, error = %e, "could not finish accepted inbound task");
                }
                HandoverResponsePacket::accept(correlation_id, self.clock.now())
            }
            Err(e) => {
                let reason = e.to_string();
                let fail = self.broker.fail_task(task_id, TransitionCause::ExecutorFailed, reason.clone()).await;
                if let Err(err) = fail
                    && !matches!(err, CoordinationError::InvalidTransition { from: OutcomeState::Failed, .. })
                {
                    tracing::warn!(task_id = %task_id, error = %err, "could not fail rejected inbound task");
                }
                HandoverResponsePacket::reject(correlation_id, reason, self.clock.now())
            }
        }
    }
}

#[async_trait]
impl HandoverInbox for HandoverReceiver {
    async fn receive(&self, packet: HandoverPacket) -> HandoverResponsePacket {
        HandoverReceiver::receive(self, packet).await
    }
}
