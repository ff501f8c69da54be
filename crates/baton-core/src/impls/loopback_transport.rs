//! LoopbackTransport - 同一プロセス内のノード間 transport
//!
//! ノードごとに `HandoverInbox` を登録しておき、`deliver` はそれを別 task で呼びます。
//! テスト用に障害を注入できます：
//! - `drop_next_responses`: 受信側は処理するが、応答が送信側に届かない
//! - `set_unreachable`: そもそも届かない

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::domain::{HandoverPacket, HandoverResponsePacket, NodeId, TransportError};
use crate::ports::{HandoverInbox, HandoverTransport};

#[derive(Default)]
struct Faults {
    drop_responses: HashMap<NodeId, u32>,
    unreachable: HashSet<NodeId>,
}

#[derive(Default)]
pub struct LoopbackTransport {
    inboxes: Mutex<HashMap<NodeId, Arc<dyn HandoverInbox>>>,
    faults: Mutex<Faults>,
    deliveries: Mutex<HashMap<NodeId, u32>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: NodeId, inbox: Arc<dyn HandoverInbox>) {
        self.inboxes.lock().insert(node, inbox);
    }

    /// The next `n` responses from `node` are lost after the packet was processed.
    pub fn drop_next_responses(&self, node: &NodeId, n: u32) {
        self.faults.lock().drop_responses.insert(node.clone(), n);
    }

    pub fn set_unreachable(&self, node: &NodeId, unreachable: bool) {
        let mut faults = self.faults.lock();
        if unreachable {
            faults.unreachable.insert(node.clone());
        } else {
            faults.unreachable.remove(node);
        }
    }

    /// Transmit attempts towards `node`, including lost and refused ones.
    pub fn delivery_count(&self, node: &NodeId) -> u32 {
        self.deliveries.lock().get(node).copied().unwrap_or(0)
    }

    fn take_drop(&self, node: &NodeId) -> bool {
        let mut faults = self.faults.lock();
        match faults.drop_responses.get_mut(node) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl HandoverTransport for LoopbackTransport {
    async fn deliver(&self, node: &NodeId, packet: HandoverPacket) -> Result<HandoverResponsePacket, TransportError> {
        *self.deliveries.lock().entry(node.clone()).or_insert(0) += 1;

        if self.faults.lock().unreachable.contains(node) {
            return Err(TransportError::Unreachable(node.clone()));
        }
        let inbox = self
            .inboxes
            .lock()
            .get(node)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(node.clone()))?;

        // 受信側は別ノードのつもりで別 task に載せる。送信側が timeout で諦めても処理は続く
        let response = tokio::spawn(async move { inbox.receive(packet).await })
            .await
            .map_err(|e| TransportError::Closed(format!("inbox task ended: {e}")))?;

        if self.take_drop(node) {
            tracing::debug!(node = %node, correlation_id = %response.correlation_id, "dropping handover response");
            // 応答は失われた。送信側の timeout に任せる
            std::future::pending::<()>().await;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CorrelationId, ParticipantName};
    use chrono::Utc;
    use std::time::Duration;
    use ulid::Ulid;

    struct AcceptAll;

    #[async_trait]
    impl HandoverInbox for AcceptAll {
        async fn receive(&self, packet: HandoverPacket) -> HandoverResponsePacket {
            HandoverResponsePacket::accept(packet.correlation_id, Utc::now())
        }
    }

    fn packet() -> HandoverPacket {
        HandoverPacket {
            correlation_id: CorrelationId::from_ulid(Ulid::new()),
            source_participant: ParticipantName::new("P-alpha"),
            target_participant: ParticipantName::new("P-beta"),
            task_payload: Vec::new(),
            sent_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unknown_node_is_unreachable() {
        let transport = LoopbackTransport::new();
        let err = transport.deliver(&NodeId::new("node-x"), packet()).await.unwrap_err();
        assert_eq!(err, TransportError::Unreachable(NodeId::new("node-x")));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_response_never_arrives() {
        let transport = LoopbackTransport::new();
        let node = NodeId::new("node-b");
        transport.register(node.clone(), Arc::new(AcceptAll));
        transport.drop_next_responses(&node, 1);

        let lost = tokio::time::timeout(Duration::from_secs(5), transport.deliver(&node, packet())).await;
        assert!(lost.is_err());

        let response = transport.deliver(&node, packet()).await.unwrap();
        assert!(response.accepted);
        assert_eq!(transport.delivery_count(&node), 2);
    }

    #[tokio::test]
    async fn unreachable_can_be_toggled() {
        let transport = LoopbackTransport::new();
        let node = NodeId::new("node-b");
        transport.register(node.clone(), Arc::new(AcceptAll));

        transport.set_unreachable(&node, true);
        assert!(transport.deliver(&node, packet()).await.is_err());

        transport.set_unreachable(&node, false);
        assert!(transport.deliver(&node, packet()).await.is_ok());
    }
}
