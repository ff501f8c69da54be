//! HandoverTransport port - ノード間の point-to-point 配送
//!
//! 実装は 1 回の request/response だけを担当します。timeout・retry・
//! correlation id の検証は `app::handover::HandoverSender` が行います。

use async_trait::async_trait;

use crate::domain::{HandoverPacket, HandoverResponsePacket, NodeId, TransportError};

#[async_trait]
pub trait HandoverTransport: Send + Sync {
    /// Send one packet to `node` and wait for its response.
    ///
    /// May never return if the response is lost; callers bound it with a timeout.
    async fn deliver(&self, node: &NodeId, packet: HandoverPacket) -> Result<HandoverResponsePacket, TransportError>;
}

/// Receiving end of a transport: whatever answers packets on a node.
#[async_trait]
pub trait HandoverInbox: Send + Sync {
    async fn receive(&self, packet: HandoverPacket) -> HandoverResponsePacket;
}
