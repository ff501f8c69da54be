//! Handover packets exchanged between nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CorrelationId, ParticipantName};
use super::task::TaskPayload;

/// Request half of a handover. `task_payload` is an encoded [`TaskPayload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoverPacket {
    pub correlation_id: CorrelationId,
    pub source_participant: ParticipantName,
    pub target_participant: ParticipantName,
    pub task_payload: Vec<u8>,
    pub sent_at: DateTime<Utc>,
}

impl HandoverPacket {
    pub fn new(
        correlation_id: CorrelationId,
        source_participant: ParticipantName,
        target_participant: ParticipantName,
        payload: &TaskPayload,
        sent_at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            correlation_id,
            source_participant,
            target_participant,
            task_payload: payload.encode()?,
            sent_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoverResponsePacket {
    pub correlation_id: CorrelationId,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_if_rejected: Option<String>,
    pub responded_at: DateTime<Utc>,
}

impl HandoverResponsePacket {
    pub fn accept(correlation_id: CorrelationId, at: DateTime<Utc>) -> Self {
        Self {
            correlation_id,
            accepted: true,
            reason_if_rejected: None,
            responded_at: at,
        }
    }

    pub fn reject(correlation_id: CorrelationId, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            correlation_id,
            accepted: false,
            reason_if_rejected: Some(reason.into()),
            responded_at: at,
        }
    }
}
