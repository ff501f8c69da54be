//! Events - audit / metrics sink に流すドメインイベント
//!
//! 各イベントは最低限必要な granularity を持ち、設定された granularity 以下の
//! イベントだけが sink に届きます（coarse が一番少ない）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CorrelationId, ExecutorId, ParticipantName, TaskId};
use super::sequence::TaskSequenceNumber;
use super::state::{OutcomeState, TransitionCause};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditGranularity {
    Coarse,
    #[default]
    Standard,
    Detailed,
    Extreme,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    TaskCreated {
        task_id: TaskId,
        participant: ParticipantName,
        sequence_number: TaskSequenceNumber,
    },
    Transitioned {
        task_id: TaskId,
        from: OutcomeState,
        to: OutcomeState,
        cause: TransitionCause,
        at: DateTime<Utc>,
    },
    LeaseAcquired {
        task_id: TaskId,
        holder_id: ExecutorId,
        lease_expiry: DateTime<Utc>,
    },
    LeaseRenewed {
        task_id: TaskId,
        holder_id: ExecutorId,
        lease_expiry: DateTime<Utc>,
    },
    LeaseReleased {
        task_id: TaskId,
        holder_id: ExecutorId,
    },
    LeaseReclaimed {
        task_id: TaskId,
        holder_id: ExecutorId,
        retry_count: u32,
    },
    /// Needs operator attention: the task will not be retried.
    TaskSurfaced {
        task_id: TaskId,
        reason: String,
    },
    HandoverSent {
        correlation_id: CorrelationId,
        attempt: u32,
    },
    HandoverReceived {
        correlation_id: CorrelationId,
        task_id: TaskId,
    },
    HandoverDelivered {
        correlation_id: CorrelationId,
        attempts: u32,
        accepted: bool,
    },
    HandoverDuplicate {
        correlation_id: CorrelationId,
    },
    /// A packet the receiver could not even decode.
    HandoverRejected {
        correlation_id: CorrelationId,
        reason: String,
    },
    SnapshotSaved {
        task_id: TaskId,
        version: u64,
    },
}

impl DomainEvent {
    /// Coarsest granularity at which this event is still reported.
    pub fn granularity(&self) -> AuditGranularity {
        match self {
            Self::LeaseReclaimed { .. } | Self::TaskSurfaced { .. } | Self::HandoverRejected { .. } => {
                AuditGranularity::Coarse
            }
            Self::Transitioned { .. } | Self::HandoverDelivered { .. } | Self::HandoverDuplicate { .. } => {
                AuditGranularity::Standard
            }
            Self::TaskCreated { .. }
            | Self::LeaseAcquired { .. }
            | Self::LeaseReleased { .. }
            | Self::HandoverSent { .. }
            | Self::HandoverReceived { .. } => AuditGranularity::Detailed,
            Self::LeaseRenewed { .. } | Self::SnapshotSaved { .. } => AuditGranularity::Extreme,
        }
    }

    pub fn is_reported_at(&self, level: AuditGranularity) -> bool {
        self.granularity() <= level
    }
}
