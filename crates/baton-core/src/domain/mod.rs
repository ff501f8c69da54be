//! Domain model (IDs, sequence numbers, task records, leases, handover packets, ...).
//!
//! ここにあるのは純粋なデータと状態遷移だけで、I/O や時刻取得は ports 経由です。

pub mod errors;
pub mod events;
pub mod handover;
pub mod ids;
pub mod job_card;
pub mod manifest;
pub mod oversight;
pub mod queue_entry;
pub mod record;
pub mod sequence;
pub mod state;
pub mod task;

pub use errors::{CoordinationError, ErrorKind, TransportError};
pub use events::{AuditGranularity, DomainEvent};
pub use handover::{HandoverPacket, HandoverResponsePacket};
pub use ids::{CorrelationId, ExecutorId, Id, IdMarker, NodeId, ParticipantName, TaskId};
pub use job_card::{AcquireOutcome, JobCard, ReleaseOutcome, RenewOutcome};
pub use manifest::{Direction, Manifest};
pub use oversight::TaskOversight;
pub use queue_entry::ParticipantTaskQueueEntry;
pub use record::TaskRecord;
pub use sequence::TaskSequenceNumber;
pub use state::{
    can_transition, OutcomeState, RejectedTransition, StorageState, TaskOutcomeStatus, TaskStorageStatus,
    TransitionCause,
};
pub use task::{ReasonType, TaskIdentity, TaskPayload};
