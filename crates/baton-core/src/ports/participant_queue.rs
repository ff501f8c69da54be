//! ParticipantQueue port - participant ごとの待ちタスク
//!
//! entry の identity は `(participant, task_id)` なので、同じ entry の再追加は
//! no-op です。取り出し順は `dispatch_key()`（古い sequence number が先）。

use async_trait::async_trait;

use crate::domain::{CoordinationError, ParticipantName, ParticipantTaskQueueEntry, TaskId};

#[async_trait]
pub trait ParticipantQueue: Send + Sync {
    /// Returns `false` if the entry was already present.
    async fn add(&self, entry: ParticipantTaskQueueEntry) -> Result<bool, CoordinationError>;

    /// Returns `false` if there was nothing to remove.
    async fn remove(&self, participant: &ParticipantName, task_id: TaskId) -> Result<bool, CoordinationError>;

    /// Remove and return the oldest entry for `participant`.
    async fn take_next(
        &self,
        participant: &ParticipantName,
    ) -> Result<Option<ParticipantTaskQueueEntry>, CoordinationError>;

    /// Snapshot in dispatch order.
    async fn entries(&self, participant: &ParticipantName) -> Result<Vec<ParticipantTaskQueueEntry>, CoordinationError>;

    async fn len(&self, participant: &ParticipantName) -> Result<usize, CoordinationError>;
}
