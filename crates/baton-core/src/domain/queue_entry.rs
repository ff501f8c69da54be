//! Participant task queue entries.

use serde::{Deserialize, Serialize};

use super::ids::{ParticipantName, TaskId};
use super::sequence::TaskSequenceNumber;

/// Enough to re-dispatch a task to a participant.
///
/// Identity is `(participant, task_id)`; the sequence number only orders
/// dispatch, through [`dispatch_key`](Self::dispatch_key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantTaskQueueEntry {
    pub participant: ParticipantName,
    pub task_id: TaskId,
    pub sequence_number: TaskSequenceNumber,
}

impl ParticipantTaskQueueEntry {
    pub fn new(participant: ParticipantName, task_id: TaskId, sequence_number: TaskSequenceNumber) -> Self {
        Self {
            participant,
            task_id,
            sequence_number,
        }
    }

    /// Dispatch key: oldest sequence first, task id breaks ties.
    pub fn dispatch_key(&self) -> (TaskSequenceNumber, TaskId) {
        (self.sequence_number, self.task_id)
    }
}

impl PartialEq for ParticipantTaskQueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.participant == other.participant && self.task_id == other.task_id
    }
}

impl Eq for ParticipantTaskQueueEntry {}

impl std::hash::Hash for ParticipantTaskQueueEntry {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.participant.hash(state);
        self.task_id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn identity_ignores_sequence_number() {
        let task_id = TaskId::from_ulid(Ulid::new());
        let a = ParticipantTaskQueueEntry::new("P-alpha".into(), task_id, TaskSequenceNumber::new(100, 1));
        let b = ParticipantTaskQueueEntry::new("P-alpha".into(), task_id, TaskSequenceNumber::new(200, 0));
        assert_eq!(a, b);
    }

    #[test]
    fn older_sequence_sorts_first() {
        let older = ParticipantTaskQueueEntry::new(
            "P-alpha".into(),
            TaskId::from_ulid(Ulid::new()),
            TaskSequenceNumber::new(100, 1),
        );
        let newer = ParticipantTaskQueueEntry::new(
            "P-alpha".into(),
            TaskId::from_ulid(Ulid::nil()),
            TaskSequenceNumber::new(100, 2),
        );
        assert!(older.dispatch_key() < newer.dispatch_key());
    }
}
