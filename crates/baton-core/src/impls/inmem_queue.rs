//! InMemoryParticipantQueue - 開発用の participant キュー
//!
//! # 実装詳細
//! - participant ごとに `BTreeMap<(sequence, task_id), entry>` で順序を保持
//! - `(participant, task_id)` の HashMap で重複を検出（sequence が違っても同一 entry）

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use crate::domain::{CoordinationError, ParticipantName, ParticipantTaskQueueEntry, TaskId, TaskSequenceNumber};
use crate::ports::ParticipantQueue;

type DispatchKey = (TaskSequenceNumber, TaskId);

#[derive(Debug, Default)]
struct Lane {
    ordered: BTreeMap<DispatchKey, ParticipantTaskQueueEntry>,
    index: HashMap<TaskId, DispatchKey>,
}

#[derive(Debug, Default)]
pub struct InMemoryParticipantQueue {
    lanes: Mutex<HashMap<ParticipantName, Lane>>,
}

impl InMemoryParticipantQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ParticipantQueue for InMemoryParticipantQueue {
    async fn add(&self, entry: ParticipantTaskQueueEntry) -> Result<bool, CoordinationError> {
        let mut lanes = self.lanes.lock();
        let lane = lanes.entry(entry.participant.clone()).or_default();
        if lane.index.contains_key(&entry.task_id) {
            return Ok(false);
        }
        let key = entry.dispatch_key();
        lane.index.insert(entry.task_id, key);
        lane.ordered.insert(key, entry);
        Ok(true)
    }

    async fn remove(&self, participant: &ParticipantName, task_id: TaskId) -> Result<bool, CoordinationError> {
        let mut lanes = self.lanes.lock();
        let Some(lane) = lanes.get_mut(participant) else {
            return Ok(false);
        };
        match lane.index.remove(&task_id) {
            Some(key) => {
                lane.ordered.remove(&key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn take_next(
        &self,
        participant: &ParticipantName,
    ) -> Result<Option<ParticipantTaskQueueEntry>, CoordinationError> {
        let mut lanes = self.lanes.lock();
        let Some(lane) = lanes.get_mut(participant) else {
            return Ok(None);
        };
        let next = lane.ordered.pop_first().map(|(_, entry)| entry);
        if let Some(entry) = &next {
            lane.index.remove(&entry.task_id);
        }
        Ok(next)
    }

    async fn entries(&self, participant: &ParticipantName) -> Result<Vec<ParticipantTaskQueueEntry>, CoordinationError> {
        let lanes = self.lanes.lock();
        Ok(lanes
            .get(participant)
            .map(|lane| lane.ordered.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn len(&self, participant: &ParticipantName) -> Result<usize, CoordinationError> {
        Ok(self.lanes.lock().get(participant).map_or(0, |lane| lane.ordered.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn entry(participant: &str, task_id: TaskId, minor: u32) -> ParticipantTaskQueueEntry {
        ParticipantTaskQueueEntry::new(participant.into(), task_id, TaskSequenceNumber::new(100, minor))
    }

    #[tokio::test]
    async fn re_adding_is_a_no_op() {
        let queue = InMemoryParticipantQueue::new();
        let task_id = TaskId::from_ulid(Ulid::new());

        assert!(queue.add(entry("P-alpha", task_id, 1)).await.unwrap());
        assert!(!queue.add(entry("P-alpha", task_id, 1)).await.unwrap());
        // 同じ identity なら sequence が違っても重複
        assert!(!queue.add(entry("P-alpha", task_id, 9)).await.unwrap());

        assert_eq!(queue.len(&"P-alpha".into()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn takes_oldest_sequence_first() {
        let queue = InMemoryParticipantQueue::new();
        let newer = TaskId::from_ulid(Ulid::new());
        let older = TaskId::from_ulid(Ulid::new());
        queue.add(entry("P-alpha", newer, 2)).await.unwrap();
        queue.add(entry("P-alpha", older, 1)).await.unwrap();

        let p: ParticipantName = "P-alpha".into();
        assert_eq!(queue.take_next(&p).await.unwrap().unwrap().task_id, older);
        assert_eq!(queue.take_next(&p).await.unwrap().unwrap().task_id, newer);
        assert!(queue.take_next(&p).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn participants_are_independent() {
        let queue = InMemoryParticipantQueue::new();
        let task_id = TaskId::from_ulid(Ulid::new());
        queue.add(entry("P-alpha", task_id, 1)).await.unwrap();
        assert!(queue.add(entry("P-beta", task_id, 1)).await.unwrap());

        assert!(queue.remove(&"P-alpha".into(), task_id).await.unwrap());
        assert!(!queue.remove(&"P-alpha".into(), task_id).await.unwrap());
        assert_eq!(queue.entries(&"P-beta".into()).await.unwrap().len(), 1);
    }
}
