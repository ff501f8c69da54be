//! InMemoryLeaseStore - 開発用の job card ストア
//!
//! 1 つの Mutex の中で「読んで、比べて、書く」ので、プロセス内では
//! linearizable です。ロックを持ったまま await はしません。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::domain::{AcquireOutcome, CoordinationError, ExecutorId, JobCard, ReleaseOutcome, RenewOutcome, TaskId};
use crate::ports::LeaseStore;

#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    cards: Mutex<HashMap<TaskId, JobCard>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(&self, card: JobCard, now: DateTime<Utc>) -> Result<AcquireOutcome, CoordinationError> {
        let mut cards = self.cards.lock();
        if let Some(current) = cards.get(&card.task_id)
            && !current.is_expired(now)
        {
            return Ok(AcquireOutcome::AlreadyHeld {
                holder_id: current.holder_id.clone(),
                lease_expiry: current.lease_expiry,
            });
        }
        cards.insert(card.task_id, card.clone());
        Ok(AcquireOutcome::Acquired(card))
    }

    async fn renew(
        &self,
        task_id: TaskId,
        holder: &ExecutorId,
        new_expiry: DateTime<Utc>,
    ) -> Result<RenewOutcome, CoordinationError> {
        let mut cards = self.cards.lock();
        match cards.get_mut(&task_id) {
            Some(card) if card.is_held_by(holder) => {
                card.lease_expiry = card.lease_expiry.max(new_expiry);
                Ok(RenewOutcome::Renewed(card.clone()))
            }
            _ => Ok(RenewOutcome::NotHeldByCaller),
        }
    }

    async fn release(&self, task_id: TaskId, holder: &ExecutorId) -> Result<ReleaseOutcome, CoordinationError> {
        let mut cards = self.cards.lock();
        match cards.get(&task_id) {
            Some(card) if card.is_held_by(holder) => {
                cards.remove(&task_id);
                Ok(ReleaseOutcome::Released)
            }
            _ => Ok(ReleaseOutcome::NotHeldByCaller),
        }
    }

    async fn reclaim_if_expired(&self, expected: &JobCard, now: DateTime<Utc>) -> Result<bool, CoordinationError> {
        let mut cards = self.cards.lock();
        match cards.get(&expected.task_id) {
            Some(card) if card == expected && card.is_expired(now) => {
                cards.remove(&expected.task_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<JobCard>, CoordinationError> {
        Ok(self.cards.lock().get(&task_id).cloned())
    }

    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<JobCard>, CoordinationError> {
        let cards = self.cards.lock();
        let mut expired: Vec<JobCard> = cards.values().filter(|c| c.is_expired(now)).cloned().collect();
        expired.sort_by_key(|c| c.lease_expiry);
        Ok(expired)
    }
}
