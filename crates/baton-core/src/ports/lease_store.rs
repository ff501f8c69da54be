//! LeaseStore port - job card の共有マップ
//!
//! すべての書き込みは条件付き（compare-and-set / conditional delete）です。
//! 相互排他の正しさはこの trait の実装が linearizable であることだけに依存し、
//! プロセス内ロックには依存しません。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{AcquireOutcome, CoordinationError, ExecutorId, JobCard, ReleaseOutcome, RenewOutcome, TaskId};

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Store `card` iff no card exists for its task or the existing one is
    /// expired at `now`. Otherwise report the current holder.
    async fn try_acquire(&self, card: JobCard, now: DateTime<Utc>) -> Result<AcquireOutcome, CoordinationError>;

    /// Move the expiry of a card still held by `holder`.
    async fn renew(
        &self,
        task_id: TaskId,
        holder: &ExecutorId,
        new_expiry: DateTime<Utc>,
    ) -> Result<RenewOutcome, CoordinationError>;

    /// Delete the card iff `holder` holds it.
    async fn release(&self, task_id: TaskId, holder: &ExecutorId) -> Result<ReleaseOutcome, CoordinationError>;

    /// Delete the card iff it is still exactly `expected` and still expired at
    /// `now`. A renewal that lands first wins.
    async fn reclaim_if_expired(&self, expected: &JobCard, now: DateTime<Utc>) -> Result<bool, CoordinationError>;

    async fn get(&self, task_id: TaskId) -> Result<Option<JobCard>, CoordinationError>;

    /// Cards whose lease had run out at `now`.
    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<JobCard>, CoordinationError>;
}
