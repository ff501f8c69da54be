//! TaskStore port - タスクレコードの正本（source of truth）
//!
//! 書き込みは `version` による楽観的 compare-and-swap のみ。読み出した version
//! のまま書き戻せなかった呼び出し側は、読み直してやり直します
//! （`app::records::update_task`）。

use async_trait::async_trait;

use crate::domain::{CoordinationError, TaskId, TaskRecord};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fails with `TaskExists` if the id is taken.
    async fn insert(&self, record: TaskRecord) -> Result<(), CoordinationError>;

    async fn get(&self, task_id: TaskId) -> Result<Option<TaskRecord>, CoordinationError>;

    /// Replace the stored record iff its version is still `expected_version`.
    ///
    /// Returns `false` when another writer got there first.
    async fn compare_and_swap(&self, record: TaskRecord, expected_version: u64) -> Result<bool, CoordinationError>;

    async fn list(&self) -> Result<Vec<TaskRecord>, CoordinationError>;
}
