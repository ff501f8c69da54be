//! State - タスクの outcome / storage 状態
//!
//! # Outcome 状態遷移
//! - UNKNOWN -> WAITING (enqueue)
//! - WAITING -> ACTIVE (lease acquisition のみ)
//! - ACTIVE -> FINISHED (lease holder のみ)
//! - ACTIVE -> WAITING (watchdog の reclaim のみ)
//! - 非終端 -> FAILED / CANCELLED
//! - FINISHED -> FINALISED (永続化 / audit 確認)
//!
//! FAILED / CANCELLED / FINALISED は終端で、そこから出る遷移はありません。
//!
//! Storage 状態は outcome とは独立しています（write-behind なので ACTIVE かつ
//! HAS_UPDATES はあり得る）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeState {
    #[default]
    Unknown,
    Waiting,
    Active,
    Cancelled,
    Finished,
    Finalised,
    Failed,
}

impl OutcomeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Finalised)
    }
}

impl fmt::Display for OutcomeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::Waiting => "WAITING",
            Self::Active => "ACTIVE",
            Self::Cancelled => "CANCELLED",
            Self::Finished => "FINISHED",
            Self::Finalised => "FINALISED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Who or what is driving a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    Enqueued,
    LeaseAcquired,
    ExecutorFinished,
    LeaseReclaimed,
    RetryExhausted,
    ExecutorFailed,
    HandoverFailed,
    CancelRequested,
    Persisted,
    /// A handed-in task whose pipeline run succeeded on the receiving node.
    InboundProcessed,
}

/// The whole transition table.
pub fn can_transition(from: OutcomeState, to: OutcomeState, cause: TransitionCause) -> bool {
    use OutcomeState::*;
    use TransitionCause::*;

    match (from, to, cause) {
        (Unknown, Waiting, Enqueued) => true,
        (Waiting, Active, LeaseAcquired) => true,
        (Active, Finished, ExecutorFinished) => true,
        (Unknown, Finished, InboundProcessed) => true,
        (Active, Waiting, LeaseReclaimed) => true,
        (Finished, Finalised, Persisted) => true,
        (s, Failed, RetryExhausted | ExecutorFailed | HandoverFailed) => !s.is_terminal(),
        (s, Cancelled, CancelRequested) => !s.is_terminal(),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectedTransition {
    pub from: OutcomeState,
    pub to: OutcomeState,
    pub cause: TransitionCause,
}

/// Outcome state plus the instant of the last transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcomeStatus {
    state: OutcomeState,
    entry_instant: DateTime<Utc>,
}

impl TaskOutcomeStatus {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            state: OutcomeState::Unknown,
            entry_instant: at,
        }
    }

    pub fn state(&self) -> OutcomeState {
        self.state
    }

    pub fn entry_instant(&self) -> DateTime<Utc> {
        self.entry_instant
    }

    /// Apply a transition, returning the previous state.
    ///
    /// `entry_instant` never moves earlier, even when `at` does.
    pub fn transition(
        &mut self,
        to: OutcomeState,
        cause: TransitionCause,
        at: DateTime<Utc>,
    ) -> Result<OutcomeState, RejectedTransition> {
        let from = self.state;
        if !can_transition(from, to, cause) {
            return Err(RejectedTransition { from, to, cause });
        }
        self.state = to;
        self.entry_instant = self.entry_instant.max(at);
        Ok(from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageState {
    #[default]
    Unsaved,
    HasUpdates,
    Saved,
}

/// Durability of the latest snapshot, tracked separately from execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStorageStatus {
    state: StorageState,
    saved_version: Option<u64>,
}

impl TaskStorageStatus {
    pub fn state(&self) -> StorageState {
        self.state
    }

    pub fn saved_version(&self) -> Option<u64> {
        self.saved_version
    }

    pub fn needs_flush(&self) -> bool {
        self.state != StorageState::Saved
    }

    /// Record that the in-memory record moved ahead of the durable copy.
    pub fn mark_dirty(&mut self) {
        if self.state == StorageState::Saved {
            self.state = StorageState::HasUpdates;
        }
    }

    pub fn mark_saved(&mut self, version: u64) {
        self.state = StorageState::Saved;
        self.saved_version = Some(version);
    }
}
