//! Errors - エラー型と分類
//!
//! Contention ("lease already held") と lease loss は Result の Err ではなく
//! outcome enum（`AcquireOutcome` など）で表現します。ここにあるのは
//! 呼び出し側が処理を続けられない本当のエラーだけです。

use thiserror::Error;

use super::ids::{ExecutorId, NodeId, ParticipantName, TaskId};
use super::state::OutcomeState;

/// ErrorKind は実行エラーの運用分類
///
/// - Transient: 一時的（リトライ推奨）
/// - Permanent: 恒久的（リトライ無意味）
/// - Infrastructure: store / transport / 設定の障害
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Failure to move bytes to another node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("node {0} is unreachable")]
    Unreachable(NodeId),

    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport closed: {0}")]
    Closed(String),
}

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task already exists: {0}")]
    TaskExists(TaskId),

    #[error("invalid transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: OutcomeState,
        to: OutcomeState,
    },

    #[error("oversight instant `{field}` cannot move backwards")]
    InstantRegression { field: &'static str },

    #[error("lease on {task_id} is not held by {holder}")]
    LeaseNotHeld { task_id: TaskId, holder: ExecutorId },

    #[error("gave up on {task_id} after {attempts} conflicting concurrent updates")]
    Conflict { task_id: TaskId, attempts: u32 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("handover of {task_id} failed after {attempts} attempts: {reason}")]
    HandoverFailed {
        task_id: TaskId,
        attempts: u32,
        reason: String,
    },

    #[error("no node hosts participant {0}")]
    UnknownParticipant(ParticipantName),

    #[error("payload codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store: {0}")]
    Store(String),

    #[error("configuration: {0}")]
    Config(String),
}

impl From<config::ConfigError> for CoordinationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl CoordinationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } | Self::Transport(_) => ErrorKind::Transient,
            Self::Store(_) | Self::Config(_) => ErrorKind::Infrastructure,
            Self::TaskNotFound(_)
            | Self::TaskExists(_)
            | Self::InvalidTransition { .. }
            | Self::InstantRegression { .. }
            | Self::LeaseNotHeld { .. }
            | Self::HandoverFailed { .. }
            | Self::UnknownParticipant(_)
            | Self::Codec(_) => ErrorKind::Permanent,
        }
    }
}
