//! ProcessingPipeline port - タスクの中身を実行する外部エンジン
//!
//! coordination core は payload の body を解釈しません。dispatch した後の処理は
//! すべてこの trait の向こう側です。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ParticipantName, TaskPayload};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("no handler registered for participant {0}")]
    NoHandler(ParticipantName),

    /// The payload will never be processable; do not retry.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("processing failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait ProcessingPipeline: Send + Sync {
    async fn process(&self, participant: &ParticipantName, payload: &TaskPayload) -> Result<(), PipelineError>;
}
