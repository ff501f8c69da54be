//! Task record: identity + oversight + status, composed.
//!
//! Design:
//! - This is the "single source of truth" for one task's lifecycle.
//! - Queue entries and job cards hold TaskId only.
//! - `version` はストアの compare-and-swap 用。ストアに書くたびに +1。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::CoordinationError;
use super::ids::{ParticipantName, TaskId};
use super::oversight::TaskOversight;
use super::state::{OutcomeState, TaskOutcomeStatus, TaskStorageStatus, TransitionCause};
use super::task::{TaskIdentity, TaskPayload};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub identity: TaskIdentity,
    pub participant: ParticipantName,
    pub body: serde_json::Value,
    pub oversight: TaskOversight,
    pub outcome: TaskOutcomeStatus,
    pub storage: TaskStorageStatus,

    /// Number of times the watchdog took this task back from a stalled executor.
    pub retry_count: u32,

    pub failure_reason: Option<String>,
    pub version: u64,
}

impl TaskRecord {
    pub fn new(
        identity: TaskIdentity,
        participant: ParticipantName,
        body: serde_json::Value,
        resilient_activity: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity,
            participant,
            body,
            oversight: TaskOversight::new(resilient_activity),
            outcome: TaskOutcomeStatus::new(created_at),
            storage: TaskStorageStatus::default(),
            retry_count: 0,
            failure_reason: None,
            version: 0,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.identity.task_id
    }

    pub fn state(&self) -> OutcomeState {
        self.outcome.state()
    }

    pub fn payload(&self) -> TaskPayload {
        TaskPayload::new(self.identity, self.body.clone())
    }

    /// Move the outcome state machine, mapping a rejection onto the task.
    pub fn transition(
        &mut self,
        to: OutcomeState,
        cause: TransitionCause,
        at: DateTime<Utc>,
    ) -> Result<OutcomeState, CoordinationError> {
        let task_id = self.task_id();
        self.outcome
            .transition(to, cause, at)
            .map_err(|rejected| CoordinationError::InvalidTransition {
                task_id,
                from: rejected.from,
                to: rejected.to,
            })
    }

    /// Transition to FAILED and remember why.
    pub fn fail(
        &mut self,
        cause: TransitionCause,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<OutcomeState, CoordinationError> {
        let from = self.transition(OutcomeState::Failed, cause, at)?;
        self.failure_reason = Some(reason.into());
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ReasonType, TaskSequenceNumber};
    use ulid::Ulid;

    fn record() -> TaskRecord {
        let identity = TaskIdentity::new(
            TaskId::from_ulid(Ulid::new()),
            TaskSequenceNumber::new(100, 1),
            ReasonType::MessageProcessing,
        );
        TaskRecord::new(identity, ParticipantName::new("P-alpha"), serde_json::json!({}), true, Utc::now())
    }

    #[test]
    fn new_record_is_unknown_and_unsaved() {
        let record = record();
        assert_eq!(record.state(), OutcomeState::Unknown);
        assert!(record.storage.needs_flush());
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.version, 0);
    }

    #[test]
    fn invalid_transition_is_reported_for_the_task() {
        let mut record = record();
        let err = record
            .transition(OutcomeState::Active, TransitionCause::LeaseAcquired, Utc::now())
            .unwrap_err();
        match err {
            CoordinationError::InvalidTransition { task_id, from, to } => {
                assert_eq!(task_id, record.task_id());
                assert_eq!(from, OutcomeState::Unknown);
                assert_eq!(to, OutcomeState::Active);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn fail_keeps_the_reason() {
        let mut record = record();
        record
            .fail(TransitionCause::ExecutorFailed, "boom", Utc::now())
            .unwrap();
        assert_eq!(record.state(), OutcomeState::Failed);
        assert_eq!(record.failure_reason.as_deref(), Some("boom"));
    }
}
