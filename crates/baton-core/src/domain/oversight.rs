//! Fulfillment oversight timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::CoordinationError;
use super::ids::ExecutorId;

/// When a task reached each milestone, and who is (or was last) running it.
///
/// Every instant is monotonic: once set it is never cleared and never moved
/// earlier. `last_checked_instant >= start_instant` whenever both are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOversight {
    registration_instant: Option<DateTime<Utc>>,
    ready_instant: Option<DateTime<Utc>>,
    start_instant: Option<DateTime<Utc>>,
    finish_instant: Option<DateTime<Utc>>,
    finalisation_instant: Option<DateTime<Utc>>,
    last_checked_instant: Option<DateTime<Utc>>,
    tracking_id: Option<ExecutorId>,
    resilient_activity: bool,
}

fn advance(
    slot: &mut Option<DateTime<Utc>>,
    at: DateTime<Utc>,
    field: &'static str,
) -> Result<(), CoordinationError> {
    match slot {
        Some(current) if at < *current => Err(CoordinationError::InstantRegression { field }),
        _ => {
            *slot = Some(at);
            Ok(())
        }
    }
}

impl TaskOversight {
    pub fn new(resilient_activity: bool) -> Self {
        Self {
            resilient_activity,
            ..Self::default()
        }
    }

    pub fn registration_instant(&self) -> Option<DateTime<Utc>> {
        self.registration_instant
    }

    pub fn ready_instant(&self) -> Option<DateTime<Utc>> {
        self.ready_instant
    }

    pub fn start_instant(&self) -> Option<DateTime<Utc>> {
        self.start_instant
    }

    pub fn finish_instant(&self) -> Option<DateTime<Utc>> {
        self.finish_instant
    }

    pub fn finalisation_instant(&self) -> Option<DateTime<Utc>> {
        self.finalisation_instant
    }

    pub fn last_checked_instant(&self) -> Option<DateTime<Utc>> {
        self.last_checked_instant
    }

    pub fn tracking_id(&self) -> Option<&ExecutorId> {
        self.tracking_id.as_ref()
    }

    pub fn resilient_activity(&self) -> bool {
        self.resilient_activity
    }

    pub fn record_registration(&mut self, at: DateTime<Utc>) -> Result<(), CoordinationError> {
        advance(&mut self.registration_instant, at, "registration_instant")
    }

    pub fn record_ready(&mut self, at: DateTime<Utc>) -> Result<(), CoordinationError> {
        advance(&mut self.ready_instant, at, "ready_instant")
    }

    /// A new executor took the task. Carries `last_checked_instant` forward so
    /// it never trails the new start.
    pub fn record_start(&mut self, holder: ExecutorId, at: DateTime<Utc>) -> Result<(), CoordinationError> {
        advance(&mut self.start_instant, at, "start_instant")?;
        if self.last_checked_instant.is_some_and(|checked| checked < at) {
            self.last_checked_instant = Some(at);
        }
        self.tracking_id = Some(holder);
        Ok(())
    }

    pub fn record_check(&mut self, at: DateTime<Utc>) -> Result<(), CoordinationError> {
        if self.start_instant.is_some_and(|start| at < start) {
            return Err(CoordinationError::InstantRegression {
                field: "last_checked_instant",
            });
        }
        advance(&mut self.last_checked_instant, at, "last_checked_instant")
    }

    pub fn record_finish(&mut self, at: DateTime<Utc>) -> Result<(), CoordinationError> {
        advance(&mut self.finish_instant, at, "finish_instant")
    }

    pub fn record_finalisation(&mut self, at: DateTime<Utc>) -> Result<(), CoordinationError> {
        advance(&mut self.finalisation_instant, at, "finalisation_instant")
    }
}
