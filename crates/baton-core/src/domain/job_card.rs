//! Job cards: time-bounded claims binding one task to one executor.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ExecutorId, TaskId};
use super::state::OutcomeState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCard {
    pub task_id: TaskId,
    pub holder_id: ExecutorId,
    pub lease_expiry: DateTime<Utc>,
    pub acquired_at: DateTime<Utc>,
}

impl JobCard {
    pub fn new(task_id: TaskId, holder_id: ExecutorId, acquired_at: DateTime<Utc>, lease: Duration) -> Self {
        Self {
            task_id,
            holder_id,
            lease_expiry: acquired_at + lease,
            acquired_at,
        }
    }

    /// A lease is no longer valid at its expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_expiry <= now
    }

    pub fn is_held_by(&self, holder: &ExecutorId) -> bool {
        &self.holder_id == holder
    }
}

/// Result of a conditional card write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(JobCard),
    AlreadyHeld {
        holder_id: ExecutorId,
        lease_expiry: DateTime<Utc>,
    },
    /// The card was won but the task was not WAITING, so it was given back.
    NotEligible(OutcomeState),
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed(JobCard),
    NotHeldByCaller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotHeldByCaller,
}
