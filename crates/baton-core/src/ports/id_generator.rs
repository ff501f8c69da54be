//! IdGenerator port - task id と correlation id の払い出し
//!
//! 時刻部分は Clock から取るので、FixedClock を渡せばテストで固定できます。
//! 乱数部分は `rand` から取ります。

use crate::domain::ids::{CorrelationId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

/// Ids are unique across nodes without coordination.
pub trait IdGenerator: Send + Sync {
    fn task_id(&self) -> TaskId;

    /// Fresh correlation id for one handover exchange (not per attempt).
    fn correlation_id(&self) -> CorrelationId;
}

/// ULID from the clock's milliseconds plus 80 random bits.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn task_id(&self) -> TaskId {
        TaskId::from_ulid(self.next_ulid())
    }

    fn correlation_id(&self) -> CorrelationId {
        CorrelationId::from_ulid(self.next_ulid())
    }
}
