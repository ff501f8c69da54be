//! Task sequence numbers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-node ordering key assigned at task creation.
///
/// Ordering is lexicographic over `(epoch_seconds, minor)`, which is exactly
/// the derived `Ord` because of the field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskSequenceNumber {
    pub epoch_seconds: i64,
    pub minor: u32,
}

impl TaskSequenceNumber {
    pub const fn new(epoch_seconds: i64, minor: u32) -> Self {
        Self {
            epoch_seconds,
            minor,
        }
    }
}

impl fmt::Display for TaskSequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.epoch_seconds, self.minor)
    }
}
