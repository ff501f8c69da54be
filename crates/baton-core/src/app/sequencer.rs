//! SequenceGenerator - ノード内で単調増加する TaskSequenceNumber
//!
//! - 秒が進んだら minor を 0 に戻す
//! - 同じ秒（または時計が止まっている）なら minor を +1
//! - 時計が戻ったら最後の秒に留まる（warn を出すだけで、値は戻さない）

use parking_lot::Mutex;
use std::sync::Arc;

use crate::domain::TaskSequenceNumber;
use crate::ports::Clock;

pub struct SequenceGenerator {
    clock: Arc<dyn Clock>,
    last: Mutex<Option<TaskSequenceNumber>>,
}

impl SequenceGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }

    /// Continue after a persisted high-water mark.
    pub fn with_last(clock: Arc<dyn Clock>, last: TaskSequenceNumber) -> Self {
        Self {
            clock,
            last: Mutex::new(Some(last)),
        }
    }

    pub fn last(&self) -> Option<TaskSequenceNumber> {
        *self.last.lock()
    }

    pub fn next(&self) -> TaskSequenceNumber {
        let seconds = self.clock.now().timestamp();
        let mut last = self.last.lock();

        let next = match *last {
            None => TaskSequenceNumber::new(seconds, 0),
            Some(prev) if seconds > prev.epoch_seconds => TaskSequenceNumber::new(seconds, 0),
            Some(prev) => {
                if seconds < prev.epoch_seconds {
                    tracing::warn!(
                        observed = seconds,
                        last = prev.epoch_seconds,
                        "clock moved backwards; holding sequence at last seen second"
                    );
                }
                match prev.minor.checked_add(1) {
                    Some(minor) => TaskSequenceNumber::new(prev.epoch_seconds, minor),
                    None => TaskSequenceNumber::new(prev.epoch_seconds + 1, 0),
                }
            }
        };

        *last = Some(next);
        next
    }
}
