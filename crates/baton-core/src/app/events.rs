//! EventGate - granularity で絞ってから EventSink に渡す

use std::sync::Arc;

use crate::domain::{AuditGranularity, DomainEvent};
use crate::ports::EventSink;

#[derive(Clone)]
pub struct EventGate {
    sink: Arc<dyn EventSink>,
    level: AuditGranularity,
}

impl EventGate {
    pub fn new(sink: Arc<dyn EventSink>, level: AuditGranularity) -> Self {
        Self { sink, level }
    }

    pub fn level(&self) -> AuditGranularity {
        self.level
    }

    pub fn emit(&self, event: DomainEvent) {
        if event.is_reported_at(self.level) {
            self.sink.emit(&event);
        }
    }
}
