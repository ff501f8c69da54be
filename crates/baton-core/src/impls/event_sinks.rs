//! EventSink 実装
//!
//! - **TracingEventSink**: `tracing` にそのまま流す（本番 / demo 用）
//! - **RecordingEventSink**: メモリに貯める（テストで遷移列を検証する）

use parking_lot::Mutex;

use crate::domain::{DomainEvent, OutcomeState, TaskId};
use crate::ports::EventSink;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &DomainEvent) {
        match event {
            DomainEvent::TaskSurfaced { task_id, reason } => {
                tracing::warn!(task_id = %task_id, reason = %reason, "task surfaced for operator attention");
            }
            DomainEvent::LeaseReclaimed {
                task_id,
                holder_id,
                retry_count,
            } => {
                tracing::warn!(task_id = %task_id, holder = %holder_id, retry_count, "lease reclaimed");
            }
            other => match serde_json::to_string(other) {
                Ok(json) => tracing::info!(target: "baton::audit", event = %json),
                Err(e) => tracing::error!(error = %e, "failed to encode audit event"),
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    /// Outcome states `task_id` moved through, in order.
    pub fn states_of(&self, task_id: TaskId) -> Vec<OutcomeState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DomainEvent::Transitioned { task_id: id, to, .. } if *id == task_id => Some(*to),
                _ => None,
            })
            .collect()
    }

    pub fn surfaced(&self) -> Vec<TaskId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DomainEvent::TaskSurfaced { task_id, .. } => Some(*task_id),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &DomainEvent) {
        self.events.lock().push(event.clone());
    }
}
