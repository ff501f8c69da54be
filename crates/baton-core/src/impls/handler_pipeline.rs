use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ParticipantName, TaskPayload};
use crate::ports::{PipelineError, ProcessingPipeline};

/// A handler for one participant's tasks.
///
/// Takes the whole `TaskPayload` so the handler can decode the body as it likes.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: &TaskPayload) -> Result<(), PipelineError>;
}

/// Registry of handlers (participant -> handler).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable, shared through `Arc`).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ParticipantName, Arc<dyn TaskHandler>>,
}

#[derive(Debug, thiserror::Error)]
#[error("handler already registered for participant {0}")]
pub struct DuplicateHandler(pub ParticipantName);

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        participant: impl Into<ParticipantName>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), DuplicateHandler> {
        let participant = participant.into();
        if self.handlers.contains_key(&participant) {
            return Err(DuplicateHandler(participant));
        }
        self.handlers.insert(participant, handler);
        Ok(())
    }

    pub fn get(&self, participant: &ParticipantName) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(participant)
    }

    /// Registered participants, sorted.
    pub fn participants(&self) -> Vec<ParticipantName> {
        let mut participants: Vec<_> = self.handlers.keys().cloned().collect();
        participants.sort();
        participants
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// ProcessingPipeline that dispatches to the handler registered for the participant.
pub struct HandlerPipeline {
    registry: Arc<HandlerRegistry>,
}

impl HandlerPipeline {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }
}

#[async_trait]
impl ProcessingPipeline for HandlerPipeline {
    async fn process(&self, participant: &ParticipantName, payload: &TaskPayload) -> Result<(), PipelineError> {
        let handler = self
            .registry
            .get(participant)
            .ok_or_else(|| PipelineError::NoHandler(participant.clone()))?;

        handler.handle(payload).await
    }
}

/// Handler from an async closure; handy for wiring demos and tests.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskPayload) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), PipelineError>> + Send,
{
    async fn handle(&self, payload: &TaskPayload) -> Result<(), PipelineError> {
        (self.0)(payload.clone()).await
    }
}
