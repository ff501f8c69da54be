//! Manifest: what a payload is and which way it is travelling.
//!
//! The core never inspects payload content itself; a `ManifestMatcher`
//! collaborator turns a manifest into the participants that should receive it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Inbound,
    Outbound,
    ApiRequest,
    ApiResponse,
    WorkflowInput,
    WorkflowOutput,
    WorkflowTransient,
    /// Cross-subsystem distribution.
    Distribution,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Manifest {
    pub direction: Direction,
    pub content_type: String,
}

impl Manifest {
    pub fn new(direction: Direction, content_type: impl Into<String>) -> Self {
        Self {
            direction,
            content_type: content_type.into(),
        }
    }
}
