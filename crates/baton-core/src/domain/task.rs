use serde::{Deserialize, Serialize};
use std::fmt;

use super::{TaskId, TaskSequenceNumber};

/// Why a task exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonType {
    #[default]
    Unknown,
    MessageProcessing,
    TaskRouting,
    ApiRequest,
}

impl fmt::Display for ReasonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::MessageProcessing => "message-processing",
            Self::TaskRouting => "task-routing",
            Self::ApiRequest => "api-request",
        };
        f.write_str(s)
    }
}

/// Identity of a task. Created once, immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskIdentity {
    pub task_id: TaskId,
    pub sequence_number: TaskSequenceNumber,
    pub reason_type: ReasonType,
}

impl TaskIdentity {
    pub fn new(task_id: TaskId, sequence_number: TaskSequenceNumber, reason_type: ReasonType) -> Self {
        Self {
            task_id,
            sequence_number,
            reason_type,
        }
    }
}

/// Identity + body の"運搬用"データ。
///
/// The body is opaque to the coordination core; the pipeline collaborator
/// interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub identity: TaskIdentity,
    pub body: serde_json::Value,
}

impl TaskPayload {
    pub fn new(identity: TaskIdentity, body: serde_json::Value) -> Self {
        Self { identity, body }
    }

    pub fn task_id(&self) -> TaskId {
        self.identity.task_id
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn reason_type_uses_kebab_case_names() {
        let s = serde_json::to_string(&ReasonType::MessageProcessing).unwrap();
        assert_eq!(s, "\"message-processing\"");
        assert_eq!(ReasonType::ApiRequest.to_string(), "api-request");
        assert_eq!(ReasonType::default(), ReasonType::Unknown);
    }

    #[test]
    fn payload_decode_rejects_garbage() {
        assert!(TaskPayload::decode(b"not json").is_err());
    }

    #[test]
    fn payload_carries_identity_through_encoding() {
        let identity = TaskIdentity::new(
            TaskId::from_ulid(Ulid::new()),
            TaskSequenceNumber::new(100, 1),
            ReasonType::TaskRouting,
        );
        let payload = TaskPayload::new(identity, serde_json::json!({"k": "v"}));

        let back = TaskPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(back.task_id(), identity.task_id);
        assert_eq!(back.identity.sequence_number, TaskSequenceNumber::new(100, 1));
        assert_eq!(back.body["k"], "v");
    }
}
