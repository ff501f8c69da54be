//! Topology / manifest collaborators (consumed only).

use crate::domain::{Manifest, NodeId, ParticipantName};

/// Where participants live.
pub trait Topology: Send + Sync {
    fn local_node(&self) -> NodeId;

    /// `None` when no node hosts the participant.
    fn node_for(&self, participant: &ParticipantName) -> Option<NodeId>;
}

/// Which participants should receive a payload described by a manifest.
pub trait ManifestMatcher: Send + Sync {
    fn participants_for(&self, manifest: &Manifest) -> Vec<ParticipantName>;
}
