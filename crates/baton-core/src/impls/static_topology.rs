//! StaticTopology / RuleManifestMatcher - 固定テーブルによる topology と manifest 照合

use std::collections::HashMap;

use crate::domain::{Direction, Manifest, NodeId, ParticipantName};
use crate::ports::{ManifestMatcher, Topology};

/// Participant -> node table fixed at construction.
#[derive(Debug, Clone)]
pub struct StaticTopology {
    local: NodeId,
    placements: HashMap<ParticipantName, NodeId>,
}

impl StaticTopology {
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            placements: HashMap::new(),
        }
    }

    pub fn with_participant(mut self, participant: impl Into<ParticipantName>, node: NodeId) -> Self {
        self.placements.insert(participant.into(), node);
        self
    }

    /// Same placement table seen from another node.
    pub fn as_seen_from(&self, local: NodeId) -> Self {
        Self {
            local,
            placements: self.placements.clone(),
        }
    }
}

impl Topology for StaticTopology {
    fn local_node(&self) -> NodeId {
        self.local.clone()
    }

    fn node_for(&self, participant: &ParticipantName) -> Option<NodeId> {
        self.placements.get(participant).cloned()
    }
}

#[derive(Debug, Clone)]
struct Rule {
    direction: Direction,
    /// `None` matches any content type.
    content_type: Option<String>,
    participant: ParticipantName,
}

/// Every matching rule contributes, in rule order.
#[derive(Debug, Clone, Default)]
pub struct RuleManifestMatcher {
    rules: Vec<Rule>,
}

impl RuleManifestMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        mut self,
        direction: Direction,
        content_type: Option<&str>,
        participant: impl Into<ParticipantName>,
    ) -> Self {
        self.rules.push(Rule {
            direction,
            content_type: content_type.map(str::to_owned),
            participant: participant.into(),
        });
        self
    }
}

impl ManifestMatcher for RuleManifestMatcher {
    fn participants_for(&self, manifest: &Manifest) -> Vec<ParticipantName> {
        let mut out: Vec<ParticipantName> = Vec::new();
        for rule in &self.rules {
            let content_ok = rule
                .content_type
                .as_deref()
                .is_none_or(|ct| ct == manifest.content_type);
            if rule.direction == manifest.direction && content_ok && !out.contains(&rule.participant) {
                out.push(rule.participant.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_knows_where_participants_live() {
        let topology = StaticTopology::new(NodeId::new("node-a"))
            .with_participant("P-alpha", NodeId::new("node-a"))
            .with_participant("P-beta", NodeId::new("node-b"));

        assert_eq!(topology.node_for(&"P-beta".into()), Some(NodeId::new("node-b")));
        assert_eq!(topology.node_for(&"P-gamma".into()), None);
        assert_eq!(
            topology.as_seen_from(NodeId::new("node-b")).local_node(),
            NodeId::new("node-b")
        );
    }

    #[test]
    fn matcher_fans_out_without_duplicates() {
        let matcher = RuleManifestMatcher::new()
            .route(Direction::Inbound, Some("application/json"), "P-alpha")
            .route(Direction::Inbound, None, "P-beta")
            .route(Direction::Inbound, None, "P-alpha")
            .route(Direction::Outbound, None, "P-gamma");

        let json = matcher.participants_for(&Manifest::new(Direction::Inbound, "application/json"));
        assert_eq!(json, vec![ParticipantName::new("P-alpha"), ParticipantName::new("P-beta")]);

        let xml = matcher.participants_for(&Manifest::new(Direction::Inbound, "text/xml"));
        assert_eq!(xml, vec![ParticipantName::new("P-beta"), ParticipantName::new("P-alpha")]);

        assert!(matcher
            .participants_for(&Manifest::new(Direction::Distribution, "x"))
            .is_empty());
    }
}
