//! Relay byte disambiguation
//!
//! Packet headers only carry the low byte of the relaying node's number, so
//! one relay byte usually maps to several nodes. Resolution happens in two
//! steps:
//!
//! 1. `NodeDirectory::candidates` (local, synchronous): every node whose
//!    low byte matches and which is on the packet's channel.
//! 2. `refine::refine` (remote, optional): ask the reporting gateway's
//!    heard-from / heard-by history which candidate it actually hears most.
//!
//! Ambiguous results stay sets all the way through; callers decide whether
//! to pay for step 2.

pub mod refine;

use serde::Serialize;
use std::collections::HashMap;

use crate::node::{Node, NodeId, Position};

/// Which heard history resolved a relay byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeardList {
    HeardFrom,
    HeardBy,
}

/// Result of a successful remote refinement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Refinement {
    pub list: HeardList,
    /// Historical packet count behind the pick
    pub packet_count: u64,
}

/// Nodes a relay byte may refer to, for one gateway's report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayCandidateSet {
    pub relay_byte: u8,
    pub channel: String,
    /// Phase 1 order (directory order); a single entry after refinement
    pub candidates: Vec<NodeId>,
    /// Set once a remote refinement collapsed the set
    pub refinement: Option<Refinement>,
}

impl RelayCandidateSet {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }

    /// The single candidate, if there is exactly one
    pub fn resolved(&self) -> Option<NodeId> {
        match self.candidates.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Candidates in display order.
    ///
    /// With a located gateway: located candidates by ascending distance,
    /// then unlocated ones in their original order. Without a gateway
    /// location the original order is kept.
    pub fn ranked(
        &self,
        gateway: Option<Position>,
        directory: &NodeDirectory,
    ) -> Vec<RankedCandidate> {
        let mut ranked: Vec<RankedCandidate> = self
            .candidates
            .iter()
            .map(|&node_id| {
                let distance_miles = gateway.and_then(|gw| {
                    directory
                        .get(node_id)
                        .and_then(Node::position)
                        .map(|pos| gw.distance_miles(&pos))
                });
                RankedCandidate {
                    node_id,
                    name: directory.display_name(node_id),
                    distance_miles,
                }
            })
            .collect();

        if gateway.is_some() {
            // Stable: unlocated candidates keep input order among themselves
            ranked.sort_by(|a, b| match (a.distance_miles, b.distance_miles) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });
        }

        ranked
    }
}

/// One candidate prepared for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub node_id: NodeId,
    pub name: String,
    /// Great-circle distance from the reporting gateway
    pub distance_miles: Option<f64>,
}

/// Read-only snapshot of the node directory
///
/// Loaded once by the caller and passed in; nothing in this crate mutates
/// it after construction.
#[derive(Debug, Clone, Default)]
pub struct NodeDirectory {
    nodes: Vec<Node>,
    by_id: HashMap<NodeId, usize>,
}

impl NodeDirectory {
    /// Build from API records. Later duplicates of a node id are dropped.
    pub fn new(records: Vec<Node>) -> Self {
        let mut nodes = Vec::with_capacity(records.len());
        let mut by_id = HashMap::with_capacity(records.len());

        for node in records {
            if by_id.contains_key(&node.node_id) {
                continue;
            }
            by_id.insert(node.node_id, nodes.len());
            nodes.push(node);
        }

        Self { nodes, by_id }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn get(&self, node_id: NodeId) -> Option<&Node> {
        self.by_id.get(&node_id).map(|&i| &self.nodes[i])
    }

    /// Directory name, or `!hex` for unknown nodes
    pub fn display_name(&self, node_id: NodeId) -> String {
        self.get(node_id)
            .map(Node::display_name)
            .unwrap_or_else(|| node_id.to_string())
    }

    /// All nodes sharing a relay byte, on any channel
    pub fn lookup(&self, relay_byte: u8) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| n.node_id.relay_byte() == relay_byte)
            .collect()
    }

    /// Phase 1: nodes matching the relay byte on the packet's channel
    pub fn candidates(&self, relay_byte: u8, channel: &str) -> RelayCandidateSet {
        let candidates = self
            .lookup(relay_byte)
            .into_iter()
            .filter(|n| n.channel.as_deref() == Some(channel))
            .map(|n| n.node_id)
            .collect();

        RelayCandidateSet {
            relay_byte,
            channel: channel.to_string(),
            candidates,
            refinement: None,
        }
    }
}

/// Per-gateway relay candidates for the packet currently being viewed
///
/// Owned by the calling context. Results that arrive after the subject
/// packet changed are dropped by `apply`.
#[derive(Debug, Clone, Default)]
pub struct RelayMatches {
    packet_id: Option<u64>,
    entries: Vec<(NodeId, RelayCandidateSet)>,
}

impl RelayMatches {
    pub fn for_packet(packet_id: u64) -> Self {
        Self {
            packet_id: Some(packet_id),
            entries: Vec::new(),
        }
    }

    pub fn packet_id(&self) -> Option<u64> {
        self.packet_id
    }

    /// Switch to a new subject packet, discarding previous matches
    pub fn reset(&mut self, packet_id: u64) {
        self.packet_id = Some(packet_id);
        self.entries.clear();
    }

    /// Store a set for `gateway` if `packet_id` is still the subject.
    /// Returns whether the set was applied.
    pub fn apply(&mut self, packet_id: u64, gateway: NodeId, set: RelayCandidateSet) -> bool {
        if self.packet_id != Some(packet_id) {
            return false;
        }
        match self.entries.iter_mut().find(|(gw, _)| *gw == gateway) {
            Some((_, existing)) => *existing = set,
            None => self.entries.push((gateway, set)),
        }
        true
    }

    pub fn get(&self, gateway: NodeId) -> Option<&RelayCandidateSet> {
        self.entries
            .iter()
            .find(|(gw, _)| *gw == gateway)
            .map(|(_, set)| set)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &RelayCandidateSet)> {
        self.entries.iter().map(|(gw, set)| (*gw, set))
    }

    /// Gateways whose set still has more than one candidate, in insertion order
    pub fn ambiguous_gateways(&self) -> Vec<NodeId> {
        self.entries
            .iter()
            .filter(|(_, set)| set.is_ambiguous())
            .map(|(gw, _)| *gw)
            .collect()
    }
}
