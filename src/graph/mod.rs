//! Traceroute network graph
//!
//! Merges every observation of one traceroute request into a directed graph
//! of hop adjacencies and assigns a layered layout: each node's layer is its
//! BFS depth from the source along outgoing edges.
//!
//! Paths per observation:
//!   done:       [source, ...hops, destination]
//!   not done:   [source, ...hops]
//!
//! Nodes that no edge connects to the source keep their classification but
//! get no layout position.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use crate::node::NodeId;
use crate::relay::NodeDirectory;
use crate::route::RouteObservation;

/// How a node takes part in the traceroute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Source,
    Destination,
    /// Hop on at least one completed route
    Intermediate,
    /// Only reported, or only seen on incomplete routes
    Gateway,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Source => write!(f, "source"),
            NodeRole::Destination => write!(f, "destination"),
            NodeRole::Intermediate => write!(f, "intermediate"),
            NodeRole::Gateway => write!(f, "gateway"),
        }
    }
}

/// Layout position of a node
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Placement {
    pub layer: usize,
    /// Index within the layer, in discovery order
    pub index: usize,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub name: String,
    pub role: NodeRole,
    /// Observations whose path or reporting gateway includes this node
    pub count: usize,
    /// `None` when unreachable from the source
    pub placement: Option<Placement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub from: NodeId,
    pub to: NodeId,
    /// Times this hop was observed
    pub count: usize,
}

/// Spacing for the layered layout
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LayoutParams {
    pub margin: f64,
    /// Horizontal distance between layers
    pub layer_spacing: f64,
    /// Vertical distance between nodes in a layer
    pub node_spacing: f64,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            margin: 40.0,
            layer_spacing: 180.0,
            node_spacing: 90.0,
        }
    }
}

impl LayoutParams {
    pub fn place(&self, layer: usize, index: usize) -> Placement {
        Placement {
            layer,
            index,
            x: self.margin + layer as f64 * self.layer_spacing,
            y: self.margin + index as f64 * self.node_spacing,
        }
    }
}

/// Reconstructed graph for one traceroute request
#[derive(Debug, Clone, Serialize)]
pub struct RouteGraph {
    pub source: NodeId,
    pub destination: NodeId,
    /// In first-seen order
    pub nodes: Vec<GraphNode>,
    /// In first-seen order
    pub edges: Vec<GraphEdge>,
}

impl RouteGraph {
    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, from: NodeId, to: NodeId) -> Option<&GraphEdge> {
        self.edges.iter().find(|e| e.from == from && e.to == to)
    }

    /// Nodes with a layout position, by layer then index
    pub fn positioned(&self) -> Vec<&GraphNode> {
        let mut placed: Vec<&GraphNode> =
            self.nodes.iter().filter(|n| n.placement.is_some()).collect();
        placed.sort_by_key(|n| n.placement.map(|p| (p.layer, p.index)));
        placed
    }

    /// Number of layers in the layout
    pub fn depth(&self) -> usize {
        self.nodes
            .iter()
            .filter_map(|n| n.placement.map(|p| p.layer + 1))
            .max()
            .unwrap_or(0)
    }
}

/// Build the graph for one traceroute request.
///
/// Deterministic for a given observation order. Observations without hop
/// data are skipped.
pub fn build_graph(
    observations: &[RouteObservation],
    source: NodeId,
    destination: NodeId,
    directory: &NodeDirectory,
    layout: &LayoutParams,
) -> RouteGraph {
    let mut order: Vec<NodeId> = Vec::new();
    let mut counts: HashMap<NodeId, usize> = HashMap::new();
    let mut on_completed: HashSet<NodeId> = HashSet::new();
    let mut edges: Vec<GraphEdge> = Vec::new();
    let mut edge_index: HashMap<(NodeId, NodeId), usize> = HashMap::new();

    for id in [source, destination] {
        if counts.insert(id, 0).is_none() {
            order.push(id);
        }
    }

    for obs in observations {
        let Some(hops) = obs.hops() else {
            continue;
        };

        let mut path = Vec::with_capacity(hops.len() + 2);
        path.push(source);
        path.extend_from_slice(&hops);
        if obs.done {
            path.push(destination);
            on_completed.extend(hops.iter().copied());
        }

        let mut seen_this_obs: HashSet<NodeId> = HashSet::new();
        for id in path.iter().copied().chain(std::iter::once(obs.gateway_id)) {
            if !seen_this_obs.insert(id) {
                continue;
            }
            let count = counts.entry(id).or_insert_with(|| {
                order.push(id);
                0
            });
            *count += 1;
        }

        for pair in path.windows(2) {
            let key = (pair[0], pair[1]);
            match edge_index.get(&key) {
                Some(&i) => edges[i].count += 1,
                None => {
                    edge_index.insert(key, edges.len());
                    edges.push(GraphEdge {
                        from: pair[0],
                        to: pair[1],
                        count: 1,
                    });
                }
            }
        }
    }

    let placements = assign_layers(source, &edges, layout);

    let nodes = order
        .into_iter()
        .map(|id| {
            let role = if id == source {
                NodeRole::Source
            } else if id == destination {
                NodeRole::Destination
            } else if on_completed.contains(&id) {
                NodeRole::Intermediate
            } else {
                NodeRole::Gateway
            };

            GraphNode {
                id,
                name: directory.display_name(id),
                role,
                count: counts.get(&id).copied().unwrap_or(0),
                placement: placements.get(&id).copied(),
            }
        })
        .collect();

    RouteGraph {
        source,
        destination,
        nodes,
        edges,
    }
}

/// BFS from `source` over outgoing edges. Unreachable nodes are absent
/// from the result.
fn assign_layers(
    source: NodeId,
    edges: &[GraphEdge],
    layout: &LayoutParams,
) -> HashMap<NodeId, Placement> {
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for edge in edges {
        adjacency.entry(edge.from).or_default().push(edge.to);
    }

    let mut placements: HashMap<NodeId, Placement> = HashMap::new();
    let mut layer_sizes: Vec<usize> = Vec::new();
    let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();

    placements.insert(source, layout.place(0, 0));
    layer_sizes.push(1);
    queue.push_back((source, 0));

    while let Some((id, layer)) = queue.pop_front() {
        let Some(next) = adjacency.get(&id) else {
            continue;
        };
        for &child in next {
            if placements.contains_key(&child) {
                continue;
            }
            let child_layer = layer + 1;
            if layer_sizes.len() <= child_layer {
                layer_sizes.push(0);
            }
            let index = layer_sizes[child_layer];
            layer_sizes[child_layer] += 1;

            placements.insert(child, layout.place(child_layer, index));
            queue.push_back((child, child_layer));
        }
    }

    placements
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const SRC: NodeId = NodeId(0x11111111);
    const DST: NodeId = NodeId(0x22222222);

    fn obs(gateway: u32, hops: &[u32], done: bool) -> RouteObservation {
        RouteObservation {
            gateway_id: NodeId(gateway),
            route: Some(hops.iter().copied().map(NodeId).collect()),
            payload_hex: None,
            done,
            observed_at: Some(Utc::now()),
        }
    }

    fn build(observations: &[RouteObservation]) -> RouteGraph {
        build_graph(
            observations,
            SRC,
            DST,
            &NodeDirectory::default(),
            &LayoutParams::default(),
        )
    }

    fn layer(graph: &RouteGraph, id: u32) -> Option<usize> {
        graph.node(NodeId(id))?.placement.map(|p| p.layer)
    }

    #[test]
    fn test_chain_layers() {
        let graph = build(&[obs(0x99, &[0xA, 0xB], true)]);
        assert_eq!(layer(&graph, 0x11111111), Some(0));
        assert_eq!(layer(&graph, 0xA), Some(1));
        assert_eq!(layer(&graph, 0xB), Some(2));
        assert_eq!(layer(&graph, 0x22222222), Some(3));
        assert_eq!(graph.depth(), 4);

        let xs: Vec<f64> = graph
            .positioned()
            .iter()
            .filter_map(|n| n.placement.map(|p| p.x))
            .collect();
        assert!(xs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_direct_route_is_one_edge() {
        let graph = build(&[obs(0x99, &[], true)]);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edge(SRC, DST).map(|e| e.count), Some(1));
        assert_eq!(layer(&graph, 0x22222222), Some(1));
    }

    #[test]
    fn test_incomplete_route_omits_destination() {
        let graph = build(&[obs(0x99, &[0xA], false)]);
        assert_eq!(graph.edges.len(), 1);
        assert!(graph.edge(SRC, NodeId(0xA)).is_some());
        assert!(graph.edge(NodeId(0xA), DST).is_none());
        assert_eq!(graph.node(NodeId(0xA)).map(|n| n.role), Some(NodeRole::Gateway));
        // Destination still classified, but unreachable
        let dst = graph.node(DST).unwrap();
        assert_eq!(dst.role, NodeRole::Destination);
        assert!(dst.placement.is_none());
    }

    #[test]
    fn test_edge_counts_accumulate() {
        let input = vec![
            obs(1, &[0xA], true),
            obs(2, &[0xA, 0xB], false),
            obs(3, &[0xA], true),
            obs(4, &[0xC], true),
        ];
        let graph = build(&input);
        assert_eq!(graph.edge(SRC, NodeId(0xA)).map(|e| e.count), Some(3));
        assert_eq!(graph.edge(NodeId(0xA), DST).map(|e| e.count), Some(2));
        assert_eq!(graph.edge(NodeId(0xA), NodeId(0xB)).map(|e| e.count), Some(1));
        assert_eq!(graph.edge(SRC, NodeId(0xC)).map(|e| e.count), Some(1));

        // No duplicate (from, to) entries
        let mut keys: Vec<(NodeId, NodeId)> = graph.edges.iter().map(|e| (e.from, e.to)).collect();
        let total = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), total);
    }

    #[test]
    fn test_roles() {
        let input = vec![obs(0x44, &[0xA], true), obs(0x55, &[0xB], false)];
        let graph = build(&input);
        let role = |id: u32| graph.node(NodeId(id)).map(|n| n.role);
        assert_eq!(role(0x11111111), Some(NodeRole::Source));
        assert_eq!(role(0x22222222), Some(NodeRole::Destination));
        assert_eq!(role(0xA), Some(NodeRole::Intermediate));
        assert_eq!(role(0xB), Some(NodeRole::Gateway));
        assert_eq!(role(0x44), Some(NodeRole::Gateway));
        assert_eq!(role(0x55), Some(NodeRole::Gateway));
    }

    #[test]
    fn test_same_layer_nodes_are_spaced_vertically() {
        let input = vec![obs(1, &[0xA], true), obs(2, &[0xB], true)];
        let graph = build(&input);
        let a = graph.node(NodeId(0xA)).and_then(|n| n.placement).unwrap();
        let b = graph.node(NodeId(0xB)).and_then(|n| n.placement).unwrap();
        assert_eq!(a.layer, 1);
        assert_eq!(b.layer, 1);
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
        assert_eq!(a.x, b.x);
        assert!(b.y > a.y);
    }

    #[test]
    fn test_rebuild_is_identical() {
        let input = vec![
            obs(1, &[0xA, 0xB], true),
            obs(2, &[0xC], false),
            obs(3, &[0xA, 0xB], true),
        ];
        let first = build(&input);
        let second = build(&input);
        assert_eq!(first.edges, second.edges);
        let placements = |g: &RouteGraph| -> Vec<(NodeId, Option<Placement>)> {
            g.nodes.iter().map(|n| (n.id, n.placement)).collect()
        };
        assert_eq!(placements(&first), placements(&second));
    }

    #[test]
    fn test_observation_counts() {
        let input = vec![obs(0x44, &[0xA], true), obs(0x55, &[0xA], true)];
        let graph = build(&input);
        assert_eq!(graph.node(NodeId(0xA)).map(|n| n.count), Some(2));
        assert_eq!(graph.node(NodeId(0x44)).map(|n| n.count), Some(1));
        assert_eq!(graph.node(SRC).map(|n| n.count), Some(2));
    }
}
