//! Traceroute and relay inference for Meshtastic mesh dashboards
//!
//! Pure engine over data fetched from a dashboard backend:
//! - [`route`]: decode `RouteDiscovery` payloads, group repeated observations
//! - [`graph`]: merge observations into a layered hop graph
//! - [`relay`]: resolve one-byte relay hints to candidate nodes
//! - `api` (feature `remote`): HTTP client for the backend

pub mod config;
pub mod graph;
pub mod node;
pub mod relay;
pub mod route;

#[cfg(feature = "remote")]
pub mod api;

pub use graph::{build_graph, GraphEdge, GraphNode, LayoutParams, NodeRole, RouteGraph};
pub use node::{Node, NodeId, Position};
pub use relay::{NodeDirectory, RelayCandidateSet, RelayMatches};
pub use route::group::{group_routes, RouteGroup};
pub use route::{decode_route, decode_route_hex, RouteDiscovery, RouteObservation};
