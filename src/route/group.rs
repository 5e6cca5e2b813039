//! Route deduplication
//!
//! Many gateways hear the same traceroute response. Observations are grouped
//! by exact (done, hop sequence) so the dashboard can list each distinct
//! route once with the gateways that reported it.

use std::collections::HashMap;

use super::RouteObservation;
use crate::node::NodeId;

/// All observations sharing one (done, hops) key
#[derive(Debug, Clone)]
pub struct RouteGroup {
    pub done: bool,
    pub hops: Vec<NodeId>,
    /// First observation seen for this key
    pub representative: RouteObservation,
    /// Reporting gateways, deduplicated, in first-seen order
    pub gateways: Vec<NodeId>,
    /// Number of observations (not gateways)
    pub count: usize,
}

/// Grouping key: completion flag + comma-joined hops.
/// Order-sensitive; `true|` and `false|` never collide.
pub fn group_key(done: bool, hops: &[NodeId]) -> String {
    let hops = hops
        .iter()
        .map(|h| h.0.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("{}|{}", done, hops)
}

/// Group observations into distinct routes.
///
/// Output order: completed before incomplete, then fewer hops first, then
/// higher count first. Remaining ties keep first-seen order. Observations
/// without hop data are skipped.
pub fn group_routes(observations: &[RouteObservation]) -> Vec<RouteGroup> {
    let mut groups: Vec<RouteGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for obs in observations {
        let Some(hops) = obs.hops() else {
            continue;
        };

        let key = group_key(obs.done, &hops);
        match index.get(&key) {
            Some(&i) => {
                let group = &mut groups[i];
                group.count += 1;
                if !group.gateways.contains(&obs.gateway_id) {
                    group.gateways.push(obs.gateway_id);
                }
            }
            None => {
                index.insert(key, groups.len());
                groups.push(RouteGroup {
                    done: obs.done,
                    hops,
                    representative: obs.clone(),
                    gateways: vec![obs.gateway_id],
                    count: 1,
                });
            }
        }
    }

    // Stable sort keeps first-seen order for full ties
    groups.sort_by(|a, b| {
        b.done
            .cmp(&a.done)
            .then(a.hops.len().cmp(&b.hops.len()))
            .then(b.count.cmp(&a.count))
    });

    groups
}
