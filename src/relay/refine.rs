//! Remote relay refinement
//!
//! A gateway's historical heard-from list tells us which nodes it directly
//! receives packets from. Among the Phase 1 candidates, the one the gateway
//! has heard most often is almost always the actual relay. When heard-from
//! has no match the heard-by list is tried the same way.
//!
//! Refinement only ever narrows a set: the winner must already be a Phase 1
//! candidate. A set with zero or one candidate is returned untouched
//! without a remote call.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{HeardList, Refinement, RelayCandidateSet, RelayMatches};
use crate::node::NodeId;

/// One entry of a heard history list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeardEntry {
    pub node_id: NodeId,
    #[serde(default)]
    pub packet_count: u64,
}

/// Heard history for one gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeardHistory {
    /// Nodes this gateway has directly received packets from
    #[serde(default)]
    pub heard_from: Vec<HeardEntry>,
    /// Nodes that have directly received packets from this gateway
    #[serde(default)]
    pub heard_by: Vec<HeardEntry>,
}

/// Where heard history comes from (the dashboard API in production)
#[allow(async_fn_in_trait)]
pub trait HeardHistorySource {
    async fn heard_history(&self, node_id: NodeId) -> Result<HeardHistory>;
}

/// Pick the most-heard Phase 1 candidate from a history.
///
/// heard-from is searched first, heard-by only when heard-from has no
/// match. Ties go to the earliest entry.
pub fn best_match(
    history: &HeardHistory,
    set: &RelayCandidateSet,
) -> Option<(NodeId, Refinement)> {
    let lists = [
        (HeardList::HeardFrom, &history.heard_from),
        (HeardList::HeardBy, &history.heard_by),
    ];

    for (list, entries) in lists {
        let mut best: Option<&HeardEntry> = None;
        for entry in entries.iter().filter(|e| {
            e.node_id.relay_byte() == set.relay_byte && set.candidates.contains(&e.node_id)
        }) {
            if best.map_or(true, |b| entry.packet_count > b.packet_count) {
                best = Some(entry);
            }
        }

        if let Some(entry) = best {
            return Some((
                entry.node_id,
                Refinement {
                    list,
                    packet_count: entry.packet_count,
                },
            ));
        }
    }

    None
}

/// Apply a fetched history to a set. Unchanged when nothing matches.
pub fn apply_history(set: &RelayCandidateSet, history: &HeardHistory) -> RelayCandidateSet {
    match best_match(history, set) {
        Some((node_id, refinement)) => RelayCandidateSet {
            candidates: vec![node_id],
            refinement: Some(refinement),
            ..set.clone()
        },
        None => set.clone(),
    }
}

/// Refine one gateway's candidate set using its heard history.
///
/// Errors only on remote failure; a history without a match returns the
/// set unchanged.
pub async fn refine<S: HeardHistorySource>(
    source: &S,
    gateway: NodeId,
    set: &RelayCandidateSet,
) -> Result<RelayCandidateSet> {
    if !set.is_ambiguous() {
        debug!(
            "Relay 0x{:02x} at {} has {} candidate(s), nothing to refine",
            set.relay_byte,
            gateway,
            set.candidates.len()
        );
        return Ok(set.clone());
    }

    let history = source
        .heard_history(gateway)
        .await
        .with_context(|| format!("failed to fetch heard history for {}", gateway))?;

    let refined = apply_history(set, &history);
    match refined.resolved() {
        Some(node_id) if refined.refinement.is_some() => {
            debug!(
                "Relay 0x{:02x} at {} resolved to {}",
                set.relay_byte, gateway, node_id
            );
        }
        _ => {
            debug!(
                "Relay 0x{:02x} at {}: no match in heard history ({} from, {} by)",
                set.relay_byte,
                gateway,
                history.heard_from.len(),
                history.heard_by.len()
            );
        }
    }

    Ok(refined)
}

/// Outcome counts of a batch refinement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub resolved: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Refine every ambiguous gateway in `matches`, one call at a time with
/// `delay` between remote calls. A failing gateway is logged and skipped.
pub async fn refine_all<S: HeardHistorySource>(
    source: &S,
    matches: &mut RelayMatches,
    delay: Duration,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    let Some(packet_id) = matches.packet_id() else {
        return summary;
    };

    let gateways = matches.ambiguous_gateways();
    info!(
        "Refining {} ambiguous relay(s) for packet {}",
        gateways.len(),
        packet_id
    );

    for (i, gateway) in gateways.into_iter().enumerate() {
        let Some(set) = matches.get(gateway).cloned() else {
            continue;
        };

        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        summary.attempted += 1;
        match refine(source, gateway, &set).await {
            Ok(refined) => {
                if refined.refinement.is_some() {
                    summary.resolved += 1;
                } else {
                    summary.unchanged += 1;
                }
                matches.apply(packet_id, gateway, refined);
            }
            Err(e) => {
                warn!("Relay refinement for {} failed: {:#}", gateway, e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Relay refinement done: {} resolved, {} unchanged, {} failed",
        summary.resolved, summary.unchanged, summary.failed
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// In-memory history source that records the order of calls
    #[derive(Default)]
    struct FakeHistory {
        histories: HashMap<NodeId, HeardHistory>,
        failing: Vec<NodeId>,
        calls: Mutex<Vec<NodeId>>,
        called_at: Mutex<Vec<Instant>>,
    }

    impl HeardHistorySource for FakeHistory {
        async fn heard_history(&self, node_id: NodeId) -> Result<HeardHistory> {
            self.calls.lock().unwrap().push(node_id);
            self.called_at.lock().unwrap().push(Instant::now());
            if self.failing.contains(&node_id) {
                anyhow::bail!("connection refused");
            }
            Ok(self.histories.get(&node_id).cloned().unwrap_or_default())
        }
    }

    fn entry(id: u32, packet_count: u64) -> HeardEntry {
        HeardEntry {
            node_id: NodeId(id),
            packet_count,
        }
    }

    fn set(candidates: &[u32]) -> RelayCandidateSet {
        RelayCandidateSet {
            relay_byte: 0xAB,
            channel: "LongFast".to_string(),
            candidates: candidates.iter().copied().map(NodeId).collect(),
            refinement: None,
        }
    }

    #[test]
    fn test_heard_from_highest_count_wins() {
        let history = HeardHistory {
            heard_from: vec![entry(0x1AB, 4), entry(0x2AB, 19), entry(0x3CD, 500)],
            heard_by: vec![entry(0x1AB, 1000)],
        };
        let refined = apply_history(&set(&[0x1AB, 0x2AB]), &history);
        assert_eq!(refined.candidates, vec![NodeId(0x2AB)]);
        assert_eq!(
            refined.refinement,
            Some(Refinement {
                list: HeardList::HeardFrom,
                packet_count: 19
            })
        );
    }

    #[test]
    fn test_falls_back_to_heard_by() {
        let history = HeardHistory {
            heard_from: vec![entry(0x3CD, 50)],
            heard_by: vec![entry(0x1AB, 7), entry(0x2AB, 3)],
        };
        let refined = apply_history(&set(&[0x1AB, 0x2AB]), &history);
        assert_eq!(refined.resolved(), Some(NodeId(0x1AB)));
        assert_eq!(refined.refinement.map(|r| r.list), Some(HeardList::HeardBy));
    }

    #[test]
    fn test_no_match_leaves_set_unchanged() {
        let history = HeardHistory {
            heard_from: vec![entry(0x3CD, 50)],
            heard_by: vec![],
        };
        let original = set(&[0x1AB, 0x2AB]);
        assert_eq!(apply_history(&original, &history), original);
    }

    #[test]
    fn test_never_introduces_new_candidate() {
        // 0x9AB matches the relay byte but is not a Phase 1 candidate
        let history = HeardHistory {
            heard_from: vec![entry(0x9AB, 1000), entry(0x2AB, 2)],
            heard_by: vec![],
        };
        let refined = apply_history(&set(&[0x1AB, 0x2AB]), &history);
        assert_eq!(refined.candidates, vec![NodeId(0x2AB)]);

        let history = HeardHistory {
            heard_from: vec![entry(0x9AB, 1000)],
            heard_by: vec![entry(0x9AB, 1000)],
        };
        let original = set(&[0x1AB, 0x2AB]);
        assert_eq!(apply_history(&original, &history), original);
    }

    #[test]
    fn test_tie_goes_to_first_entry() {
        let history = HeardHistory {
            heard_from: vec![entry(0x2AB, 5), entry(0x1AB, 5)],
            heard_by: vec![],
        };
        let refined = apply_history(&set(&[0x1AB, 0x2AB]), &history);
        assert_eq!(refined.resolved(), Some(NodeId(0x2AB)));
    }

    #[tokio::test]
    async fn test_refine_skips_unambiguous_sets() {
        let source = FakeHistory::default();
        let single = set(&[0x1AB]);
        let empty = set(&[]);

        assert_eq!(refine(&source, NodeId(0x44), &single).await.unwrap(), single);
        assert_eq!(refine(&source, NodeId(0x44), &empty).await.unwrap(), empty);
        assert!(source.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_refine_propagates_remote_failure() {
        let source = FakeHistory {
            failing: vec![NodeId(0x44)],
            ..Default::default()
        };
        let result =
            tokio_test::block_on(refine(&source, NodeId(0x44), &set(&[0x1AB, 0x2AB])));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_batch_continues_after_failure() {
        let mut histories = HashMap::new();
        histories.insert(
            NodeId(0x55),
            HeardHistory {
                heard_from: vec![entry(0x2AB, 9)],
                heard_by: vec![],
            },
        );
        histories.insert(NodeId(0x66), HeardHistory::default());
        let source = FakeHistory {
            histories,
            failing: vec![NodeId(0x44)],
            ..Default::default()
        };

        let mut matches = RelayMatches::for_packet(7);
        matches.apply(7, NodeId(0x44), set(&[0x1AB, 0x2AB]));
        matches.apply(7, NodeId(0x55), set(&[0x1AB, 0x2AB]));
        matches.apply(7, NodeId(0x66), set(&[0x1AB, 0x2AB]));
        matches.apply(7, NodeId(0x77), set(&[0x1AB]));

        let summary = refine_all(&source, &mut matches, Duration::from_millis(1)).await;
        assert_eq!(
            summary,
            BatchSummary {
                attempted: 3,
                resolved: 1,
                unchanged: 1,
                failed: 1,
            }
        );

        // Sequential, in insertion order, unambiguous gateway never queried
        assert_eq!(
            *source.calls.lock().unwrap(),
            vec![NodeId(0x44), NodeId(0x55), NodeId(0x66)]
        );
        assert_eq!(
            matches.get(NodeId(0x55)).and_then(|s| s.resolved()),
            Some(NodeId(0x2AB))
        );
        assert!(matches.get(NodeId(0x44)).map(|s| s.is_ambiguous()).unwrap_or(false));
        assert!(matches.get(NodeId(0x66)).map(|s| s.is_ambiguous()).unwrap_or(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_waits_between_remote_calls() {
        let source = FakeHistory {
            failing: vec![NodeId(0x55)],
            ..Default::default()
        };
        let mut matches = RelayMatches::for_packet(9);
        for gateway in [0x44, 0x55, 0x66] {
            matches.apply(9, NodeId(gateway), set(&[0x1AB, 0x2AB]));
        }

        let delay = Duration::from_millis(1500);
        let start = Instant::now();
        let summary = refine_all(&source, &mut matches, delay).await;
        assert_eq!(summary.attempted, 3);

        // No wait before the first call; a full delay before each later one,
        // including the call after a failure
        let called_at = source.called_at.lock().unwrap().clone();
        assert_eq!(called_at.len(), 3);
        assert!(called_at[0] - start < delay);
        for pair in called_at.windows(2) {
            assert!(pair[1] - pair[0] >= delay);
        }
        assert!(start.elapsed() >= delay * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_skips_delay_for_single_call() {
        let source = FakeHistory::default();
        let mut matches = RelayMatches::for_packet(9);
        matches.apply(9, NodeId(0x44), set(&[0x1AB, 0x2AB]));
        matches.apply(9, NodeId(0x55), set(&[0x1AB]));

        let start = Instant::now();
        refine_all(&source, &mut matches, Duration::from_secs(60)).await;
        assert_eq!(source.calls.lock().unwrap().len(), 1);
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
