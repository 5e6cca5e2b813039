//! Response envelopes of the dashboard API

use serde::{Deserialize, Serialize};

use crate::node::{Node, NodeId};
use crate::route::RouteObservation;

/// `GET /api/nodes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesResponse {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// `GET /api/traceroute/{request_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerouteResponse {
    #[serde(default)]
    pub observations: Vec<RouteObservation>,
}

/// One gateway's reception of a packet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketGateway {
    pub gateway_id: NodeId,
    /// Low byte of the last relaying node, if the header carried one
    #[serde(default)]
    pub relay_node: Option<u8>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub rssi: Option<f64>,
    #[serde(default)]
    pub snr: Option<f64>,
    /// Hops remaining when the gateway heard it
    #[serde(default)]
    pub hop_limit: Option<u8>,
}

impl PacketGateway {
    /// A relay byte of 0 means the gateway heard the packet directly
    pub fn relay_byte(&self) -> Option<u8> {
        self.relay_node.filter(|b| *b != 0)
    }

    /// Reception quality as `rssi -97 dBm, snr 4.5 dB, hop_limit 3`,
    /// skipping what the gateway did not report
    pub fn signal_summary(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(rssi) = self.rssi {
            parts.push(format!("rssi {:.0} dBm", rssi));
        }
        if let Some(snr) = self.snr {
            parts.push(format!("snr {:.1} dB", snr));
        }
        if let Some(hop_limit) = self.hop_limit {
            parts.push(format!("hop_limit {}", hop_limit));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// `GET /api/packet/{packet_id}/gateways`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketGatewaysResponse {
    #[serde(default)]
    pub gateways: Vec<PacketGateway>,
}
