//! Traceroute payload encoder
//!
//! Builds `RouteDiscovery` payloads in the same single-byte-header wire
//! format the decoder reads. Used to synthesize traceroute scenarios
//! (see the `trace-sim` binary) and in tests.
//!
//! Layout, per entry:
//!   route       0x0d | node(4,LE)
//!   snr_towards 0x10 | varint(snr * 4)
//!   route_back  0x1d | node(4,LE)
//!   snr_back    0x20 | varint(snr * 4)

use bytes::{BufMut, BytesMut};
use prost::encoding::encode_varint;

use crate::node::NodeId;

const ROUTE_HEADER: u8 = (1 << 3) | 5;
const SNR_TOWARDS_HEADER: u8 = 2 << 3;
const ROUTE_BACK_HEADER: u8 = (3 << 3) | 5;
const SNR_BACK_HEADER: u8 = 4 << 3;

/// Parameters for building a `RouteDiscovery` payload
#[derive(Debug, Clone, Default)]
pub struct RouteBuilder {
    /// Hops towards the destination
    pub route: Vec<NodeId>,
    /// SNR per hop towards the destination (dB * 4)
    pub snr_towards: Vec<i32>,
    /// Hops on the way back
    pub route_back: Vec<NodeId>,
    /// SNR per hop on the way back (dB * 4)
    pub snr_back: Vec<i32>,
}

impl RouteBuilder {
    /// Builder for a forward-only route
    pub fn new(route: Vec<NodeId>) -> Self {
        Self {
            route,
            ..Default::default()
        }
    }

    pub fn with_snr_towards(mut self, snr: Vec<i32>) -> Self {
        self.snr_towards = snr;
        self
    }

    pub fn with_route_back(mut self, route_back: Vec<NodeId>) -> Self {
        self.route_back = route_back;
        self
    }

    /// Build the raw payload bytes
    pub fn build(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(
            5 * (self.route.len() + self.route_back.len())
                + 2 * (self.snr_towards.len() + self.snr_back.len()),
        );

        for hop in &self.route {
            buf.put_u8(ROUTE_HEADER);
            buf.put_u32_le(hop.0);
        }
        for snr in &self.snr_towards {
            buf.put_u8(SNR_TOWARDS_HEADER);
            encode_varint(*snr as i64 as u64, &mut buf);
        }
        for hop in &self.route_back {
            buf.put_u8(ROUTE_BACK_HEADER);
            buf.put_u32_le(hop.0);
        }
        for snr in &self.snr_back {
            buf.put_u8(SNR_BACK_HEADER);
            encode_varint(*snr as i64 as u64, &mut buf);
        }

        buf.to_vec()
    }

    /// Build the payload as lowercase hex, as served by the dashboard API
    pub fn build_hex(&self) -> String {
        hex::encode(self.build())
    }
}
