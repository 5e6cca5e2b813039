//! Traceroute payload decoding
//!
//! A traceroute response carries a `RouteDiscovery` message in protobuf wire
//! format. We only need a handful of its fields, so the message loop is
//! written here and the varint and field-skipping primitives come from
//! `prost::encoding`:
//!
//!   field 1: route        (repeated fixed32, wire type 5, LE node numbers)
//!   field 2: snr_towards  (repeated int32 varint, dB * 4)
//!   field 3: route_back   (repeated fixed32, wire type 5)
//!   field 4: snr_back     (repeated int32 varint, dB * 4)
//!
//! Field headers are a single byte: field number in the upper 5 bits,
//! wire type in the lower 3. Partial payloads are common in the field, so
//! decoding never fails: a truncated field ends the scan and everything
//! read so far is returned.

pub mod encoder;
pub mod group;

use bytes::Buf;
use chrono::{DateTime, Utc};
use prost::encoding::{decode_varint, skip_field, DecodeContext, WireType};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::node::NodeId;

/// Decoded traceroute payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteDiscovery {
    /// Intermediate hops towards the destination
    pub route: Vec<NodeId>,
    /// Per-hop SNR towards the destination (dB * 4)
    pub snr_towards: Vec<i32>,
    /// Intermediate hops on the way back
    pub route_back: Vec<NodeId>,
    /// Per-hop SNR on the way back (dB * 4)
    pub snr_back: Vec<i32>,
}

impl RouteDiscovery {
    /// Decode from raw bytes. Never fails; see module docs.
    pub fn decode(data: &[u8]) -> Self {
        let mut discovery = RouteDiscovery::default();
        let mut buf = data;

        while buf.has_remaining() {
            let header = buf.get_u8();
            let field = header >> 3;
            let wire_type = match WireType::try_from(u64::from(header & 0x07)) {
                Ok(wt) => wt,
                Err(_) => break,
            };

            let complete = match (field, wire_type) {
                (1, WireType::ThirtyTwoBit) => read_fixed32(&mut buf, &mut discovery.route),
                (3, WireType::ThirtyTwoBit) => read_fixed32(&mut buf, &mut discovery.route_back),
                (2, WireType::Varint) => read_snr(&mut buf, &mut discovery.snr_towards),
                (4, WireType::Varint) => read_snr(&mut buf, &mut discovery.snr_back),
                (2, WireType::LengthDelimited) => {
                    read_packed_snr(&mut buf, &mut discovery.snr_towards)
                }
                (4, WireType::LengthDelimited) => {
                    read_packed_snr(&mut buf, &mut discovery.snr_back)
                }
                (_, wt) => {
                    skip_field(wt, u32::from(field), &mut buf, DecodeContext::default()).is_ok()
                }
            };

            if !complete {
                break;
            }
        }

        discovery
    }

    /// Decode from a hex string (whitespace-trimmed, valid prefix only)
    pub fn decode_hex(input: &str) -> Self {
        Self::decode(&hex_to_bytes(input))
    }

    /// SNR towards the destination in dB
    pub fn snr_towards_db(&self) -> Vec<f32> {
        self.snr_towards.iter().map(|v| *v as f32 / 4.0).collect()
    }

    /// SNR on the way back in dB
    pub fn snr_back_db(&self) -> Vec<f32> {
        self.snr_back.iter().map(|v| *v as f32 / 4.0).collect()
    }
}

impl fmt::Display for RouteDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route=[{}]", join_ids(&self.route))?;
        if !self.snr_towards.is_empty() {
            write!(f, " snr={:?}", self.snr_towards_db())?;
        }
        if !self.route_back.is_empty() {
            write!(f, " back=[{}]", join_ids(&self.route_back))?;
        }
        if !self.snr_back.is_empty() {
            write!(f, " snr_back={:?}", self.snr_back_db())?;
        }
        Ok(())
    }
}

/// Decode the forward hop list (field 1) from a hex payload.
///
/// Empty input yields an empty route.
pub fn decode_route_hex(input: &str) -> Vec<NodeId> {
    RouteDiscovery::decode_hex(input).route
}

/// Decode the forward hop list (field 1) from raw bytes
pub fn decode_route(data: &[u8]) -> Vec<NodeId> {
    RouteDiscovery::decode(data).route
}

/// Hex string to bytes, stopping at the first odd nibble or invalid pair
pub fn hex_to_bytes(input: &str) -> Vec<u8> {
    let trimmed = input.trim();
    let mut bytes = Vec::with_capacity(trimmed.len() / 2);

    for pair in trimmed.as_bytes().chunks_exact(2) {
        let mut byte = [0u8; 1];
        if hex::decode_to_slice(pair, &mut byte).is_err() {
            break;
        }
        bytes.push(byte[0]);
    }

    bytes
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn read_fixed32(buf: &mut &[u8], out: &mut Vec<NodeId>) -> bool {
    if buf.remaining() < 4 {
        return false;
    }
    out.push(NodeId(buf.get_u32_le()));
    true
}

fn read_snr(buf: &mut &[u8], out: &mut Vec<i32>) -> bool {
    match decode_varint(buf) {
        Ok(value) => {
            // int32 negatives are sign-extended to 64 bits on the wire
            out.push(value as i32);
            true
        }
        Err(_) => false,
    }
}

fn read_packed_snr(buf: &mut &[u8], out: &mut Vec<i32>) -> bool {
    let Ok(len) = decode_varint(buf) else {
        return false;
    };
    let len = len as usize;
    if buf.remaining() < len {
        return false;
    }

    let data: &[u8] = *buf;
    let mut packed = &data[..len];
    buf.advance(len);

    while packed.has_remaining() {
        if !read_snr(&mut packed, out) {
            break;
        }
    }
    true
}

/// One gateway's report of a traceroute response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteObservation {
    /// Gateway that heard and reported the response
    pub gateway_id: NodeId,
    /// Pre-decoded hop list, when the API supplies one
    #[serde(default)]
    pub route: Option<Vec<NodeId>>,
    /// Raw `RouteDiscovery` payload (hex)
    #[serde(default, rename = "payload")]
    pub payload_hex: Option<String>,
    /// Whether the trace reached its declared destination
    #[serde(default)]
    pub done: bool,
    /// When the gateway reported it; missing on some older imports
    #[serde(default, alias = "import_time")]
    pub observed_at: Option<DateTime<Utc>>,
}

impl RouteObservation {
    /// Hop list: pre-decoded route first, else decoded payload.
    /// `None` when the observation carries neither.
    pub fn hops(&self) -> Option<Vec<NodeId>> {
        if let Some(route) = &self.route {
            return Some(route.clone());
        }
        self.payload_hex.as_deref().map(decode_route_hex)
    }
}

/// Whether a traceroute request has any usable route data
pub fn has_route_data(observations: &[RouteObservation]) -> bool {
    observations.iter().any(|obs| obs.hops().is_some())
}
