//! Node identity and location
//!
//! A Meshtastic radio is identified by a 32-bit node number. Packet headers
//! only have room for the low byte of the relaying node ("relay byte"), so
//! many nodes share the same relay byte.
//!
//! Positions arrive as fixed-point integers (degrees * 10^7). A raw position
//! of 0/0 means the node has not reported a location.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed-point scale for latitude/longitude integers
pub const COORD_SCALE: f64 = 10_000_000.0;

/// Mean Earth radius in miles
const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Mean Earth radius in kilometres
const EARTH_RADIUS_KM: f64 = 6371.0;

/// 32-bit Meshtastic node number
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Low 8 bits of the node number, as carried in packet relay headers
    pub fn relay_byte(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// 8-digit lowercase hex without the `!` prefix
    pub fn hex(self) -> String {
        format!("{:08x}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{:08x}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = anyhow::Error;

    /// Accepts `!1a2b3c4d`, `0x1A2B3C4D`, 8-digit bare hex, or decimal of
    /// any other length
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = if let Some(hex) = s.strip_prefix('!') {
            u32::from_str_radix(hex, 16)
        } else if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16)
        } else if s.len() == 8 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            u32::from_str_radix(s, 16)
        } else {
            s.parse::<u32>()
        };

        parsed
            .map(NodeId)
            .map_err(|e| anyhow::anyhow!("Invalid node id '{}': {}", s, e))
    }
}

/// A reported node location in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    /// Convert raw fixed-point coordinates. Missing values and the 0/0
    /// sentinel both mean "no location".
    pub fn from_fixed(latitude_i: Option<i32>, longitude_i: Option<i32>) -> Option<Self> {
        match (latitude_i, longitude_i) {
            (Some(0), Some(0)) | (None, _) | (_, None) => None,
            (Some(lat), Some(lon)) => Some(Position {
                latitude: lat as f64 / COORD_SCALE,
                longitude: lon as f64 / COORD_SCALE,
            }),
        }
    }

    /// Great-circle distance in miles (Haversine)
    pub fn distance_miles(&self, other: &Position) -> f64 {
        EARTH_RADIUS_MILES * self.central_angle(other)
    }

    /// Great-circle distance in kilometres (Haversine)
    pub fn distance_km(&self, other: &Position) -> f64 {
        EARTH_RADIUS_KM * self.central_angle(other)
    }

    fn central_angle(&self, other: &Position) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// A node directory entry as served by the dashboard API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    #[serde(default)]
    pub long_name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    /// Logical channel name (e.g. "LongFast")
    #[serde(default)]
    pub channel: Option<String>,
    /// Latitude * 10^7
    #[serde(default)]
    pub latitude_i: Option<i32>,
    /// Longitude * 10^7
    #[serde(default)]
    pub longitude_i: Option<i32>,
}

impl Node {
    pub fn position(&self) -> Option<Position> {
        Position::from_fixed(self.latitude_i, self.longitude_i)
    }

    /// Long name, else short name, else `!hex`
    pub fn display_name(&self) -> String {
        self.long_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or_else(|| self.short_name.as_deref().filter(|n| !n.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| self.node_id.to_string())
    }
}
