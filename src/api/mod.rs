//! Dashboard API client
//!
//! The engine owns no state of its own: the node directory, traceroute
//! observations and heard histories all come from the dashboard backend
//! over HTTP. This module is only built with the `remote` feature.

pub mod client;
pub mod types;

pub use client::ApiClient;
