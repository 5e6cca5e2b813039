//! Lightweight HTTP client for the dashboard API
//!
//! Read-only JSON endpoints:
//!   GET /api/nodes                        node directory
//!   GET /api/traceroute/{request_id}      route observations
//!   GET /api/node/{node_id}/heard         heard-from / heard-by history
//!   GET /api/packet/{packet_id}/gateways  gateways that heard a packet

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

use super::types::{NodesResponse, PacketGateway, PacketGatewaysResponse, TracerouteResponse};
use crate::config::ApiConfig;
use crate::node::{Node, NodeId};
use crate::relay::refine::{HeardHistory, HeardHistorySource};
use crate::route::RouteObservation;

/// HTTP client for the dashboard API
pub struct ApiClient {
    config: ApiConfig,
    http: Client,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        info!("API client created for {}", config.url);

        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.config.url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path);
        debug!("GET {}", url);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to send request to {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("GET {} failed with status {}: {}", url, status, body_text);
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("failed to parse response from {}", url))
    }

    /// Full node directory
    pub async fn nodes(&self) -> Result<Vec<Node>> {
        let resp: NodesResponse = self.get_json("nodes").await?;
        debug!("Fetched {} nodes", resp.nodes.len());
        Ok(resp.nodes)
    }

    /// Every gateway's observation of one traceroute request
    pub async fn route_observations(&self, request_id: u64) -> Result<Vec<RouteObservation>> {
        let resp: TracerouteResponse = self.get_json(&format!("traceroute/{}", request_id)).await?;
        debug!(
            "Fetched {} observations for traceroute {}",
            resp.observations.len(),
            request_id
        );
        Ok(resp.observations)
    }

    /// Gateways that heard a packet, with their relay bytes
    pub async fn packet_gateways(&self, packet_id: u64) -> Result<Vec<PacketGateway>> {
        let resp: PacketGatewaysResponse =
            self.get_json(&format!("packet/{}/gateways", packet_id)).await?;
        Ok(resp.gateways)
    }

    /// Heard-from / heard-by history of one node
    pub async fn heard(&self, node_id: NodeId) -> Result<HeardHistory> {
        self.get_json(&format!("node/{}/heard", node_id.0)).await
    }
}

impl HeardHistorySource for ApiClient {
    async fn heard_history(&self, node_id: NodeId) -> Result<HeardHistory> {
        self.heard(node_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> ApiConfig {
        ApiConfig {
            url: url.to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let client = ApiClient::new(config("http://localhost:8000/")).unwrap();
        assert_eq!(client.endpoint("nodes"), "http://localhost:8000/api/nodes");

        let client = ApiClient::new(config("http://mesh.local")).unwrap();
        assert_eq!(
            client.endpoint("node/287454020/heard"),
            "http://mesh.local/api/node/287454020/heard"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let client = ApiClient::new(ApiConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
        })
        .unwrap();
        assert!(client.nodes().await.is_err());
    }
}
