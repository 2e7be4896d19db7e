use crate::retry::with_retry;
use anyhow::{anyhow, Result};
use dma_toolkit_core::{Device, ProgressSink, ThroughputReport};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// HTTP client for the agent's local API.
#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    base_url: Url,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub version: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashBeginRequest {
    pub size: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashBeginResponse {
    pub session: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DevicesResponse {
    devices: Vec<Device>,
}

impl GatewayClient {
    pub fn new(base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("dma-toolkit/0.2")
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { http, base_url }
    }

    pub fn for_port(port: u16) -> Result<Self> {
        let base_url = Url::parse(&format!("http://127.0.0.1:{port}/"))?;
        Ok(Self::new(base_url))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn events_url(&self) -> Result<Url> {
        let mut url = self.endpoint(&["events"])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("Cannot derive websocket url from {}", self.base_url))?;
        Ok(url)
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Agent endpoint {} cannot take a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.endpoint(&["health"])?;
        let response = self.http.get(url).send().await?.error_for_status()?;
        let health: HealthResponse = response.json().await?;
        debug!(version = %health.version, "agent health ok");
        Ok(health)
    }

    pub async fn devices(&self) -> Result<Vec<Device>> {
        let url = self.endpoint(&["devices"])?;
        with_retry(|| {
            let url = url.clone();
            async move {
                let response = self.http.get(url).send().await?.error_for_status()?;
                let body: DevicesResponse = response.json().await?;
                Ok(body.devices)
            }
        })
        .await
    }

    /// Streams `firmware` to the agent in `chunk_size` pieces, then commits it
    /// with its SHA-256 digest. Requests are sent exactly once.
    pub async fn flash(
        &self,
        device_id: &str,
        firmware: &[u8],
        sha256_hex: &str,
        chunk_size: usize,
        progress: &ProgressSink,
    ) -> Result<()> {
        let chunk_size = chunk_size.max(1);
        let begin_url = self.endpoint(&["devices", path_segment(device_id)?, "firmware"])?;
        let response = self
            .http
            .post(begin_url)
            .json(&FlashBeginRequest {
                size: firmware.len(),
                sha256: sha256_hex.to_string(),
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("Flash rejected: {}", response.status()));
        }
        let FlashBeginResponse { session } = response.json().await?;
        info!(device = device_id, %session, bytes = firmware.len(), "firmware transfer started");

        let mut offset = 0;
        for chunk in firmware.chunks(chunk_size) {
            let mut url = self.endpoint(&["firmware", path_segment(&session)?, "chunk"])?;
            url.query_pairs_mut()
                .append_pair("offset", &offset.to_string());
            let response = self
                .http
                .put(url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(chunk.to_vec())
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(anyhow!(
                    "Chunk at offset {offset} rejected: {}",
                    response.status()
                ));
            }
            offset += chunk.len();
            // The last percent is reserved for the commit.
            progress.update_ratio(offset * 99, firmware.len() * 100);
        }

        let commit_url = self.endpoint(&["firmware", path_segment(&session)?, "commit"])?;
        let response = self.http.post(commit_url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Commit failed: {status} {body}"));
        }
        progress.update(100);
        info!(device = device_id, "firmware committed");
        Ok(())
    }

    pub async fn throughput(&self, device_id: &str) -> Result<ThroughputReport> {
        let url = self.endpoint(&["devices", path_segment(device_id)?, "throughput"])?;
        let response = self.http.post(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Throughput test failed: {}", response.status()));
        }
        Ok(response.json().await?)
    }
}

// Dot segments are dropped rather than encoded when a path is built.
fn path_segment(value: &str) -> Result<&str> {
    match value {
        "" | "." | ".." => Err(anyhow!("Invalid identifier: {value:?}")),
        _ => Ok(value),
    }
}
