use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use dma_toolkit_core::{LogEntry, LogLevel};
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_SOURCE: &str = "Agent";

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Connected,
    Log(LogEntry),
    Disconnected,
}

/// Follows the agent's `/events` WebSocket and forwards its log records.
pub struct EventStream {
    url: Url,
    event_tx: mpsc::UnboundedSender<AgentEvent>,
}

impl EventStream {
    pub fn new(url: Url, event_tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self { url, event_tx }
    }

    /// Runs until the receiver goes away, reconnecting with capped backoff.
    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);
        let max_backoff = Duration::from_secs(30);

        while !self.event_tx.is_closed() {
            match self.connect_and_listen().await {
                Ok(()) => {
                    info!("Agent event stream closed");
                    backoff = Duration::from_secs(1);
                    sleep(backoff).await;
                }
                Err(e) => {
                    warn!("Agent event stream error: {}. Reconnecting in {:?}", e, backoff);
                    sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, max_backoff);
                }
            }
        }
    }

    pub async fn connect_and_listen(&self) -> Result<()> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, "Agent event stream connected");
        let _ = self.event_tx.send(AgentEvent::Connected);

        let (_write, mut read) = ws_stream.split();

        loop {
            match timeout(Duration::from_secs(60), read.next()).await {
                Ok(Some(Ok(WsMessage::Text(text)))) => match parse_record(text.as_str()) {
                    Ok(entry) => {
                        if self.event_tx.send(AgentEvent::Log(entry)).is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => debug!("Skipping agent event: {}", e),
                },
                Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) => break,
                Ok(Some(Err(e))) => {
                    let _ = self.event_tx.send(AgentEvent::Disconnected);
                    return Err(anyhow!("WebSocket error: {}", e));
                }
                Err(_) => debug!("No agent events for 60s"),
                _ => {}
            }
        }

        let _ = self.event_tx.send(AgentEvent::Disconnected);
        Ok(())
    }
}

/// Decodes one `{timestamp?, level, source?, message}` record.
pub fn parse_record(text: &str) -> Result<LogEntry> {
    let data: Value = serde_json::from_str(text)?;
    let message = data
        .get("message")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("record has no message"))?;
    let level = data
        .get("level")
        .and_then(|v| v.as_str())
        .and_then(LogLevel::parse)
        .unwrap_or(LogLevel::Info);
    let source = data
        .get("source")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SOURCE);

    let mut entry = LogEntry::new(level, source, message);
    if let Some(ts) = data
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    {
        entry = entry.at(ts.with_timezone(&Utc));
    }
    Ok(entry)
}
