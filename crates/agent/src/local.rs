use crate::events::{AgentEvent, EventStream};
use crate::gateway::{GatewayClient, DEFAULT_CHUNK_SIZE};
use crate::runner::{AgentRunner, RunnerConfig};
use crate::tools::ToolStore;
use anyhow::{Context, Result};
use dma_toolkit_core::{
    AgentBackend, AgentError, ConnectionHandle, Device, Platform, ProgressSink, ThroughputReport,
    Tool,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::PathBuf;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use url::Url;

/// [`AgentBackend`] backed by the agent binary running on this machine.
pub struct LocalAgent {
    runner: AgentRunner,
    tools: ToolStore,
    chunk_size: usize,
}

pub const DEFAULT_TOOLS_BASE: &str = "https://downloads.dma-toolkit.dev/tools";

impl LocalAgent {
    pub fn new(config: RunnerConfig) -> Self {
        let tools = ToolStore::new(config.install_dir.join("tools"), DEFAULT_TOOLS_BASE);
        Self {
            runner: AgentRunner::new(config),
            tools,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_tool_store(mut self, tools: ToolStore) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn runner(&self) -> &AgentRunner {
        &self.runner
    }

    pub fn event_stream(
        handle: &ConnectionHandle,
        event_tx: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<EventStream> {
        let gateway = gateway_for(handle)?;
        Ok(EventStream::new(gateway.events_url()?, event_tx))
    }

    pub async fn shutdown(&self) {
        self.runner.shutdown().await;
    }
}

fn gateway_for(handle: &ConnectionHandle) -> Result<GatewayClient> {
    let url = Url::parse(&handle.endpoint)
        .with_context(|| format!("Invalid agent endpoint {}", handle.endpoint))?;
    Ok(GatewayClient::new(url))
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn map_err<T>(result: Result<T>, wrap: fn(String) -> AgentError) -> Result<T, AgentError> {
    result.map_err(|e| wrap(format!("{e:#}")))
}

impl AgentBackend for LocalAgent {
    fn download_agent(&self, platform: Platform) -> BoxFuture<'_, Result<(), AgentError>> {
        async move {
            map_err(
                self.runner.download(platform).await.map(|_| ()),
                AgentError::DownloadFailed,
            )
        }
        .boxed()
    }

    fn install_agent(&self) -> BoxFuture<'_, Result<(), AgentError>> {
        async move {
            map_err(
                self.runner.install().await.map(|_| ()),
                AgentError::InstallFailed,
            )
        }
        .boxed()
    }

    fn connect_agent(&self) -> BoxFuture<'_, Result<ConnectionHandle, AgentError>> {
        async move {
            let (gateway, version) = map_err(self.runner.start().await, AgentError::ConnectFailed)?;
            Ok(ConnectionHandle {
                endpoint: gateway.base_url().to_string(),
                agent_version: version,
            })
        }
        .boxed()
    }

    fn scan_devices<'a>(
        &'a self,
        handle: &'a ConnectionHandle,
    ) -> BoxFuture<'a, Result<Vec<Device>, AgentError>> {
        async move {
            let result = async { gateway_for(handle)?.devices().await }.await;
            map_err(result, AgentError::ScanFailed)
        }
        .boxed()
    }

    fn flash_firmware<'a>(
        &'a self,
        handle: &'a ConnectionHandle,
        device_id: &'a str,
        firmware: &'a [u8],
        progress: ProgressSink,
    ) -> BoxFuture<'a, Result<(), AgentError>> {
        async move {
            let result = async {
                let digest = sha256_hex(firmware);
                gateway_for(handle)?
                    .flash(device_id, firmware, &digest, self.chunk_size, &progress)
                    .await
            }
            .await;
            map_err(result, AgentError::FlashFailed)
        }
        .boxed()
    }

    fn run_throughput_test<'a>(
        &'a self,
        handle: &'a ConnectionHandle,
        device_id: &'a str,
    ) -> BoxFuture<'a, Result<ThroughputReport, AgentError>> {
        async move {
            let result = async { gateway_for(handle)?.throughput(device_id).await }.await;
            map_err(result, AgentError::TestFailed)
        }
        .boxed()
    }

    fn download_tool(&self, tool: Tool) -> BoxFuture<'_, Result<PathBuf, AgentError>> {
        async move {
            map_err(
                self.tools.download(&tool).await,
                AgentError::ToolDownloadFailed,
            )
        }
        .boxed()
    }
}
