use crate::error::AgentError;
use crate::tools::Tool;
use crate::types::{ConnectionHandle, Device, Platform, ThroughputReport};
use futures::future::BoxFuture;
use std::path::PathBuf;
use tokio::sync::watch;

pub trait AgentBackend: Send + Sync {
    fn download_agent(&self, platform: Platform) -> BoxFuture<'_, Result<(), AgentError>>;

    fn install_agent(&self) -> BoxFuture<'_, Result<(), AgentError>>;

    fn connect_agent(&self) -> BoxFuture<'_, Result<ConnectionHandle, AgentError>>;

    fn scan_devices<'a>(
        &'a self,
        handle: &'a ConnectionHandle,
    ) -> BoxFuture<'a, Result<Vec<Device>, AgentError>>;

    // Never retried automatically.
    fn flash_firmware<'a>(
        &'a self,
        handle: &'a ConnectionHandle,
        device_id: &'a str,
        firmware: &'a [u8],
        progress: ProgressSink,
    ) -> BoxFuture<'a, Result<(), AgentError>>;

    fn run_throughput_test<'a>(
        &'a self,
        handle: &'a ConnectionHandle,
        device_id: &'a str,
    ) -> BoxFuture<'a, Result<ThroughputReport, AgentError>>;

    fn download_tool(&self, tool: Tool) -> BoxFuture<'_, Result<PathBuf, AgentError>>;
}

/// Clamped to 0-100 and monotonic. Updates after the watcher is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: watch::Sender<u8>,
}

#[derive(Debug)]
pub struct ProgressWatch {
    rx: watch::Receiver<u8>,
}

pub fn progress_channel() -> (ProgressSink, ProgressWatch) {
    let (tx, rx) = watch::channel(0);
    (ProgressSink { tx }, ProgressWatch { rx })
}

impl ProgressSink {
    pub fn update(&self, percent: u8) {
        let percent = percent.min(100);
        self.tx.send_if_modified(|current| {
            if percent > *current {
                *current = percent;
                true
            } else {
                false
            }
        });
    }

    pub fn update_ratio(&self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let percent = (done.min(total) as u128 * 100 / total as u128) as u8;
        self.update(percent);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl ProgressWatch {
    pub fn percent(&self) -> u8 {
        *self.rx.borrow()
    }
}
