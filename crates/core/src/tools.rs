use crate::error::{AgentError, SessionError, SessionResult};
use crate::log::NotificationLog;
use crate::setup::Resolution;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const LOG_SOURCE: &str = "Tools";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub size: String,
}

impl Tool {
    pub fn new(id: &str, name: &str, description: &str, version: &str, size: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            version: version.to_string(),
            size: size.to_string(),
        }
    }

    pub fn artifact_name(&self) -> String {
        format!("{}-{}.zip", self.id, self.version)
    }
}

pub fn default_catalog() -> Vec<Tool> {
    vec![
        Tool::new("pcileech", "PCILeech", "DMA Attack Toolkit & Library", "v6.0.2", "3.2 MB"),
        Tool::new(
            "pcileech-fpga",
            "PCILeech-FPGA",
            "FPGA firmware for PCIe-based DMA devices",
            "v4.12",
            "8.1 MB",
        ),
        Tool::new("memprocfs", "MemProcFS", "Memory Process File System", "v5.1", "2.7 MB"),
        Tool::new(
            "leechcore",
            "LeechCore",
            "Physical Memory Acquisition Library",
            "v2.3",
            "1.5 MB",
        ),
        Tool::new("memdump", "MemDump", "Memory Forensics Utility", "v1.4", "1.2 MB"),
        Tool::new(
            "dma-drivers",
            "DMA Drivers",
            "Drivers for various DMA hardware devices",
            "v3.0",
            "4.8 MB",
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolState {
    Idle,
    Downloading,
    Downloaded(PathBuf),
    Failed(String),
}

impl ToolState {
    pub fn label(&self) -> &'static str {
        match self {
            ToolState::Idle => "not downloaded",
            ToolState::Downloading => "downloading...",
            ToolState::Downloaded(_) => "downloaded",
            ToolState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolTicket {
    pub epoch: u64,
    pub tool: Tool,
}

#[derive(Debug, Clone)]
pub struct ToolEntry {
    pub tool: Tool,
    pub state: ToolState,
}

/// Download state of each tool. Only `Idle` and `Failed` entries can start a
/// download; results for entries no longer downloading resolve as stale.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    entries: Vec<ToolEntry>,
    epoch: u64,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new(default_catalog())
    }
}

impl ToolCatalog {
    pub fn new(tools: Vec<Tool>) -> Self {
        Self {
            entries: tools
                .into_iter()
                .map(|tool| ToolEntry {
                    tool,
                    state: ToolState::Idle,
                })
                .collect(),
            epoch: 0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolEntry> + '_ {
        self.entries.iter()
    }

    pub fn get_index(&self, idx: usize) -> Option<&ToolEntry> {
        self.entries.get(idx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Matches the id or the display name, ignoring case.
    fn position(&self, query: &str) -> Option<usize> {
        let query = query.trim();
        self.entries.iter().position(|e| {
            e.tool.id.eq_ignore_ascii_case(query) || e.tool.name.eq_ignore_ascii_case(query)
        })
    }

    pub fn find(&self, query: &str) -> Option<&ToolEntry> {
        self.position(query).map(|idx| &self.entries[idx])
    }

    pub fn downloading(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state == ToolState::Downloading)
            .count()
    }

    pub fn downloaded(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.state, ToolState::Downloaded(_)))
            .count()
    }

    pub fn begin(&mut self, query: &str, log: &mut NotificationLog) -> SessionResult<ToolTicket> {
        let idx = self
            .position(query)
            .ok_or_else(|| SessionError::UnknownTool(query.trim().to_string()))?;
        let epoch = self.epoch;
        let entry = &mut self.entries[idx];
        match entry.state {
            ToolState::Downloading => {
                return Err(SessionError::ActionInProgress(entry.tool.name.clone()))
            }
            ToolState::Downloaded(_) => {
                return Err(SessionError::ToolAlreadyDownloaded(entry.tool.name.clone()))
            }
            ToolState::Idle | ToolState::Failed(_) => {}
        }

        entry.state = ToolState::Downloading;
        info!(tool = %entry.tool.id, "tool download started");
        log.info(
            LOG_SOURCE,
            format!("Downloading {} {}", entry.tool.name, entry.tool.version),
        );
        Ok(ToolTicket {
            epoch,
            tool: entry.tool.clone(),
        })
    }

    /// Starts every tool that is neither downloaded nor already downloading.
    pub fn begin_all(&mut self, log: &mut NotificationLog) -> Vec<ToolTicket> {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| matches!(e.state, ToolState::Idle | ToolState::Failed(_)))
            .map(|e| e.tool.id.clone())
            .collect();
        ids.iter()
            .filter_map(|id| self.begin(id, log).ok())
            .collect()
    }

    pub fn finish(
        &mut self,
        ticket: &ToolTicket,
        outcome: Result<PathBuf, AgentError>,
        log: &mut NotificationLog,
    ) -> SessionResult<Resolution> {
        if ticket.epoch != self.epoch {
            debug!(tool = %ticket.tool.id, "discarding stale tool download");
            return Ok(Resolution::Stale);
        }
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.tool.id == ticket.tool.id && e.state == ToolState::Downloading)
        else {
            return Ok(Resolution::Stale);
        };

        match outcome {
            Ok(path) => {
                info!(tool = %entry.tool.id, path = %path.display(), "tool downloaded");
                log.info(
                    LOG_SOURCE,
                    format!("{} saved to {}", entry.tool.name, path.display()),
                );
                entry.state = ToolState::Downloaded(path);
                Ok(Resolution::Applied)
            }
            Err(e) => {
                warn!(tool = %entry.tool.id, error = %e, "tool download failed");
                log.error(LOG_SOURCE, format!("{}: {}", entry.tool.name, e));
                entry.state = ToolState::Failed(e.detail().to_string());
                Err(e.into())
            }
        }
    }

    /// Returns in-flight downloads to `Idle`; their results become stale.
    pub fn abort_pending(&mut self) -> usize {
        self.epoch += 1;
        let mut aborted = 0;
        for entry in &mut self.entries {
            if entry.state == ToolState::Downloading {
                entry.state = ToolState::Idle;
                aborted += 1;
            }
        }
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved(id: &str) -> PathBuf {
        PathBuf::from(format!("/opt/dma-toolkit/tools/{id}.zip"))
    }

    #[test]
    fn catalog_lists_the_six_tools() {
        let catalog = ToolCatalog::default();
        assert_eq!(catalog.len(), 6);
        assert!(catalog.iter().all(|e| e.state == ToolState::Idle));
        assert_eq!(
            catalog.find("memprocfs").map(|e| e.tool.name.as_str()),
            Some("MemProcFS")
        );
        assert_eq!(
            catalog.find("DMA Drivers").map(|e| e.tool.id.as_str()),
            Some("dma-drivers")
        );
    }

    #[test]
    fn download_moves_through_each_state() {
        let mut catalog = ToolCatalog::default();
        let mut log = NotificationLog::default();

        let ticket = catalog.begin("pcileech", &mut log).expect("begin");
        assert_eq!(
            catalog.find("pcileech").map(|e| e.state.clone()),
            Some(ToolState::Downloading)
        );
        assert!(matches!(
            catalog.begin("PCILeech", &mut log),
            Err(SessionError::ActionInProgress(_))
        ));

        assert_eq!(
            catalog.finish(&ticket, Ok(saved("pcileech")), &mut log),
            Ok(Resolution::Applied)
        );
        assert_eq!(
            catalog.find("pcileech").map(|e| e.state.clone()),
            Some(ToolState::Downloaded(saved("pcileech")))
        );
        assert_eq!(
            catalog.begin("pcileech", &mut log),
            Err(SessionError::ToolAlreadyDownloaded("PCILeech".to_string()))
        );
        assert!(log.iter().all(|e| e.source == "Tools"));
    }

    #[test]
    fn failed_download_can_be_retried() {
        let mut catalog = ToolCatalog::default();
        let mut log = NotificationLog::default();
        let ticket = catalog.begin("memdump", &mut log).expect("begin");

        let result = catalog.finish(
            &ticket,
            Err(AgentError::ToolDownloadFailed("HTTP 503".into())),
            &mut log,
        );
        assert!(matches!(
            result,
            Err(SessionError::Agent(AgentError::ToolDownloadFailed(_)))
        ));
        assert_eq!(
            catalog.find("memdump").map(|e| e.state.clone()),
            Some(ToolState::Failed("HTTP 503".to_string()))
        );

        catalog.begin("memdump", &mut log).expect("retry");
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let mut catalog = ToolCatalog::default();
        let mut log = NotificationLog::default();
        assert_eq!(
            catalog.begin("winpmem", &mut log),
            Err(SessionError::UnknownTool("winpmem".to_string()))
        );
        assert!(log.is_empty());
    }

    #[test]
    fn download_all_skips_finished_and_running_tools() {
        let mut catalog = ToolCatalog::default();
        let mut log = NotificationLog::default();
        let done = catalog.begin("leechcore", &mut log).expect("begin");
        catalog
            .finish(&done, Ok(saved("leechcore")), &mut log)
            .expect("finish");
        catalog.begin("memdump", &mut log).expect("begin");

        let tickets = catalog.begin_all(&mut log);
        assert_eq!(tickets.len(), 4);
        assert!(tickets
            .iter()
            .all(|t| t.tool.id != "leechcore" && t.tool.id != "memdump"));
        assert_eq!(catalog.downloading(), 5);
        assert!(catalog.begin_all(&mut log).is_empty());
    }

    #[test]
    fn aborted_downloads_resolve_as_stale() {
        let mut catalog = ToolCatalog::default();
        let mut log = NotificationLog::default();
        let ticket = catalog.begin("memprocfs", &mut log).expect("begin");

        assert_eq!(catalog.abort_pending(), 1);
        assert_eq!(
            catalog.finish(&ticket, Ok(saved("memprocfs")), &mut log),
            Ok(Resolution::Stale)
        );
        assert_eq!(
            catalog.find("memprocfs").map(|e| e.state.clone()),
            Some(ToolState::Idle)
        );
        catalog.begin("memprocfs", &mut log).expect("restart");
    }
}
