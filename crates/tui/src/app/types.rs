use dma_toolkit_core::checkup::CheckItem;
use dma_toolkit_core::{
    ActionTicket, AgentError, ConnectionHandle, Device, JobTicket, LogLevel, ThroughputReport,
    ToolTicket,
};
use std::path::PathBuf;

/// Results of spawned agent calls, applied on the UI thread.
#[derive(Debug)]
pub enum AppAsyncEvent {
    SetupActionFinished {
        ticket: ActionTicket,
        outcome: Result<(), AgentError>,
    },
    ConnectFinished {
        ticket: ActionTicket,
        outcome: Result<ConnectionHandle, AgentError>,
    },
    ScanFinished {
        epoch: u64,
        outcome: Result<Vec<Device>, AgentError>,
    },
    FlashFinished {
        ticket: JobTicket,
        outcome: Result<(), AgentError>,
    },
    ThroughputFinished {
        ticket: JobTicket,
        outcome: Result<ThroughputReport, AgentError>,
    },
    ToolDownloadFinished {
        ticket: ToolTicket,
        outcome: Result<PathBuf, AgentError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Devices,
    Firmware,
    Throughput,
    Checkup,
    Tools,
    Logs,
}

impl Page {
    pub const ALL: [Page; 6] = [
        Page::Devices,
        Page::Firmware,
        Page::Throughput,
        Page::Checkup,
        Page::Tools,
        Page::Logs,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Page::Devices => "Device IDs",
            Page::Firmware => "Firmware",
            Page::Throughput => "Throughput",
            Page::Checkup => "System Checkup",
            Page::Tools => "Tools",
            Page::Logs => "Logs",
        }
    }

    pub fn index(self) -> usize {
        Page::ALL.iter().position(|p| *p == self).unwrap_or(0)
    }

    pub fn next(self) -> Self {
        Page::ALL[(self.index() + 1) % Page::ALL.len()]
    }

    pub fn previous(self) -> Self {
        Page::ALL[(self.index() + Page::ALL.len() - 1) % Page::ALL.len()]
    }
}

/// Log viewer state. `level == None` shows every level.
#[derive(Debug, Clone)]
pub struct LogView {
    pub level: Option<LogLevel>,
    pub search: String,
    pub scroll: usize,
    pub follow: bool,
}

impl Default for LogView {
    fn default() -> Self {
        Self {
            level: None,
            search: String::new(),
            scroll: 0,
            follow: true,
        }
    }
}

impl LogView {
    pub fn cycle_level(&mut self) {
        self.level = match self.level {
            None => Some(LogLevel::Info),
            Some(LogLevel::Info) => Some(LogLevel::Warning),
            Some(LogLevel::Warning) => Some(LogLevel::Error),
            Some(LogLevel::Error) => Some(LogLevel::Debug),
            Some(LogLevel::Debug) => None,
        };
        self.scroll = 0;
    }
}

#[derive(Debug, Clone)]
pub struct CheckupReport {
    pub items: Vec<CheckItem>,
    pub ran_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_wrap_around() {
        assert_eq!(Page::Logs.next(), Page::Devices);
        assert_eq!(Page::Devices.previous(), Page::Logs);
    }

    #[test]
    fn level_filter_cycles_back_to_all() {
        let mut view = LogView::default();
        for _ in 0..5 {
            view.cycle_level();
        }
        assert_eq!(view.level, None);
    }
}
