use crate::link::AgentStatus;
use crate::session::Session;
use crate::types::{DeviceStatus, LogLevel};
use std::fmt;

/// How many of the most recent log entries the error check looks at.
const RECENT_LOG_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Warning,
    Failed,
    Skipped,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Passed => "ok",
            CheckStatus::Warning => "warn",
            CheckStatus::Failed => "fail",
            CheckStatus::Skipped => "skip",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckItem {
    pub id: &'static str,
    pub name: &'static str,
    pub status: CheckStatus,
    pub details: String,
}

impl CheckItem {
    fn new(id: &'static str, name: &'static str, status: CheckStatus, details: String) -> Self {
        Self {
            id,
            name,
            status,
            details,
        }
    }
}

/// Evaluates the session and reports one item per check, in display order.
pub fn run_checkup(session: &Session) -> Vec<CheckItem> {
    let mut items = Vec::with_capacity(5);

    let link = session.setup.link();
    let agent = match (link.status(), session.connection()) {
        (AgentStatus::Connected, Some(handle)) => CheckItem::new(
            "agent",
            "DMA Agent Connection",
            CheckStatus::Passed,
            format!("Agent is running and connected (v{})", handle.agent_version),
        ),
        (AgentStatus::Error, _) => CheckItem::new(
            "agent",
            "DMA Agent Connection",
            CheckStatus::Failed,
            link.last_error().unwrap_or("agent reported an error").to_string(),
        ),
        (status, _) => CheckItem::new(
            "agent",
            "DMA Agent Connection",
            CheckStatus::Failed,
            format!("Agent is {status}; finish setup to connect"),
        ),
    };
    let connected = agent.status == CheckStatus::Passed;
    items.push(agent);

    if !connected {
        for (id, name) in [
            ("device", "DMA Device Detection"),
            ("health", "Device Health"),
            ("firmware", "Firmware Version"),
        ] {
            items.push(CheckItem::new(
                id,
                name,
                CheckStatus::Skipped,
                "Requires an agent connection".to_string(),
            ));
        }
    } else {
        let count = session.devices.len();
        items.push(if count == 0 {
            CheckItem::new(
                "device",
                "DMA Device Detection",
                CheckStatus::Warning,
                "No DMA devices found; run a scan".to_string(),
            )
        } else {
            let names: Vec<&str> = session.devices.iter().map(|d| d.kind.as_str()).collect();
            CheckItem::new(
                "device",
                "DMA Device Detection",
                CheckStatus::Passed,
                format!("Found {count} DMA device(s) ({})", names.join(", ")),
            )
        });

        let errored: Vec<&str> = session
            .devices
            .iter()
            .filter(|d| d.status == DeviceStatus::Error)
            .map(|d| d.id.as_str())
            .collect();
        items.push(if errored.is_empty() {
            CheckItem::new(
                "health",
                "Device Health",
                CheckStatus::Passed,
                "No devices report errors".to_string(),
            )
        } else {
            CheckItem::new(
                "health",
                "Device Health",
                CheckStatus::Failed,
                format!("Devices in error: {}", errored.join(", ")),
            )
        });

        let unknown: Vec<&str> = session
            .devices
            .iter()
            .filter(|d| d.firmware_version.trim().is_empty() || d.firmware_version == "unknown")
            .map(|d| d.id.as_str())
            .collect();
        items.push(if unknown.is_empty() {
            CheckItem::new(
                "firmware",
                "Firmware Version",
                CheckStatus::Passed,
                "All devices report a firmware version".to_string(),
            )
        } else {
            CheckItem::new(
                "firmware",
                "Firmware Version",
                CheckStatus::Warning,
                format!("Unknown firmware on: {}", unknown.join(", ")),
            )
        });
    }

    let recent_errors = session
        .log
        .iter()
        .rev()
        .take(RECENT_LOG_WINDOW)
        .filter(|e| e.level == LogLevel::Error)
        .count();
    items.push(if recent_errors == 0 {
        CheckItem::new(
            "logs",
            "Recent Errors",
            CheckStatus::Passed,
            "No errors in recent activity".to_string(),
        )
    } else {
        CheckItem::new(
            "logs",
            "Recent Errors",
            CheckStatus::Warning,
            format!("{recent_errors} error(s) in the last {RECENT_LOG_WINDOW} log entries"),
        )
    });

    items
}
