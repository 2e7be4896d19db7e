use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

use crate::error::SessionError;

pub const MAX_FIRMWARE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceStatus {
    Available,
    InUse,
    Error,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceStatus::Available => "available",
            DeviceStatus::InUse => "in use",
            DeviceStatus::Error => "in error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub vendor_id: String,
    pub device_id: String,
    pub firmware_version: String,
    pub status: DeviceStatus,
}

impl Device {
    /// `vendor:device` pair as shown by the ID page, e.g. `0x0403:0x601f`.
    pub fn pci_id(&self) -> String {
        format!("{}:{}", self.vendor_id, self.device_id)
    }

    pub fn display_name(&self) -> String {
        format!("{} ({})", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub const ALL: [LogLevel; 4] = [
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Debug,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

impl LogEntry {
    /// Creates an unnumbered entry; the log assigns the id on append.
    pub fn new(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            level,
            source: source.into(),
            message: message.into(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn format_line(&self) -> String {
        format!(
            "{} [{}] {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.source,
            self.message
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputReport {
    #[serde(rename = "readMBps")]
    pub read_mbps: f64,
    #[serde(rename = "writeMBps")]
    pub write_mbps: f64,
    #[serde(rename = "latencyMs")]
    pub latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputRecord {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub report: ThroughputReport,
}

/// Proof of a live agent connection, required by every device operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub endpoint: String,
    pub agent_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Windows, Platform::MacOs, Platform::Linux];

    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::MacOs => "macos",
            Platform::Linux => "linux",
        }
    }

    pub fn executable_suffix(self) -> &'static str {
        match self {
            Platform::Windows => ".exe",
            Platform::MacOs | Platform::Linux => "",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Platform::Windows => Platform::MacOs,
            Platform::MacOs => Platform::Linux,
            Platform::Linux => Platform::Windows,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Linux => "Linux",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    pub name: String,
    pub bytes: Vec<u8>,
    pub sha256: [u8; 32],
}

impl FirmwareImage {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, SessionError> {
        let name = name.into();
        if bytes.is_empty() {
            return Err(SessionError::InvalidFirmware(format!("{name} is empty")));
        }
        if bytes.len() > MAX_FIRMWARE_BYTES {
            return Err(SessionError::InvalidFirmware(format!(
                "{name} is {} bytes, limit is {MAX_FIRMWARE_BYTES}",
                bytes.len()
            )));
        }
        let mut sha256 = [0u8; 32];
        sha256.copy_from_slice(&Sha256::digest(&bytes));
        Ok(Self {
            name,
            bytes,
            sha256,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, SessionError> {
        let bytes = std::fs::read(path)
            .map_err(|e| SessionError::InvalidFirmware(format!("{}: {e}", path.display())))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::new(name, bytes)
    }

    pub fn sha256_hex(&self) -> String {
        self.sha256.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_uses_agent_wire_names() {
        let json = serde_json::json!({
            "id": "ftdi-1234-5678",
            "type": "FTDI FT601",
            "vendorId": "0x0403",
            "deviceId": "0x601f",
            "firmwareVersion": "1.2.3",
            "status": "in-use"
        });
        let device: Device = serde_json::from_value(json).expect("device json");
        assert_eq!(device.kind, "FTDI FT601");
        assert_eq!(device.status, DeviceStatus::InUse);
        assert_eq!(device.pci_id(), "0x0403:0x601f");
    }

    #[test]
    fn empty_firmware_is_rejected() {
        assert!(matches!(
            FirmwareImage::new("fw.bin", Vec::new()),
            Err(SessionError::InvalidFirmware(_))
        ));
    }

    #[test]
    fn firmware_digest_is_sha256() {
        let image = FirmwareImage::new("fw.bin", b"abc".to_vec()).expect("image");
        assert_eq!(
            image.sha256_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn log_level_parses_common_spellings() {
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("all"), None);
    }
}
