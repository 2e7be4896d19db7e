use crate::error::{SessionError, SessionResult};
use crate::log::NotificationLog;
use crate::types::{Device, DeviceStatus};
use std::collections::HashSet;

const LOG_SOURCE: &str = "Device";

/// Latest device scan snapshot. Each scan is authoritative and total.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole device set. A snapshot with a repeated id is
    /// rejected and the previous snapshot stays in place.
    pub fn replace_snapshot(
        &mut self,
        devices: Vec<Device>,
        log: &mut NotificationLog,
    ) -> SessionResult<usize> {
        let mut seen = HashSet::with_capacity(devices.len());
        for device in &devices {
            if !seen.insert(device.id.as_str()) {
                return Err(SessionError::DuplicateDeviceId(device.id.clone()));
            }
        }

        let count = devices.len();
        self.devices = devices;
        log.info(
            LOG_SOURCE,
            format!(
                "Device scan complete: {count} device{} found",
                if count == 1 { "" } else { "s" }
            ),
        );
        tracing::info!(count, "device snapshot replaced");
        Ok(count)
    }

    pub fn get(&self, id: &str) -> SessionResult<&Device> {
        self.devices
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub fn set_status(&mut self, id: &str, status: DeviceStatus) -> SessionResult<()> {
        let device = self
            .devices
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        device.status = status;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> + '_ {
        self.devices.iter()
    }

    pub fn get_index(&self, idx: usize) -> Option<&Device> {
        self.devices.get(idx)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> Device {
        Device {
            id: id.to_string(),
            kind: "FTDI FT601".to_string(),
            vendor_id: "0x0403".to_string(),
            device_id: "0x601f".to_string(),
            firmware_version: "1.2.3".to_string(),
            status: DeviceStatus::Available,
        }
    }

    #[test]
    fn duplicate_ids_leave_empty_registry_unchanged() {
        let mut registry = DeviceRegistry::new();
        let mut log = NotificationLog::default();

        let err = registry
            .replace_snapshot(vec![device("a"), device("a")], &mut log)
            .expect_err("duplicate ids");
        assert_eq!(err, SessionError::DuplicateDeviceId("a".to_string()));
        assert!(registry.is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn duplicate_ids_keep_previous_snapshot() {
        let mut registry = DeviceRegistry::new();
        let mut log = NotificationLog::default();
        registry
            .replace_snapshot(vec![device("ftdi-1234-5678")], &mut log)
            .expect("first scan");

        assert!(registry
            .replace_snapshot(vec![device("b"), device("c"), device("b")], &mut log)
            .is_err());
        assert_eq!(registry.len(), 1);
        assert!(registry.get("ftdi-1234-5678").is_ok());
    }

    #[test]
    fn snapshot_replaces_wholesale_and_logs_count() {
        let mut registry = DeviceRegistry::new();
        let mut log = NotificationLog::default();
        registry
            .replace_snapshot(vec![device("a"), device("b")], &mut log)
            .expect("first scan");
        registry
            .replace_snapshot(vec![device("c")], &mut log)
            .expect("second scan");

        assert_eq!(registry.len(), 1);
        assert!(matches!(registry.get("a"), Err(SessionError::NotFound(_))));
        assert_eq!(
            log.latest().map(|e| e.message.as_str()),
            Some("Device scan complete: 1 device found")
        );
    }

    #[test]
    fn set_status_updates_in_place() {
        let mut registry = DeviceRegistry::new();
        let mut log = NotificationLog::default();
        registry
            .replace_snapshot(vec![device("a")], &mut log)
            .expect("scan");

        registry.set_status("a", DeviceStatus::InUse).expect("status");
        assert_eq!(registry.get("a").map(|d| d.status), Ok(DeviceStatus::InUse));
        assert_eq!(
            registry.set_status("missing", DeviceStatus::Error),
            Err(SessionError::NotFound("missing".to_string()))
        );
    }
}
