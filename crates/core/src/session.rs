//! Process-wide session state shared by every page: onboarding, the device
//! snapshot, the notification log and the jobs running against devices.

use crate::backend::{progress_channel, ProgressSink, ProgressWatch};
use crate::error::{AgentError, SessionError, SessionResult};
use crate::log::NotificationLog;
use crate::registry::DeviceRegistry;
use crate::setup::{ActionTicket, Resolution, SetupController, SetupStep};
use crate::tasks::SessionTasks;
use crate::tools::{ToolCatalog, ToolTicket};
use crate::types::{
    ConnectionHandle, Device, DeviceStatus, FirmwareImage, ThroughputRecord, ThroughputReport,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MAX_THROUGHPUT_HISTORY: usize = 20;

/// Identifies one device job. Results with a mismatched ticket are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTicket {
    pub epoch: u64,
    pub job: u64,
    pub device_id: String,
}

#[derive(Debug)]
pub struct FlashJob {
    pub ticket: JobTicket,
    pub firmware: String,
    pub started_at: DateTime<Utc>,
    progress: ProgressWatch,
    cancel: Option<CancellationToken>,
}

impl FlashJob {
    pub fn percent(&self) -> u8 {
        self.progress.percent()
    }
}

#[derive(Debug)]
pub struct ThroughputJob {
    pub ticket: JobTicket,
    pub started_at: DateTime<Utc>,
    cancel: Option<CancellationToken>,
}

/// Everything `begin_flash` hands to the task that talks to the agent.
#[derive(Debug)]
pub struct FlashRequest {
    pub ticket: JobTicket,
    pub handle: ConnectionHandle,
    pub firmware: Arc<FirmwareImage>,
    pub progress: ProgressSink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashFailure {
    pub device_id: String,
    pub firmware: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct Session {
    pub setup: SetupController,
    pub devices: DeviceRegistry,
    pub log: NotificationLog,
    pub tasks: SessionTasks,
    pub tools: ToolCatalog,
    connection: Option<ConnectionHandle>,
    scanning: bool,
    flash: Option<FlashJob>,
    throughput: Option<ThroughputJob>,
    throughput_history: VecDeque<ThroughputRecord>,
    last_flash_failure: Option<FlashFailure>,
    next_job: u64,
}

impl Session {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            setup: SetupController::new(),
            devices: DeviceRegistry::new(),
            log: NotificationLog::with_capacity(log_capacity),
            tasks: SessionTasks::new(),
            tools: ToolCatalog::default(),
            connection: None,
            scanning: false,
            flash: None,
            throughput: None,
            throughput_history: VecDeque::new(),
            last_flash_failure: None,
            next_job: 1,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.setup.epoch()
    }

    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.connection.as_ref()
    }

    pub fn require_connection(&self) -> SessionResult<&ConnectionHandle> {
        match self.connection {
            Some(ref handle) if self.setup.link().is_connected() => Ok(handle),
            _ => Err(SessionError::NotConnected),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn flash_job(&self) -> Option<&FlashJob> {
        self.flash.as_ref()
    }

    pub fn throughput_job(&self) -> Option<&ThroughputJob> {
        self.throughput.as_ref()
    }

    // Newest first.
    pub fn throughput_history(&self) -> impl Iterator<Item = &ThroughputRecord> + '_ {
        self.throughput_history.iter()
    }

    pub fn last_flash_failure(&self) -> Option<&FlashFailure> {
        self.last_flash_failure.as_ref()
    }

    // ── onboarding ───────────────────────────────────────────

    pub fn request_download(&mut self) -> SessionResult<ActionTicket> {
        self.setup.request_download(&mut self.log)
    }

    pub fn request_install(&mut self) -> SessionResult<ActionTicket> {
        self.setup.request_install(&mut self.log)
    }

    pub fn request_connect(&mut self) -> SessionResult<ActionTicket> {
        self.setup.request_connect(&mut self.log)
    }

    pub fn finish_setup_action(
        &mut self,
        ticket: ActionTicket,
        outcome: Result<(), AgentError>,
    ) -> SessionResult<Resolution> {
        self.setup.resolve(ticket, outcome, &mut self.log)
    }

    pub fn finish_connect(
        &mut self,
        ticket: ActionTicket,
        outcome: Result<ConnectionHandle, AgentError>,
    ) -> SessionResult<Resolution> {
        if ticket.epoch != self.setup.epoch() || ticket.step != SetupStep::ConnectAgent {
            return Ok(Resolution::Stale);
        }
        match outcome {
            Ok(handle) => {
                let version = handle.agent_version.clone();
                let endpoint = handle.endpoint.clone();
                let resolution = self.setup.resolve(ticket, Ok(()), &mut self.log)?;
                if resolution == Resolution::Applied {
                    self.log.info(
                        "Agent",
                        format!("Connected to agent v{version} at {endpoint}"),
                    );
                    self.connection = Some(handle);
                }
                Ok(resolution)
            }
            Err(e) => self.setup.resolve(ticket, Err(e), &mut self.log),
        }
    }

    pub fn advance(&mut self) -> SessionResult<SetupStep> {
        self.setup.advance(&mut self.log)
    }

    // ── device scan ──────────────────────────────────────────

    pub fn begin_scan(&mut self) -> SessionResult<(u64, ConnectionHandle)> {
        let handle = self.require_connection()?.clone();
        if self.scanning {
            return Err(SessionError::ActionInProgress("device scan".to_string()));
        }
        if let Some(busy) = self.busy_device() {
            return Err(SessionError::DeviceBusy {
                id: busy.to_string(),
                status: DeviceStatus::InUse,
            });
        }
        self.scanning = true;
        self.log.info("Agent", "Scanning for DMA devices...");
        Ok((self.epoch(), handle))
    }

    pub fn finish_scan(
        &mut self,
        epoch: u64,
        outcome: Result<Vec<Device>, AgentError>,
    ) -> SessionResult<Resolution> {
        if epoch != self.epoch() || !self.scanning {
            return Ok(Resolution::Stale);
        }
        self.scanning = false;
        match outcome {
            Ok(devices) => {
                let names: Vec<String> = devices.iter().map(Device::display_name).collect();
                self.devices.replace_snapshot(devices, &mut self.log)?;
                for name in names {
                    self.log.info("Device", format!("Found DMA device: {name}"));
                }
                Ok(Resolution::Applied)
            }
            Err(e) => {
                self.log.error("Agent", e.to_string());
                Err(e.into())
            }
        }
    }

    // ── firmware flashing ────────────────────────────────────

    pub fn begin_flash(
        &mut self,
        device_id: &str,
        firmware: FirmwareImage,
    ) -> SessionResult<FlashRequest> {
        let handle = self.require_connection()?.clone();
        if let Some(ref job) = self.flash {
            return Err(SessionError::ActionInProgress(format!(
                "firmware flash on {}",
                job.ticket.device_id
            )));
        }
        // A device left in error by a failed flash may be flashed again, but
        // only through a new, explicit request.
        self.claim_device(device_id, true)?;

        let ticket = self.next_ticket(device_id);
        let (sink, watch) = progress_channel();
        info!(device = device_id, firmware = %firmware.name, size = firmware.bytes.len(), "flash started");
        self.log.info(
            "Firmware",
            format!(
                "Flashing {} ({} bytes, sha256 {}) to {device_id}",
                firmware.name,
                firmware.bytes.len(),
                firmware.sha256_hex()
            ),
        );
        self.last_flash_failure = None;
        self.flash = Some(FlashJob {
            ticket: ticket.clone(),
            firmware: firmware.name.clone(),
            started_at: Utc::now(),
            progress: watch,
            cancel: None,
        });
        Ok(FlashRequest {
            ticket,
            handle,
            firmware: Arc::new(firmware),
            progress: sink,
        })
    }

    pub fn attach_flash_task(&mut self, ticket: &JobTicket, token: CancellationToken) {
        if let Some(job) = self.flash.as_mut().filter(|j| &j.ticket == ticket) {
            job.cancel = Some(token);
        }
    }

    /// Completes the flash. A failure marks the device as errored and is
    /// remembered; nothing here ever restarts the write.
    pub fn finish_flash(
        &mut self,
        ticket: &JobTicket,
        outcome: Result<(), AgentError>,
    ) -> SessionResult<Resolution> {
        let Some(job) = self.flash.take_if_matches(ticket) else {
            return Ok(Resolution::Stale);
        };
        let device_id = job.ticket.device_id.clone();
        // Dropping the job drops the progress watcher and closes the sink.
        drop(job.progress);

        match outcome {
            Ok(()) => {
                self.release_device(&device_id, DeviceStatus::Available);
                self.log
                    .info("Firmware", format!("Firmware flashed successfully to {device_id}"));
                Ok(Resolution::Applied)
            }
            Err(e) => {
                self.release_device(&device_id, DeviceStatus::Error);
                warn!(device = %device_id, error = %e, "flash failed");
                self.log.error("Firmware", format!("{e} ({device_id})"));
                self.last_flash_failure = Some(FlashFailure {
                    device_id,
                    firmware: job.firmware,
                    reason: e.detail().to_string(),
                });
                Err(e.into())
            }
        }
    }

    // ── throughput test ──────────────────────────────────────

    pub fn begin_throughput(
        &mut self,
        device_id: &str,
    ) -> SessionResult<(JobTicket, ConnectionHandle)> {
        let handle = self.require_connection()?.clone();
        if let Some(ref job) = self.throughput {
            return Err(SessionError::ActionInProgress(format!(
                "throughput test on {}",
                job.ticket.device_id
            )));
        }
        self.claim_device(device_id, false)?;
        let ticket = self.next_ticket(device_id);
        self.log
            .info("Transfer", format!("Throughput test started on {device_id}"));
        self.throughput = Some(ThroughputJob {
            ticket: ticket.clone(),
            started_at: Utc::now(),
            cancel: None,
        });
        Ok((ticket, handle))
    }

    pub fn attach_throughput_task(&mut self, ticket: &JobTicket, token: CancellationToken) {
        if let Some(job) = self.throughput.as_mut().filter(|j| &j.ticket == ticket) {
            job.cancel = Some(token);
        }
    }

    pub fn finish_throughput(
        &mut self,
        ticket: &JobTicket,
        outcome: Result<ThroughputReport, AgentError>,
    ) -> SessionResult<Resolution> {
        let Some(job) = self.throughput.take_if_matches(ticket) else {
            return Ok(Resolution::Stale);
        };
        let device_id = job.ticket.device_id;
        self.release_device(&device_id, DeviceStatus::Available);

        match outcome {
            Ok(report) => {
                self.log.info(
                    "Transfer",
                    format!(
                        "{device_id}: read {:.1} MB/s, write {:.1} MB/s, latency {:.1} ms",
                        report.read_mbps, report.write_mbps, report.latency_ms
                    ),
                );
                self.throughput_history.push_front(ThroughputRecord {
                    device_id,
                    timestamp: Utc::now(),
                    report,
                });
                self.throughput_history.truncate(MAX_THROUGHPUT_HISTORY);
                Ok(Resolution::Applied)
            }
            Err(e) => {
                self.log.error("Transfer", format!("{e} ({device_id})"));
                Err(e.into())
            }
        }
    }

    pub fn cancel_throughput(&mut self) -> bool {
        let Some(job) = self.throughput.take() else {
            return false;
        };
        if let Some(token) = job.cancel {
            token.cancel();
        }
        self.release_device(&job.ticket.device_id, DeviceStatus::Available);
        self.log.warn(
            "Transfer",
            format!("Throughput test cancelled on {}", job.ticket.device_id),
        );
        true
    }

    // ── tool downloads ───────────────────────────────────────

    pub fn request_tool_download(&mut self, query: &str) -> SessionResult<ToolTicket> {
        self.tools.begin(query, &mut self.log)
    }

    pub fn request_all_tool_downloads(&mut self) -> Vec<ToolTicket> {
        self.tools.begin_all(&mut self.log)
    }

    pub fn finish_tool_download(
        &mut self,
        ticket: &ToolTicket,
        outcome: Result<PathBuf, AgentError>,
    ) -> SessionResult<Resolution> {
        self.tools.finish(ticket, outcome, &mut self.log)
    }

    // ── lifecycle ────────────────────────────────────────────

    pub fn reset(&mut self) {
        self.tasks.cancel_all();
        if let Some(job) = self.flash.take() {
            if let Some(token) = job.cancel {
                token.cancel();
            }
        }
        if let Some(job) = self.throughput.take() {
            if let Some(token) = job.cancel {
                token.cancel();
            }
        }
        let aborted = self.tools.abort_pending();
        if aborted > 0 {
            info!(aborted, "tool downloads cancelled by reset");
        }
        self.scanning = false;
        self.connection = None;
        self.devices.clear();
        self.last_flash_failure = None;
        self.setup.reset(&mut self.log);
    }

    fn claim_device(&mut self, device_id: &str, allow_error: bool) -> SessionResult<()> {
        if self.scanning {
            return Err(SessionError::ActionInProgress("device scan".to_string()));
        }
        let device = self.devices.get(device_id)?;
        let claimable = match device.status {
            DeviceStatus::Available => true,
            DeviceStatus::Error => allow_error,
            DeviceStatus::InUse => false,
        };
        if !claimable {
            return Err(SessionError::DeviceBusy {
                id: device_id.to_string(),
                status: device.status,
            });
        }
        self.devices.set_status(device_id, DeviceStatus::InUse)
    }

    fn release_device(&mut self, device_id: &str, status: DeviceStatus) {
        if let Err(e) = self.devices.set_status(device_id, status) {
            warn!(device = %device_id, %status, error = %e, "job finished on an unknown device");
            self.log.warn(
                "Devices",
                format!("{device_id} is no longer in the device list"),
            );
        }
    }

    fn busy_device(&self) -> Option<&str> {
        self.flash
            .as_ref()
            .map(|j| j.ticket.device_id.as_str())
            .or_else(|| self.throughput.as_ref().map(|j| j.ticket.device_id.as_str()))
    }

    fn next_ticket(&mut self, device_id: &str) -> JobTicket {
        let job = self.next_job;
        self.next_job += 1;
        JobTicket {
            epoch: self.epoch(),
            job,
            device_id: device_id.to_string(),
        }
    }
}

trait TakeIfMatches<T> {
    fn take_if_matches(&mut self, ticket: &JobTicket) -> Option<T>;
}

impl TakeIfMatches<FlashJob> for Option<FlashJob> {
    fn take_if_matches(&mut self, ticket: &JobTicket) -> Option<FlashJob> {
        if self.as_ref().is_some_and(|j| &j.ticket == ticket) {
            self.take()
        } else {
            None
        }
    }
}

impl TakeIfMatches<ThroughputJob> for Option<ThroughputJob> {
    fn take_if_matches(&mut self, ticket: &JobTicket) -> Option<ThroughputJob> {
        if self.as_ref().is_some_and(|j| &j.ticket == ticket) {
            self.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::AgentStatus;

    fn device(id: &str) -> Device {
        Device {
            id: id.to_string(),
            kind: "PCIe FPGA Card".to_string(),
            vendor_id: "0x1172".to_string(),
            device_id: "0xe001".to_string(),
            firmware_version: "3.5.2".to_string(),
            status: DeviceStatus::Available,
        }
    }

    fn handle() -> ConnectionHandle {
        ConnectionHandle {
            endpoint: "http://127.0.0.1:7420".to_string(),
            agent_version: "1.2.3".to_string(),
        }
    }

    fn connected_session() -> Session {
        let mut session = Session::new(100);
        let t = session.request_download().expect("download");
        session.finish_setup_action(t, Ok(())).expect("downloaded");
        session.advance().expect("advance");
        let t = session.request_install().expect("install");
        session.finish_setup_action(t, Ok(())).expect("installed");
        session.advance().expect("advance");
        let t = session.request_connect().expect("connect");
        session.finish_connect(t, Ok(handle())).expect("connected");
        session.advance().expect("advance");
        session
    }

    fn scanned_session(ids: &[&str]) -> Session {
        let mut session = connected_session();
        let (epoch, _) = session.begin_scan().expect("scan");
        session
            .finish_scan(epoch, Ok(ids.iter().map(|id| device(id)).collect()))
            .expect("scan result");
        session
    }

    fn image() -> FirmwareImage {
        FirmwareImage::new("fpga_bitstream.bin", vec![0xAB; 1024]).expect("image")
    }

    #[test]
    fn scan_requires_connection() {
        let mut session = Session::new(100);
        assert_eq!(session.begin_scan().err(), Some(SessionError::NotConnected));
    }

    #[test]
    fn connect_stores_handle_and_reaches_ready() {
        let session = connected_session();
        assert!(session.setup.is_ready());
        assert_eq!(session.connection(), Some(&handle()));
        assert_eq!(session.setup.link().status(), AgentStatus::Connected);
    }

    #[test]
    fn scan_populates_registry() {
        let session = scanned_session(&["ftdi-1234-5678", "pcie-abcd-ef01"]);
        assert_eq!(session.devices.len(), 2);
        assert!(!session.is_scanning());
        assert!(session
            .log
            .iter()
            .any(|e| e.message == "Found DMA device: PCIe FPGA Card (pcie-abcd-ef01)"));
    }

    #[test]
    fn scan_with_duplicates_keeps_previous_snapshot() {
        let mut session = scanned_session(&["a"]);
        let (epoch, _) = session.begin_scan().expect("scan");
        let result = session.finish_scan(epoch, Ok(vec![device("b"), device("b")]));
        assert_eq!(result, Err(SessionError::DuplicateDeviceId("b".to_string())));
        assert!(session.devices.get("a").is_ok());
        assert!(!session.is_scanning());
    }

    #[test]
    fn flash_marks_device_in_use_then_available() {
        let mut session = scanned_session(&["a"]);
        let request = session.begin_flash("a", image()).expect("flash");
        assert_eq!(
            session.devices.get("a").map(|d| d.status),
            Ok(DeviceStatus::InUse)
        );

        request.progress.update(60);
        assert_eq!(session.flash_job().map(FlashJob::percent), Some(60));

        assert_eq!(
            session.finish_flash(&request.ticket, Ok(())),
            Ok(Resolution::Applied)
        );
        assert!(request.progress.is_closed());
        assert!(session.flash_job().is_none());
        assert_eq!(
            session.devices.get("a").map(|d| d.status),
            Ok(DeviceStatus::Available)
        );
    }

    #[test]
    fn flash_failure_is_recorded_and_not_retried() {
        let mut session = scanned_session(&["a"]);
        let request = session.begin_flash("a", image()).expect("flash");
        let result = session.finish_flash(
            &request.ticket,
            Err(AgentError::FlashFailed(
                "Device disconnected during transfer".into(),
            )),
        );

        assert!(matches!(
            result,
            Err(SessionError::Agent(AgentError::FlashFailed(_)))
        ));
        assert!(session.flash_job().is_none());
        assert_eq!(
            session.devices.get("a").map(|d| d.status),
            Ok(DeviceStatus::Error)
        );
        let failure = session.last_flash_failure().expect("failure recorded");
        assert_eq!(failure.reason, "Device disconnected during transfer");

        assert!(matches!(
            session.begin_throughput("a"),
            Err(SessionError::DeviceBusy { .. })
        ));
        let retry = session.begin_flash("a", image()).expect("explicit re-flash");
        assert_ne!(retry.ticket, request.ticket);
        assert!(session.last_flash_failure().is_none());
    }

    #[test]
    fn second_flash_is_rejected_while_running() {
        let mut session = scanned_session(&["a", "b"]);
        let _request = session.begin_flash("a", image()).expect("flash");
        assert!(matches!(
            session.begin_flash("b", image()),
            Err(SessionError::ActionInProgress(_))
        ));
    }

    #[test]
    fn throughput_results_are_kept_newest_first() {
        let mut session = scanned_session(&["a"]);
        for read in [100.0, 400.0] {
            let (ticket, _) = session.begin_throughput("a").expect("test");
            session
                .finish_throughput(
                    &ticket,
                    Ok(ThroughputReport {
                        read_mbps: read,
                        write_mbps: 80.0,
                        latency_ms: 10.0,
                    }),
                )
                .expect("result");
        }
        let reads: Vec<f64> = session
            .throughput_history()
            .map(|r| r.report.read_mbps)
            .collect();
        assert_eq!(reads, vec![400.0, 100.0]);
    }

    #[test]
    fn cancelled_throughput_result_is_stale() {
        let mut session = scanned_session(&["a"]);
        let (ticket, _) = session.begin_throughput("a").expect("test");
        assert!(session.cancel_throughput());
        assert_eq!(
            session.devices.get("a").map(|d| d.status),
            Ok(DeviceStatus::Available)
        );
        let late = session.finish_throughput(
            &ticket,
            Ok(ThroughputReport {
                read_mbps: 1.0,
                write_mbps: 1.0,
                latency_ms: 1.0,
            }),
        );
        assert_eq!(late, Ok(Resolution::Stale));
        assert_eq!(session.throughput_history().count(), 0);
    }

    #[test]
    fn reset_clears_connection_and_devices() {
        let mut session = scanned_session(&["a"]);
        let request = session.begin_flash("a", image()).expect("flash");

        session.reset();
        assert!(session.connection().is_none());
        assert!(session.devices.is_empty());
        assert!(request.progress.is_closed());
        assert_eq!(session.setup.current_step(), SetupStep::DownloadAgent);
        assert_eq!(
            session.finish_flash(&request.ticket, Ok(())),
            Ok(Resolution::Stale)
        );
    }

    #[test]
    fn stale_connect_after_reset_is_ignored() {
        let mut session = Session::new(100);
        let t = session.request_download().expect("download");
        session.finish_setup_action(t, Ok(())).expect("downloaded");
        session.advance().expect("advance");
        let t = session.request_install().expect("install");
        session.finish_setup_action(t, Ok(())).expect("installed");
        session.advance().expect("advance");
        let t = session.request_connect().expect("connect");

        session.reset();
        assert_eq!(session.finish_connect(t, Ok(handle())), Ok(Resolution::Stale));
        assert!(session.connection().is_none());
    }

    #[test]
    fn finishing_a_job_on_a_vanished_device_is_reported() {
        let mut session = scanned_session(&["a"]);
        let request = session.begin_flash("a", image()).expect("flash");
        session.devices.clear();

        assert_eq!(
            session.finish_flash(&request.ticket, Ok(())),
            Ok(Resolution::Applied)
        );
        assert!(session
            .log
            .iter()
            .any(|e| e.level == crate::types::LogLevel::Warning
                && e.message.contains("no longer in the device list")));
    }

    #[test]
    fn reset_abandons_running_tool_downloads() {
        let mut session = connected_session();
        let ticket = session.request_tool_download("pcileech").expect("begin");
        let tickets = session.request_all_tool_downloads();
        assert_eq!(tickets.len(), 5);

        session.reset();
        assert_eq!(session.tools.downloading(), 0);
        assert_eq!(
            session.finish_tool_download(&ticket, Ok(PathBuf::from("/tmp/pcileech.zip"))),
            Ok(Resolution::Stale)
        );
    }
}
