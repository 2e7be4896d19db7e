use super::*;
use std::io::BufWriter;
use std::path::Path;

impl App {
    pub(super) fn switch_page(&mut self, page: Page) {
        self.page = page;
        if page == Page::Checkup && self.checkup.is_none() {
            self.refresh_checkup();
        }
    }

    pub fn scan_devices(&mut self) {
        match self.session.begin_scan() {
            Ok((epoch, handle)) => {
                let backend = self.backend.clone();
                self.spawn_app_task(async move {
                    let outcome = backend.scan_devices(&handle).await;
                    AppAsyncEvent::ScanFinished { epoch, outcome }
                });
            }
            Err(e) => self.report_error("Cannot scan", e.user_message()),
        }
    }

    pub fn flash_device(&mut self, device_id: &str, path: &Path) {
        let image = match FirmwareImage::from_path(path) {
            Ok(image) => image,
            Err(e) => {
                self.report_error("Cannot load firmware", e);
                return;
            }
        };
        let request = match self.session.begin_flash(device_id, image) {
            Ok(request) => request,
            Err(e) => {
                self.report_error("Cannot flash", e);
                return;
            }
        };

        let ticket = request.ticket.clone();
        let backend = self.backend.clone();
        let token = self.spawn_app_task(async move {
            let outcome = backend
                .flash_firmware(
                    &request.handle,
                    &request.ticket.device_id,
                    &request.firmware.bytes,
                    request.progress,
                )
                .await;
            AppAsyncEvent::FlashFinished {
                ticket: request.ticket,
                outcome,
            }
        });
        if let Some(token) = token {
            self.session.attach_flash_task(&ticket, token);
        }
        self.status_message = Some(format!("Flashing {device_id}..."));
        self.page = Page::Firmware;
    }

    pub fn start_throughput(&mut self, device_id: &str) {
        let (ticket, handle) = match self.session.begin_throughput(device_id) {
            Ok(started) => started,
            Err(e) => {
                self.report_error("Cannot start throughput test", e);
                return;
            }
        };

        let backend = self.backend.clone();
        let job = ticket.clone();
        let token = self.spawn_app_task(async move {
            let outcome = backend.run_throughput_test(&handle, &job.device_id).await;
            AppAsyncEvent::ThroughputFinished {
                ticket: job,
                outcome,
            }
        });
        if let Some(token) = token {
            self.session.attach_throughput_task(&ticket, token);
        }
        self.page = Page::Throughput;
    }

    pub fn cancel_throughput(&mut self) {
        if self.session.cancel_throughput() {
            self.status_message = Some("Throughput test cancelled".to_string());
        } else {
            self.status_message = Some("No throughput test is running".to_string());
        }
    }

    pub fn download_tool(&mut self, query: &str) {
        match self.session.request_tool_download(query) {
            Ok(ticket) => self.spawn_tool_download(ticket),
            Err(e) => self.report_error("Cannot download", e),
        }
        self.page = Page::Tools;
    }

    pub fn download_all_tools(&mut self) {
        let tickets = self.session.request_all_tool_downloads();
        if tickets.is_empty() {
            self.status_message = Some("Every tool is already downloaded".to_string());
        } else {
            self.status_message = Some(format!("Downloading {} tool(s)...", tickets.len()));
        }
        for ticket in tickets {
            self.spawn_tool_download(ticket);
        }
        self.page = Page::Tools;
    }

    fn spawn_tool_download(&mut self, ticket: ToolTicket) {
        let backend = self.backend.clone();
        self.spawn_app_task(async move {
            let outcome = backend.download_tool(ticket.tool.clone()).await;
            AppAsyncEvent::ToolDownloadFinished { ticket, outcome }
        });
    }

    pub(super) fn refresh_checkup(&mut self) {
        let items = run_checkup(&self.session);
        let failed = items
            .iter()
            .filter(|i| i.status == CheckStatus::Failed)
            .count();
        tracing::info!(failed, "system checkup finished");
        self.checkup = Some(CheckupReport {
            items,
            ran_at: chrono::Utc::now(),
        });
    }

    pub fn export_logs(&mut self, path: &Path) {
        let filter = self.log_filter();
        let result = std::fs::File::create(path)
            .and_then(|file| self.session.log.export(&filter, BufWriter::new(file)));
        match result {
            Ok(count) => {
                self.status_message =
                    Some(format!("Exported {count} entries to {}", path.display()));
                self.clear_error();
            }
            Err(e) => self.report_error("Log export failed", e),
        }
    }

    /// Drops the agent session and starts setup over.
    pub fn reset_session(&mut self) {
        self.session.reset();
        self.agent_event_rx = None;
        self.auto_setup = false;
        self.onboarding = Some(OnboardingState::new());
        self.checkup = None;
        self.selected_device = 0;
        self.selected_tool = 0;
        self.page = Page::Devices;
        self.status_message = None;
        self.clear_error();
    }

    pub(super) fn handle_input_submit(&mut self) {
        let text = self.input.buffer.clone();
        match self.input.mode {
            InputMode::Command => self.handle_command(&text),
            InputMode::Search => {
                self.log_view.search = text.trim().to_string();
                self.log_view.scroll = 0;
            }
            InputMode::Normal => {}
        }
        self.input.clear();
    }

    pub fn handle_command(&mut self, text: &str) {
        let Some(command) = CommandType::parse(text) else {
            return;
        };
        tracing::debug!(?command, "command");

        match command {
            CommandType::Scan => self.scan_devices(),
            CommandType::Flash { device_id, path } => self.flash_device(&device_id, &path),
            CommandType::SpeedTest { device_id } => self.start_throughput(&device_id),
            CommandType::Cancel => self.cancel_throughput(),
            CommandType::Download { tool: Some(tool) } => self.download_tool(&tool),
            CommandType::Download { tool: None } => self.download_all_tools(),
            CommandType::Checkup => {
                self.refresh_checkup();
                self.page = Page::Checkup;
            }
            CommandType::ClearLogs => {
                self.session.log.clear();
                self.log_view.scroll = 0;
            }
            CommandType::Export { path } => self.export_logs(&path),
            CommandType::Filter { level } => {
                self.log_view.level = level;
                self.log_view.scroll = 0;
                self.page = Page::Logs;
            }
            CommandType::Search { query } => {
                self.log_view.search = query;
                self.log_view.scroll = 0;
                self.page = Page::Logs;
            }
            CommandType::Reset => self.reset_session(),
            CommandType::Help => self.show_help = true,
            CommandType::Invalid { usage } => self.report_error("Usage", usage),
            CommandType::Unknown(name) => {
                self.report_error("Unknown command", format!("/{name} (try /help)"))
            }
        }
    }

    pub(super) fn select_next_device(&mut self) {
        let count = self.session.devices.len();
        if count > 0 && self.selected_device + 1 < count {
            self.selected_device += 1;
        }
    }

    pub(super) fn select_previous_device(&mut self) {
        self.selected_device = self.selected_device.saturating_sub(1);
    }

    pub(super) fn download_selected_tool(&mut self) {
        let Some(id) = self
            .session
            .tools
            .get_index(self.selected_tool)
            .map(|e| e.tool.id.clone())
        else {
            return;
        };
        self.download_tool(&id);
    }
}
