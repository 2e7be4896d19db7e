use super::*;

impl App {
    pub fn init(&mut self) {
        self.session
            .log
            .info("System", format!("DMA Toolkit v{} started", env!("CARGO_PKG_VERSION")));
        if self.config.agent.auto_connect {
            tracing::info!("auto_connect enabled, running setup");
            self.auto_setup = true;
            self.run_primary_action();
        }
    }

    /// Performs whatever Enter means on the current setup screen.
    pub fn run_primary_action(&mut self) {
        match OnboardingState::primary_action(&self.session.setup) {
            OnboardingAction::Download => self.start_download(),
            OnboardingAction::Install => self.start_install(),
            OnboardingAction::Connect => self.start_connect(),
            OnboardingAction::Advance => match self.session.advance() {
                Ok(_) => {
                    if self.auto_setup {
                        self.run_primary_action();
                    }
                }
                Err(e) => self.report_error("Cannot continue setup", e.user_message()),
            },
            OnboardingAction::Finish => {
                self.auto_setup = false;
                self.onboarding = None;
                self.page = Page::Devices;
                self.scan_devices();
            }
            OnboardingAction::Wait => {}
        }
    }

    fn start_download(&mut self) {
        let platform = self
            .onboarding
            .as_ref()
            .map(|o| o.platform)
            .unwrap_or_else(Platform::current);
        match self.session.request_download() {
            Ok(ticket) => {
                let backend = self.backend.clone();
                self.spawn_app_task(async move {
                    let outcome = backend.download_agent(platform).await;
                    AppAsyncEvent::SetupActionFinished { ticket, outcome }
                });
            }
            Err(e) => self.report_setup_error(e),
        }
    }

    fn start_install(&mut self) {
        match self.session.request_install() {
            Ok(ticket) => {
                let backend = self.backend.clone();
                self.spawn_app_task(async move {
                    let outcome = backend.install_agent().await;
                    AppAsyncEvent::SetupActionFinished { ticket, outcome }
                });
            }
            Err(e) => self.report_setup_error(e),
        }
    }

    fn start_connect(&mut self) {
        match self.session.request_connect() {
            Ok(ticket) => {
                let backend = self.backend.clone();
                self.spawn_app_task(async move {
                    let outcome = backend.connect_agent().await;
                    AppAsyncEvent::ConnectFinished { ticket, outcome }
                });
            }
            Err(e) => self.report_setup_error(e),
        }
    }

    fn report_setup_error(&mut self, error: SessionError) {
        self.auto_setup = false;
        if let Some(ref mut onboarding) = self.onboarding {
            onboarding.error_message = Some(error.user_message().to_string());
        }
        self.report_error("Setup", error);
    }

    fn setup_applied(&mut self) {
        self.clear_error();
        if let Some(ref mut onboarding) = self.onboarding {
            onboarding.error_message = None;
        }
        if self.auto_setup {
            self.run_primary_action();
        }
    }

    /// Follows the agent's log stream for as long as the session is connected.
    pub(super) fn start_event_stream(&mut self) {
        if !self.config.logs.follow {
            return;
        }
        let Some(handle) = self.session.connection().cloned() else {
            return;
        };
        let (tx, rx) = mpsc::unbounded_channel();
        match LocalAgent::event_stream(&handle, tx) {
            Ok(stream) => {
                self.session.tasks.spawn(stream.run());
                self.agent_event_rx = Some(rx);
            }
            Err(e) => self.report_error("Cannot follow agent events", e),
        }
    }

    /// Drains finished tasks and agent events. Called once per frame.
    pub fn process_events(&mut self) {
        let mut async_events = Vec::new();
        if let Some(ref mut rx) = self.app_async_rx {
            while let Ok(event) = rx.try_recv() {
                async_events.push(event);
            }
        }
        for event in async_events {
            self.apply_async_event(event);
        }

        let mut agent_events = Vec::new();
        if let Some(ref mut rx) = self.agent_event_rx {
            while let Ok(event) = rx.try_recv() {
                agent_events.push(event);
            }
        }
        for event in agent_events {
            match event {
                AgentEvent::Log(entry) => {
                    self.session.log.append(entry);
                }
                AgentEvent::Connected => tracing::debug!("agent event stream connected"),
                AgentEvent::Disconnected => {
                    self.session
                        .log
                        .warn("Agent", "Lost the agent event stream, reconnecting");
                }
            }
        }
    }

    fn apply_async_event(&mut self, event: AppAsyncEvent) {
        match event {
            AppAsyncEvent::SetupActionFinished { ticket, outcome } => {
                match self.session.finish_setup_action(ticket, outcome) {
                    Ok(Resolution::Applied) => self.setup_applied(),
                    Ok(Resolution::Stale) => tracing::debug!("ignored stale setup result"),
                    Err(e) => self.report_setup_error(e),
                }
            }
            AppAsyncEvent::ConnectFinished { ticket, outcome } => {
                match self.session.finish_connect(ticket, outcome) {
                    Ok(Resolution::Applied) => {
                        self.start_event_stream();
                        self.setup_applied();
                    }
                    Ok(Resolution::Stale) => tracing::debug!("ignored stale connect result"),
                    Err(e) => self.report_setup_error(e),
                }
            }
            AppAsyncEvent::ScanFinished { epoch, outcome } => {
                match self.session.finish_scan(epoch, outcome) {
                    Ok(Resolution::Applied) => {
                        let count = self.session.devices.len();
                        self.selected_device = self.selected_device.min(count.saturating_sub(1));
                        self.status_message = Some(format!("{count} device(s) found"));
                        self.clear_error();
                    }
                    Ok(Resolution::Stale) => {}
                    Err(e) => self.report_error("Device scan failed", e.user_message()),
                }
            }
            AppAsyncEvent::FlashFinished { ticket, outcome } => {
                match self.session.finish_flash(&ticket, outcome) {
                    Ok(Resolution::Applied) => {
                        self.status_message =
                            Some(format!("Flashed {} successfully", ticket.device_id));
                        self.clear_error();
                    }
                    Ok(Resolution::Stale) => {}
                    Err(e) => self.report_error("Flash failed", e),
                }
            }
            AppAsyncEvent::ThroughputFinished { ticket, outcome } => {
                match self.session.finish_throughput(&ticket, outcome) {
                    Ok(Resolution::Applied) => {
                        self.status_message =
                            Some(format!("Throughput test on {} finished", ticket.device_id));
                        self.clear_error();
                    }
                    Ok(Resolution::Stale) => {}
                    Err(e) => self.report_error("Throughput test failed", e),
                }
            }
            AppAsyncEvent::ToolDownloadFinished { ticket, outcome } => {
                match self.session.finish_tool_download(&ticket, outcome) {
                    Ok(Resolution::Applied) => {
                        self.status_message = Some(format!("{} downloaded", ticket.tool.name));
                    }
                    Ok(Resolution::Stale) => tracing::debug!("ignored stale tool download"),
                    Err(e) => self.report_error(&format!("{} download failed", ticket.tool.name), e),
                }
            }
        }
    }
}
