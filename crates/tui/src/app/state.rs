use super::*;

pub struct App {
    pub should_quit: bool,
    pub config: Config,
    pub backend: Arc<dyn AgentBackend>,
    pub session: Session,
    pub onboarding: Option<OnboardingState>,
    pub auto_setup: bool,
    pub page: Page,
    pub layout: LayoutState,
    pub input: InputState,
    pub keybinds: Keybinds,
    pub selected_device: usize,
    pub selected_tool: usize,
    pub log_view: LogView,
    pub checkup: Option<CheckupReport>,
    pub show_help: bool,
    pub drag_target: Option<Divider>,
    pub last_mouse_pos: (u16, u16),
    pub app_async_tx: Option<mpsc::UnboundedSender<AppAsyncEvent>>,
    pub app_async_rx: Option<mpsc::UnboundedReceiver<AppAsyncEvent>>,
    pub agent_event_rx: Option<mpsc::UnboundedReceiver<AgentEvent>>,
    pub status_message: Option<String>,
    pub last_error: Option<String>,
    pub show_error_details: bool,
}

impl App {
    pub fn new(config: Config, backend: Arc<dyn AgentBackend>) -> Self {
        let (app_async_tx, app_async_rx) = mpsc::unbounded_channel();
        let session = Session::new(config.logs.capacity);

        Self {
            should_quit: false,
            config,
            backend,
            session,
            onboarding: Some(OnboardingState::new()),
            auto_setup: false,
            page: Page::Devices,
            layout: LayoutState::default(),
            input: InputState::new(),
            keybinds: Keybinds,
            selected_device: 0,
            selected_tool: 0,
            log_view: LogView::default(),
            checkup: None,
            show_help: false,
            drag_target: None,
            last_mouse_pos: (0, 0),
            app_async_tx: Some(app_async_tx),
            app_async_rx: Some(app_async_rx),
            agent_event_rx: None,
            status_message: None,
            last_error: None,
            show_error_details: false,
        }
    }

    pub fn selected_device_id(&self) -> Option<String> {
        self.session
            .devices
            .get_index(self.selected_device)
            .map(|d| d.id.clone())
    }

    pub fn log_filter(&self) -> LogFilter {
        LogFilter {
            level: self.log_view.level,
            source: None,
            text: Some(self.log_view.search.clone()).filter(|s| !s.trim().is_empty()),
        }
    }
}
