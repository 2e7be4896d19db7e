use super::*;

impl App {
    pub fn handle_event(&mut self, event: Event) -> Result<bool> {
        match event {
            Event::Key(key) => self.handle_key_event(key),
            Event::Mouse(mouse) => self.handle_mouse_event(mouse),
            _ => Ok(false),
        }
    }

    fn handle_key_event(&mut self, key: KeyEvent) -> Result<bool> {
        if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Ok(true);
        }

        if self.input.is_active() {
            match key.code {
                KeyCode::Enter => self.handle_input_submit(),
                KeyCode::Esc => self.input.clear(),
                KeyCode::Backspace => self.input.handle_backspace(),
                KeyCode::Char(c) => self.input.handle_char(c),
                _ => {}
            }
            if self.input.mode == InputMode::Search {
                self.log_view.search = self.input.buffer.trim().to_string();
            }
            return Ok(false);
        }

        if key.code == KeyCode::Char('?') {
            self.show_help = !self.show_help;
            return Ok(false);
        }

        if self.show_help {
            if key.code == KeyCode::Esc {
                self.show_help = false;
            }
            return Ok(false);
        }

        if self.show_error_details {
            if matches!(key.code, KeyCode::Esc | KeyCode::Enter | KeyCode::Char('E')) {
                self.show_error_details = false;
            }
            return Ok(false);
        }

        if key.code == KeyCode::Char('E') {
            if self.last_error.is_some() {
                self.show_error_details = true;
            }
            return Ok(false);
        }

        if let Some(ref mut onboarding) = self.onboarding {
            match key.code {
                KeyCode::Enter => self.run_primary_action(),
                KeyCode::Left => {
                    if self.session.setup.current_step() == SetupStep::DownloadAgent {
                        onboarding.previous_platform();
                    }
                }
                KeyCode::Right => {
                    if self.session.setup.current_step() == SetupStep::DownloadAgent {
                        onboarding.next_platform();
                    }
                }
                KeyCode::Char('c') => {
                    onboarding.error_message = None;
                    self.session.setup.clear_error(&mut self.session.log);
                    self.clear_error();
                }
                KeyCode::Esc => self.should_quit = true,
                _ => {}
            }
            return Ok(false);
        }

        match key.code {
            KeyCode::Char('/') => self.input.start_command("/"),
            KeyCode::Char('f') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.page = Page::Logs;
                let current = self.log_view.search.clone();
                self.input.start_search(&current);
            }
            KeyCode::Tab => self.switch_page(self.page.next()),
            KeyCode::BackTab => self.switch_page(self.page.previous()),
            KeyCode::Char(c @ '1'..='6') => {
                let idx = c as usize - '1' as usize;
                self.switch_page(Page::ALL[idx]);
            }
            KeyCode::Up => match self.page {
                Page::Logs => {
                    self.log_view.follow = false;
                    self.log_view.scroll = self.log_view.scroll.saturating_add(1);
                }
                Page::Tools => self.selected_tool = self.selected_tool.saturating_sub(1),
                _ => self.select_previous_device(),
            },
            KeyCode::Down => match self.page {
                Page::Logs => {
                    self.log_view.scroll = self.log_view.scroll.saturating_sub(1);
                    if self.log_view.scroll == 0 {
                        self.log_view.follow = true;
                    }
                }
                Page::Tools => {
                    if self.selected_tool + 1 < self.session.tools.len() {
                        self.selected_tool += 1;
                    }
                }
                _ => self.select_next_device(),
            },
            KeyCode::End => {
                self.log_view.scroll = 0;
                self.log_view.follow = true;
            }
            KeyCode::Enter | KeyCode::Char('d') if self.page == Page::Tools => {
                self.download_selected_tool()
            }
            KeyCode::Char('a') if self.page == Page::Tools => self.download_all_tools(),
            KeyCode::Char('s') => self.scan_devices(),
            KeyCode::Char('f') => {
                if let Some(id) = self.selected_device_id() {
                    self.page = Page::Firmware;
                    self.input.start_command(&format!("/flash {id} "));
                }
            }
            KeyCode::Char('t') => {
                if let Some(id) = self.selected_device_id() {
                    self.start_throughput(&id);
                }
            }
            KeyCode::Char('x') => self.cancel_throughput(),
            KeyCode::Char('r') if self.page == Page::Checkup => self.refresh_checkup(),
            KeyCode::Char('l') => {
                self.log_view.cycle_level();
                self.page = Page::Logs;
            }
            KeyCode::Esc => {
                self.status_message = None;
                self.clear_error();
            }
            _ => {}
        }

        Ok(false)
    }

    fn handle_mouse_event(&mut self, mouse: MouseEvent) -> Result<bool> {
        if self.onboarding.is_some() {
            return Ok(false);
        }
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                self.last_mouse_pos = (mouse.column, mouse.row);
                match self.hit_test(mouse.column, mouse.row) {
                    Some(HitTarget::Page(page)) => self.switch_page(page),
                    Some(HitTarget::Device(idx)) => self.selected_device = idx,
                    Some(HitTarget::Tool(idx)) => self.selected_tool = idx,
                    Some(HitTarget::Divider(divider)) => self.drag_target = Some(divider),
                    None => {}
                }
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                if let Some(divider) = self.drag_target {
                    let delta = mouse.column as i16 - self.last_mouse_pos.0 as i16;
                    self.layout.resize(divider, delta);
                    self.last_mouse_pos = (mouse.column, mouse.row);
                }
            }
            MouseEventKind::Up(MouseButton::Left) => {
                self.drag_target = None;
            }
            MouseEventKind::ScrollUp if self.page == Page::Logs => {
                self.log_view.follow = false;
                self.log_view.scroll = self.log_view.scroll.saturating_add(1);
            }
            MouseEventKind::ScrollDown if self.page == Page::Logs => {
                self.log_view.scroll = self.log_view.scroll.saturating_sub(1);
            }
            _ => {}
        }
        Ok(false)
    }

    fn hit_test(&self, col: u16, row: u16) -> Option<HitTarget> {
        let panels = self.layout.panels();
        let sidebar = panels.sidebar;
        if Self::rect_contains(sidebar, col, row) {
            if col == sidebar.x + sidebar.width.saturating_sub(1) {
                return Some(HitTarget::Divider(Divider::Sidebar));
            }
            // Rows start under the top border.
            let idx = row.saturating_sub(sidebar.y + 1) as usize;
            return Page::ALL.get(idx).map(|p| HitTarget::Page(*p));
        }

        let status = panels.status;
        if col == status.x && row >= status.y && row < status.y + status.height {
            return Some(HitTarget::Divider(Divider::Status));
        }

        // Both lists have a border plus a header row above the first entry.
        let main = panels.main;
        let first = main.y + 2;
        if !Self::rect_contains(main, col, row) || row < first {
            return None;
        }
        let idx = (row - first) as usize;
        match self.page {
            Page::Devices if idx < self.session.devices.len() => Some(HitTarget::Device(idx)),
            Page::Tools if idx < self.session.tools.len() => Some(HitTarget::Tool(idx)),
            _ => None,
        }
    }

    fn rect_contains(rect: Rect, col: u16, row: u16) -> bool {
        col >= rect.x && col < rect.x + rect.width && row >= rect.y && row < rect.y + rect.height
    }
}

#[derive(Debug, Clone, Copy)]
enum HitTarget {
    Page(Page),
    Device(usize),
    Tool(usize),
    Divider(Divider),
}
