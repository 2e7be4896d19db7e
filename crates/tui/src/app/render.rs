use super::*;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Clear, Gauge, List, ListItem, Paragraph, Wrap};

impl App {
    pub fn render(&mut self, frame: &mut Frame) {
        let area = frame.area();

        if self.show_help {
            self.render_help(frame, area);
            return;
        }

        if let Some(ref onboarding) = self.onboarding {
            self.render_onboarding(frame, area, onboarding);
            if self.show_error_details {
                self.render_error_details(frame, area);
            }
            return;
        }

        let panels = self.layout.split(area);
        self.render_topbar(frame, panels.topbar);
        self.render_sidebar(frame, panels.sidebar);
        match self.page {
            Page::Devices => self.render_devices(frame, panels.main),
            Page::Firmware => self.render_firmware(frame, panels.main),
            Page::Throughput => self.render_throughput(frame, panels.main),
            Page::Checkup => self.render_checkup(frame, panels.main),
            Page::Tools => self.render_tools(frame, panels.main),
            Page::Logs => self.render_logs(frame, panels.main),
        }
        self.render_status_panel(frame, panels.status);
        self.render_input_bar(frame, panels.input);

        if self.show_error_details {
            self.render_error_details(frame, area);
        }
    }

    fn render_onboarding(&self, frame: &mut Frame, area: Rect, state: &OnboardingState) {
        let step = self.session.setup.current_step();
        let content = state.screen_text(&self.session.setup);
        let paragraph = Paragraph::new(content)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" DMA Toolkit Setup - {} ", step.title())),
            )
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn render_help(&self, frame: &mut Frame, area: Rect) {
        let mut help_text = self.keybinds.help_text();
        help_text.push_str("\nCommand bar:\n");
        for line in CommandType::help_lines() {
            help_text.push_str("  ");
            help_text.push_str(line);
            help_text.push('\n');
        }
        let popup_area = self.centered_rect(70, 80, area);

        frame.render_widget(Clear, popup_area);
        frame.render_widget(
            Paragraph::new(help_text).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Help - Press ? to close "),
            ),
            popup_area,
        );
    }

    fn render_topbar(&self, frame: &mut Frame, area: Rect) {
        let link = self.session.setup.link();
        let agent = match self.session.connection() {
            Some(handle) if link.is_connected() => {
                format!("agent: ● connected v{}", handle.agent_version)
            }
            _ => format!("agent: ○ {}", link.status().label()),
        };
        let text = format!(
            " DMA Toolkit   {}   {}{}   [Tab] pages   [/] commands   [?] help",
            self.page.title(),
            agent,
            if self.last_error.is_some() {
                "   ⚠ error [E]"
            } else {
                ""
            },
        );
        frame.render_widget(Paragraph::new(text), area);
    }

    fn render_sidebar(&self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = Page::ALL
            .iter()
            .enumerate()
            .map(|(i, page)| {
                let style = if *page == self.page {
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(format!("{} {}", i + 1, page.title())).style(style)
            })
            .collect();

        frame.render_widget(
            List::new(items).block(Block::default().borders(Borders::ALL).title(" Tools ")),
            area,
        );
    }

    fn render_devices(&self, frame: &mut Frame, area: Rect) {
        let mut items = vec![ListItem::new(format!(
            "   {:<18} {:<18} {:<13} {:<10} {}",
            "ID", "TYPE", "PCI ID", "FIRMWARE", "STATUS"
        ))
        .style(Style::default().add_modifier(Modifier::BOLD))];

        for (i, device) in self.session.devices.iter().enumerate() {
            let selected = i == self.selected_device;
            let style = match device.status {
                DeviceStatus::Error => Style::default().fg(Color::Red),
                DeviceStatus::InUse => Style::default().fg(Color::Yellow),
                DeviceStatus::Available if selected => Style::default().fg(Color::Cyan),
                DeviceStatus::Available => Style::default(),
            };
            items.push(
                ListItem::new(format!(
                    "{} {:<18} {:<18} {:<13} {:<10} {}",
                    if selected { ">" } else { " " },
                    device.id,
                    device.kind,
                    device.pci_id(),
                    device.firmware_version,
                    device.status
                ))
                .style(style),
            );
        }

        let title = if self.session.is_scanning() {
            " Device IDs - scanning... ".to_string()
        } else if self.session.devices.is_empty() {
            " Device IDs - none found, press [s] to scan ".to_string()
        } else {
            format!(" Device IDs ({}) ", self.session.devices.len())
        };

        frame.render_widget(
            List::new(items).block(Block::default().borders(Borders::ALL).title(title)),
            area,
        );
    }

    fn render_firmware(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Firmware Flash ");
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let target = self
            .selected_device_id()
            .unwrap_or_else(|| "<no device>".to_string());
        let mut text = format!(
            "Selected device: {target}\n\nPress [f] or type /flash <device> <path> to write a firmware image.\n"
        );

        if let Some(job) = self.session.flash_job() {
            text.push_str(&format!(
                "\nFlashing {} to {} (started {})\n",
                job.firmware,
                job.ticket.device_id,
                job.started_at.format("%H:%M:%S")
            ));
            let gauge_area = Rect::new(
                inner.x,
                inner.y + inner.height.saturating_sub(3),
                inner.width,
                inner.height.min(3),
            );
            frame.render_widget(
                Gauge::default()
                    .block(Block::default().borders(Borders::ALL).title(" Progress "))
                    .gauge_style(Style::default().fg(Color::Cyan))
                    .percent(job.percent() as u16),
                gauge_area,
            );
        } else if let Some(failure) = self.session.last_flash_failure() {
            text.push_str(&format!(
                "\nLast flash of {} to {} failed: {}\nThe device is marked as error. Start a new flash to try again.\n",
                failure.firmware, failure.device_id, failure.reason
            ));
        }

        let text_area = Rect::new(inner.x, inner.y, inner.width, inner.height.saturating_sub(3));
        frame.render_widget(Paragraph::new(text).wrap(Wrap { trim: false }), text_area);
    }

    fn render_throughput(&self, frame: &mut Frame, area: Rect) {
        let mut lines = Vec::new();
        match self.session.throughput_job() {
            Some(job) => {
                let elapsed = (chrono::Utc::now() - job.started_at).num_seconds();
                lines.push(format!(
                    "Testing {}... ({elapsed}s)  [x] cancel",
                    job.ticket.device_id
                ));
            }
            None => lines.push("Press [t] or type /speedtest <device> to start a test.".to_string()),
        }
        lines.push(String::new());
        lines.push(format!(
            "{:<9} {:<18} {:>10} {:>10} {:>9}",
            "TIME", "DEVICE", "READ MB/s", "WRITE MB/s", "LAT ms"
        ));
        for record in self.session.throughput_history() {
            lines.push(format!(
                "{:<9} {:<18} {:>10.1} {:>10.1} {:>9.1}",
                record.timestamp.format("%H:%M:%S"),
                record.device_id,
                record.report.read_mbps,
                record.report.write_mbps,
                record.report.latency_ms
            ));
        }

        frame.render_widget(
            Paragraph::new(lines.join("\n"))
                .block(Block::default().borders(Borders::ALL).title(" Throughput Test ")),
            area,
        );
    }

    fn render_checkup(&self, frame: &mut Frame, area: Rect) {
        let Some(ref report) = self.checkup else {
            frame.render_widget(
                Paragraph::new("Press [r] to run the system checkup.")
                    .block(Block::default().borders(Borders::ALL).title(" System Checkup ")),
                area,
            );
            return;
        };

        let items: Vec<ListItem> = report
            .items
            .iter()
            .map(|item| {
                let color = match item.status {
                    CheckStatus::Passed => Color::Green,
                    CheckStatus::Warning => Color::Yellow,
                    CheckStatus::Failed => Color::Red,
                    CheckStatus::Skipped => Color::DarkGray,
                };
                ListItem::new(format!(
                    "[{:<4}] {:<22} {}",
                    item.status, item.name, item.details
                ))
                .style(Style::default().fg(color))
            })
            .collect();

        frame.render_widget(
            List::new(items).block(Block::default().borders(Borders::ALL).title(format!(
                " System Checkup ({}) - [r] rerun ",
                report.ran_at.format("%H:%M:%S")
            ))),
            area,
        );
    }

    fn render_tools(&self, frame: &mut Frame, area: Rect) {
        let tools = &self.session.tools;
        let mut items = vec![ListItem::new(format!(
            "{:<15} {:<8} {:>7}  {:<15} {}",
            "TOOL", "VERSION", "SIZE", "STATE", "DESCRIPTION"
        ))
        .style(Style::default().add_modifier(Modifier::BOLD))];

        for (idx, entry) in tools.iter().enumerate() {
            let color = match entry.state {
                ToolState::Idle => Color::Reset,
                ToolState::Downloading => Color::Cyan,
                ToolState::Downloaded(_) => Color::Green,
                ToolState::Failed(_) => Color::Red,
            };
            let mut style = Style::default().fg(color);
            if idx == self.selected_tool {
                style = style.add_modifier(Modifier::REVERSED);
            }
            let detail = match entry.state {
                ToolState::Failed(ref reason) => reason.as_str(),
                _ => entry.tool.description.as_str(),
            };
            items.push(
                ListItem::new(format!(
                    "{:<15} {:<8} {:>7}  {:<15} {}",
                    entry.tool.name,
                    entry.tool.version,
                    entry.tool.size,
                    entry.state.label(),
                    detail
                ))
                .style(style),
            );
        }

        let title = format!(
            " Tools {}/{} downloaded - [Enter] download, [a] all ",
            tools.downloaded(),
            tools.len()
        );
        frame.render_widget(
            List::new(items).block(Block::default().borders(Borders::ALL).title(title)),
            area,
        );
    }

    fn render_logs(&self, frame: &mut Frame, area: Rect) {
        let filter = self.log_filter();
        let entries: Vec<_> = self.session.log.filter(&filter).collect();
        let visible = area.height.saturating_sub(2) as usize;
        let scroll = if self.log_view.follow {
            0
        } else {
            self.log_view.scroll.min(entries.len().saturating_sub(visible))
        };
        let end = entries.len().saturating_sub(scroll);
        let start = end.saturating_sub(visible);

        let items: Vec<ListItem> = entries[start..end]
            .iter()
            .map(|entry| {
                let style = match entry.level {
                    LogLevel::Error => Style::default().fg(Color::Red),
                    LogLevel::Warning => Style::default().fg(Color::Yellow),
                    LogLevel::Debug => Style::default().fg(Color::DarkGray),
                    LogLevel::Info => Style::default(),
                };
                ListItem::new(entry.format_line()).style(style)
            })
            .collect();

        let level = self.log_view.level.map(|l| l.as_str()).unwrap_or("ALL");
        let mut title = format!(" Logs [{level}] {}/{} ", entries.len(), self.session.log.len());
        if !self.log_view.search.is_empty() {
            title.push_str(&format!("search: \"{}\" ", self.log_view.search));
        }
        if !self.log_view.follow {
            title.push_str("[paused, End to follow] ");
        }

        frame.render_widget(
            List::new(items).block(Block::default().borders(Borders::ALL).title(title)),
            area,
        );
    }

    fn render_status_panel(&self, frame: &mut Frame, area: Rect) {
        let link = self.session.setup.link();
        let mut text = format!("Agent: {}\n", link.status().label());
        if let Some(handle) = self.session.connection() {
            text.push_str(&format!("Version: {}\n{}\n", handle.agent_version, handle.endpoint));
        }
        if link.status() == AgentStatus::Error {
            if let Some(err) = link.last_error() {
                text.push_str(&format!("Error: {err}\n"));
            }
        }

        let errored = self
            .session
            .devices
            .iter()
            .filter(|d| d.status == DeviceStatus::Error)
            .count();
        text.push_str(&format!(
            "\nDevices: {} ({} in error)\nTasks: {}\n",
            self.session.devices.len(),
            errored,
            self.session.tasks.active()
        ));
        if let Some(job) = self.session.flash_job() {
            text.push_str(&format!("Flash: {}%\n", job.percent()));
        }
        if self.session.throughput_job().is_some() {
            text.push_str("Throughput test running\n");
        }
        let downloading = self.session.tools.downloading();
        if downloading > 0 {
            text.push_str(&format!("Tool downloads: {downloading}\n"));
        }

        text.push_str(&format!(
            "\nLog: {} entries\n  {} errors, {} warnings\n",
            self.session.log.len(),
            self.session.log.count_level(LogLevel::Error),
            self.session.log.count_level(LogLevel::Warning)
        ));
        if let Some(ref msg) = self.status_message {
            text.push_str(&format!("\n{msg}\n"));
        }

        frame.render_widget(
            Paragraph::new(text)
                .wrap(Wrap { trim: true })
                .block(Block::default().borders(Borders::ALL).title(" Status ")),
            area,
        );
    }

    fn render_input_bar(&self, frame: &mut Frame, area: Rect) {
        let (indicator, hint) = match self.input.mode {
            InputMode::Normal => ("[ ]", "press / for commands"),
            InputMode::Command => ("[/]", ""),
            InputMode::Search => ("[?]", ""),
        };
        let text = if self.input.is_active() {
            format!("{indicator} > {}█", self.input.buffer)
        } else {
            format!("{indicator} {hint}")
        };
        let border_style = if self.input.is_active() {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };

        frame.render_widget(
            Paragraph::new(text).block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(border_style),
            ),
            area,
        );
    }

    fn render_error_details(&self, frame: &mut Frame, area: Rect) {
        let popup_area = self.centered_rect(60, 20, area);
        let details = self
            .last_error
            .as_deref()
            .unwrap_or("No error details available.");
        let text = format!("{details}\n\n[Esc] or [Enter] to close");

        frame.render_widget(Clear, popup_area);
        frame.render_widget(
            Paragraph::new(text).wrap(Wrap { trim: true }).block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Error Details "),
            ),
            popup_area,
        );
    }

    fn centered_rect(&self, percent_x: u16, percent_y: u16, r: Rect) -> Rect {
        let popup_layout = ratatui::layout::Layout::default()
            .direction(ratatui::layout::Direction::Vertical)
            .constraints([
                ratatui::layout::Constraint::Percentage((100 - percent_y) / 2),
                ratatui::layout::Constraint::Percentage(percent_y),
                ratatui::layout::Constraint::Percentage((100 - percent_y) / 2),
            ])
            .split(r);

        ratatui::layout::Layout::default()
            .direction(ratatui::layout::Direction::Horizontal)
            .constraints([
                ratatui::layout::Constraint::Percentage((100 - percent_x) / 2),
                ratatui::layout::Constraint::Percentage(percent_x),
                ratatui::layout::Constraint::Percentage((100 - percent_x) / 2),
            ])
            .split(popup_layout[1])[1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn renders_setup_then_tool_pages() {
        let backend = Arc::new(LocalAgent::new(crate::Config::default().runner_config()));
        let mut app = App::new(crate::Config::default(), backend);
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).expect("terminal");

        terminal.draw(|frame| app.render(frame)).expect("draw");
        assert!(buffer_text(&terminal).contains("Download Agent"));

        app.onboarding = None;
        app.session.log.error("System", "Failed to write to address 0x9A400000");
        app.page = Page::Logs;
        terminal.draw(|frame| app.render(frame)).expect("draw");
        let screen = buffer_text(&terminal);
        assert!(screen.contains("Failed to write"));
        assert!(screen.contains("Tools"));

        app.page = Page::Tools;
        terminal.draw(|frame| app.render(frame)).expect("draw");
        let screen = buffer_text(&terminal);
        assert!(screen.contains("0/6 downloaded"));
        assert!(screen.contains("MemProcFS"));
        assert!(screen.contains("not downloaded"));
    }
}
