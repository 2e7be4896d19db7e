use ratatui::layout::{Constraint, Direction, Layout, Rect};

const MIN_SIDEBAR_WIDTH: u16 = 14;
const MAX_SIDEBAR_WIDTH: u16 = 30;
const MIN_STATUS_WIDTH: u16 = 24;
const MAX_STATUS_WIDTH: u16 = 44;
const TOPBAR_HEIGHT: u16 = 1;
const INPUT_HEIGHT: u16 = 3;

/// Draggable edges between the content columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divider {
    Sidebar,
    Status,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Panels {
    pub topbar: Rect,
    pub sidebar: Rect,
    pub main: Rect,
    pub status: Rect,
    pub input: Rect,
}

/// Column widths plus the panels from the most recent `split`, which mouse
/// hit testing reads between frames.
pub struct LayoutState {
    sidebar_width: u16,
    status_width: u16,
    panels: Panels,
}

impl Default for LayoutState {
    fn default() -> Self {
        Self {
            sidebar_width: 18,
            status_width: 30,
            panels: Panels::default(),
        }
    }
}

impl LayoutState {
    pub fn split(&mut self, area: Rect) -> Panels {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(TOPBAR_HEIGHT),
                Constraint::Min(1),
                Constraint::Length(INPUT_HEIGHT),
            ])
            .split(area);

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length(self.sidebar_width),
                Constraint::Min(30),
                Constraint::Length(self.status_width),
            ])
            .split(rows[1]);

        self.panels = Panels {
            topbar: rows[0],
            sidebar: columns[0],
            main: columns[1],
            status: columns[2],
            input: rows[2],
        };
        self.panels
    }

    pub fn panels(&self) -> Panels {
        self.panels
    }

    /// Moves a divider by `delta` columns. Takes effect on the next `split`.
    pub fn resize(&mut self, divider: Divider, delta: i16) {
        match divider {
            Divider::Sidebar => {
                self.sidebar_width = (self.sidebar_width as i16 + delta)
                    .clamp(MIN_SIDEBAR_WIDTH as i16, MAX_SIDEBAR_WIDTH as i16)
                    as u16;
            }
            Divider::Status => {
                self.status_width = (self.status_width as i16 - delta)
                    .clamp(MIN_STATUS_WIDTH as i16, MAX_STATUS_WIDTH as i16)
                    as u16;
            }
        }
    }
}
