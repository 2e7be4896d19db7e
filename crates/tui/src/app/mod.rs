use crate::input::{InputMode, InputState};
use crate::keybinds::Keybinds;
use crate::onboarding::{OnboardingAction, OnboardingState};
use crate::ui::layout::{Divider, LayoutState};
use crate::Config;
use anyhow::Result;
use dma_toolkit_agent::{AgentEvent, CommandType, LocalAgent};
use dma_toolkit_core::checkup::{run_checkup, CheckStatus};
use dma_toolkit_core::{
    AgentBackend, AgentStatus, DeviceStatus, FirmwareImage, LogFilter, LogLevel, Platform,
    Resolution, Session, SessionError, SetupStep, ToolState, ToolTicket,
};
use ratatui::crossterm::event::{
    Event, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use ratatui::layout::Rect;
use ratatui::Frame;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod actions;
mod effects;
mod input;
mod render;
mod state;
mod types;

pub use state::App;
pub use types::{AppAsyncEvent, CheckupReport, LogView, Page};

impl App {
    pub(super) fn report_error(&mut self, context: &str, error: impl std::fmt::Display) {
        let message = format!("{context}: {error}");
        self.last_error = Some(message.clone());
        tracing::warn!("{message}");
    }

    pub(super) fn clear_error(&mut self) {
        self.last_error = None;
        self.show_error_details = false;
    }

    /// Runs `future` as a session task and feeds its result back through
    /// `process_events`. Reset cancels it.
    pub(super) fn spawn_app_task<F>(&mut self, future: F) -> Option<CancellationToken>
    where
        F: Future<Output = AppAsyncEvent> + Send + 'static,
    {
        let tx = self.app_async_tx.clone()?;
        Some(self.session.tasks.spawn(async move {
            let event = future.await;
            let _ = tx.send(event);
        }))
    }
}
