use crate::error::{AgentError, SessionError, SessionResult};
use crate::link::{AgentLink, AgentStatus};
use crate::log::NotificationLog;
use std::fmt;
use tracing::{debug, info, warn};

const LOG_SOURCE: &str = "Setup";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SetupStep {
    DownloadAgent,
    InstallAgent,
    ConnectAgent,
    Ready,
}

impl SetupStep {
    pub const ALL: [SetupStep; 4] = [
        SetupStep::DownloadAgent,
        SetupStep::InstallAgent,
        SetupStep::ConnectAgent,
        SetupStep::Ready,
    ];

    pub fn index(self) -> usize {
        match self {
            SetupStep::DownloadAgent => 0,
            SetupStep::InstallAgent => 1,
            SetupStep::ConnectAgent => 2,
            SetupStep::Ready => 3,
        }
    }

    pub fn next(self) -> Self {
        match self {
            SetupStep::DownloadAgent => SetupStep::InstallAgent,
            SetupStep::InstallAgent => SetupStep::ConnectAgent,
            SetupStep::ConnectAgent | SetupStep::Ready => SetupStep::Ready,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            SetupStep::DownloadAgent => "Download Agent",
            SetupStep::InstallAgent => "Install Agent",
            SetupStep::ConnectAgent => "Connect Agent",
            SetupStep::Ready => "Start Using DMA Toolkit",
        }
    }

    // (in flight, done)
    fn action_statuses(self) -> Option<(AgentStatus, AgentStatus)> {
        match self {
            SetupStep::DownloadAgent => Some((AgentStatus::Downloading, AgentStatus::Downloaded)),
            SetupStep::InstallAgent => Some((AgentStatus::Installing, AgentStatus::Installed)),
            SetupStep::ConnectAgent => Some((AgentStatus::Connecting, AgentStatus::Connected)),
            SetupStep::Ready => None,
        }
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupStep::Ready => f.write_str("Ready"),
            step => f.write_str(step.title()),
        }
    }
}

/// Issued when a gated action starts. Results carrying a ticket from an
/// older epoch are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionTicket {
    pub epoch: u64,
    pub step: SetupStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Applied,
    Stale,
}

#[derive(Debug, Clone)]
pub struct SetupController {
    step: SetupStep,
    link: AgentLink,
    pending: Option<SetupStep>,
    epoch: u64,
}

impl Default for SetupController {
    fn default() -> Self {
        Self::new()
    }
}

impl SetupController {
    pub fn new() -> Self {
        Self {
            step: SetupStep::DownloadAgent,
            link: AgentLink::new(),
            pending: None,
            epoch: 0,
        }
    }

    pub fn current_step(&self) -> SetupStep {
        self.step
    }

    pub fn link(&self) -> &AgentLink {
        &self.link
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn pending(&self) -> Option<SetupStep> {
        self.pending
    }

    pub fn is_ready(&self) -> bool {
        self.step == SetupStep::Ready
    }

    pub fn is_complete(&self, step: SetupStep) -> bool {
        match step {
            SetupStep::DownloadAgent => self.link.reached(AgentStatus::Downloaded),
            SetupStep::InstallAgent => self.link.reached(AgentStatus::Installed),
            SetupStep::ConnectAgent => self.link.is_connected(),
            SetupStep::Ready => self.step == SetupStep::Ready,
        }
    }

    pub fn completed_steps(&self) -> usize {
        SetupStep::ALL
            .iter()
            .filter(|step| self.is_complete(**step))
            .count()
    }

    pub fn request_download(&mut self, log: &mut NotificationLog) -> SessionResult<ActionTicket> {
        self.begin(SetupStep::DownloadAgent, &[AgentStatus::Unknown], log)
    }

    pub fn request_install(&mut self, log: &mut NotificationLog) -> SessionResult<ActionTicket> {
        self.begin(SetupStep::InstallAgent, &[AgentStatus::Downloaded], log)
    }

    pub fn request_connect(&mut self, log: &mut NotificationLog) -> SessionResult<ActionTicket> {
        self.begin(SetupStep::ConnectAgent, &[AgentStatus::Installed], log)
    }

    fn begin(
        &mut self,
        step: SetupStep,
        allowed: &[AgentStatus],
        log: &mut NotificationLog,
    ) -> SessionResult<ActionTicket> {
        if self.pending == Some(step) {
            return Err(SessionError::ActionInProgress(step.to_string()));
        }
        if self.step != step {
            return Err(SessionError::WrongStep {
                expected: step,
                current: self.step,
            });
        }
        let Some((in_flight, _)) = step.action_statuses() else {
            return Err(SessionError::StepNotReady(step));
        };

        let status = self.link.status();
        if status != AgentStatus::Error && !allowed.contains(&status) {
            return Err(SessionError::StepNotReady(step));
        }

        if status == AgentStatus::Error {
            debug!(%step, "clearing agent error before retry");
            self.link.clear_error();
        }
        self.link
            .transition(in_flight)
            .map_err(|e| SessionError::ExternalActionFailed(e.to_string()))?;
        self.pending = Some(step);

        info!(%step, epoch = self.epoch, "setup action started");
        log.info(LOG_SOURCE, format!("{}: started", step.title()));
        Ok(ActionTicket {
            epoch: self.epoch,
            step,
        })
    }

    /// Failures put the link into error and leave the step where it is.
    pub fn resolve(
        &mut self,
        ticket: ActionTicket,
        outcome: Result<(), AgentError>,
        log: &mut NotificationLog,
    ) -> SessionResult<Resolution> {
        if ticket.epoch != self.epoch || self.pending != Some(ticket.step) {
            debug!(?ticket, epoch = self.epoch, "discarding stale setup result");
            return Ok(Resolution::Stale);
        }
        self.pending = None;

        let Some((_, done)) = ticket.step.action_statuses() else {
            return Ok(Resolution::Stale);
        };

        match outcome {
            Ok(()) => {
                self.link
                    .transition(done)
                    .map_err(|e| SessionError::ExternalActionFailed(e.to_string()))?;
                info!(step = %ticket.step, status = %done, "setup action finished");
                log.info(LOG_SOURCE, format!("{}: {}", ticket.step.title(), done));
                Ok(Resolution::Applied)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(step = %ticket.step, error = %message, "setup action failed");
                self.link.fail(message.clone());
                log.error(LOG_SOURCE, message.clone());
                Err(SessionError::ExternalActionFailed(message))
            }
        }
    }

    pub fn advance(&mut self, log: &mut NotificationLog) -> SessionResult<SetupStep> {
        if self.step == SetupStep::Ready {
            return Ok(self.step);
        }
        if !self.is_complete(self.step) {
            return Err(SessionError::StepNotReady(self.step));
        }
        self.step = self.step.next();
        info!(step = %self.step, "setup advanced");
        log.info(LOG_SOURCE, format!("Now at step: {}", self.step.title()));
        Ok(self.step)
    }

    pub fn clear_error(&mut self, log: &mut NotificationLog) {
        if self.link.status() != AgentStatus::Error {
            return;
        }
        self.link.clear_error();
        info!(status = %self.link.status(), "setup error cleared");
        log.info(
            LOG_SOURCE,
            format!("Error cleared, agent status: {}", self.link.status()),
        );
    }

    pub fn reset(&mut self, log: &mut NotificationLog) {
        self.step = SetupStep::DownloadAgent;
        self.link = AgentLink::new();
        self.pending = None;
        self.epoch += 1;
        info!(epoch = self.epoch, "setup reset");
        log.info(LOG_SOURCE, "Setup restarted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(
        controller: &mut SetupController,
        log: &mut NotificationLog,
        step: SetupStep,
    ) -> ActionTicket {
        let ticket = match step {
            SetupStep::DownloadAgent => controller.request_download(log),
            SetupStep::InstallAgent => controller.request_install(log),
            SetupStep::ConnectAgent => controller.request_connect(log),
            SetupStep::Ready => panic!("ready has no action"),
        }
        .expect("request accepted");
        assert_eq!(
            controller.resolve(ticket, Ok(()), log),
            Ok(Resolution::Applied)
        );
        ticket
    }

    #[test]
    fn download_then_advance_reaches_install() {
        let mut controller = SetupController::new();
        let mut log = NotificationLog::default();

        complete(&mut controller, &mut log, SetupStep::DownloadAgent);
        assert_eq!(controller.current_step(), SetupStep::DownloadAgent);
        assert_eq!(controller.link().status(), AgentStatus::Downloaded);

        assert_eq!(controller.advance(&mut log), Ok(SetupStep::InstallAgent));
    }

    #[test]
    fn advance_before_install_resolves_is_rejected() {
        let mut controller = SetupController::new();
        let mut log = NotificationLog::default();
        complete(&mut controller, &mut log, SetupStep::DownloadAgent);
        controller.advance(&mut log).expect("advance to install");

        let _ticket = controller.request_install(&mut log).expect("install");
        let before = controller.clone();
        assert_eq!(
            controller.advance(&mut log),
            Err(SessionError::StepNotReady(SetupStep::InstallAgent))
        );
        assert_eq!(controller.current_step(), before.current_step());
        assert_eq!(controller.link(), before.link());
    }

    #[test]
    fn advance_without_completion_is_a_no_op() {
        let mut controller = SetupController::new();
        let mut log = NotificationLog::default();
        for _ in 0..3 {
            assert_eq!(
                controller.advance(&mut log),
                Err(SessionError::StepNotReady(SetupStep::DownloadAgent))
            );
        }
        assert_eq!(controller.current_step(), SetupStep::DownloadAgent);
        assert_eq!(controller.link().status(), AgentStatus::Unknown);
    }

    #[test]
    fn full_flow_reaches_ready_and_stays_there() {
        let mut controller = SetupController::new();
        let mut log = NotificationLog::default();
        let mut last_index = controller.current_step().index();

        for step in [
            SetupStep::DownloadAgent,
            SetupStep::InstallAgent,
            SetupStep::ConnectAgent,
        ] {
            complete(&mut controller, &mut log, step);
            controller.advance(&mut log).expect("advance");
            assert!(controller.current_step().index() >= last_index);
            last_index = controller.current_step().index();
        }

        assert!(controller.is_ready());
        assert_eq!(controller.completed_steps(), 4);
        assert_eq!(controller.advance(&mut log), Ok(SetupStep::Ready));
        assert!(controller.link().is_connected());
    }

    #[test]
    fn second_request_while_pending_is_rejected() {
        let mut controller = SetupController::new();
        let mut log = NotificationLog::default();
        controller.request_download(&mut log).expect("first");
        assert!(matches!(
            controller.request_download(&mut log),
            Err(SessionError::ActionInProgress(_))
        ));
    }

    #[test]
    fn request_for_another_step_is_rejected() {
        let mut controller = SetupController::new();
        let mut log = NotificationLog::default();
        assert_eq!(
            controller.request_install(&mut log),
            Err(SessionError::WrongStep {
                expected: SetupStep::InstallAgent,
                current: SetupStep::DownloadAgent,
            })
        );
    }

    #[test]
    fn failure_keeps_step_and_allows_retry() {
        let mut controller = SetupController::new();
        let mut log = NotificationLog::default();
        complete(&mut controller, &mut log, SetupStep::DownloadAgent);
        controller.advance(&mut log).expect("advance");
        complete(&mut controller, &mut log, SetupStep::InstallAgent);
        controller.advance(&mut log).expect("advance");

        let ticket = controller.request_connect(&mut log).expect("connect");
        let result = controller.resolve(
            ticket,
            Err(AgentError::ConnectFailed("connection refused".into())),
            &mut log,
        );
        assert!(matches!(result, Err(SessionError::ExternalActionFailed(_))));
        assert_eq!(controller.current_step(), SetupStep::ConnectAgent);
        assert_eq!(controller.link().status(), AgentStatus::Error);
        assert!(controller
            .link()
            .last_error()
            .is_some_and(|e| e.contains("connection refused")));
        assert!(controller.is_complete(SetupStep::InstallAgent));

        complete(&mut controller, &mut log, SetupStep::ConnectAgent);
        assert_eq!(controller.advance(&mut log), Ok(SetupStep::Ready));
    }

    #[test]
    fn download_cannot_be_repeated_once_complete() {
        let mut controller = SetupController::new();
        let mut log = NotificationLog::default();
        complete(&mut controller, &mut log, SetupStep::DownloadAgent);
        assert_eq!(
            controller.request_download(&mut log),
            Err(SessionError::StepNotReady(SetupStep::DownloadAgent))
        );
    }

    #[test]
    fn reset_discards_in_flight_results() {
        let mut controller = SetupController::new();
        let mut log = NotificationLog::default();
        let ticket = controller.request_download(&mut log).expect("download");

        controller.reset(&mut log);
        assert_eq!(
            controller.resolve(ticket, Ok(()), &mut log),
            Ok(Resolution::Stale)
        );
        assert_eq!(controller.link().status(), AgentStatus::Unknown);
        assert_eq!(controller.current_step(), SetupStep::DownloadAgent);
    }

    #[test]
    fn setup_actions_are_logged() {
        let mut controller = SetupController::new();
        let mut log = NotificationLog::default();
        complete(&mut controller, &mut log, SetupStep::DownloadAgent);
        assert!(log.iter().all(|e| e.source == "Setup"));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn clearing_an_error_is_logged_and_restores_status() {
        let mut controller = SetupController::new();
        let mut log = NotificationLog::default();
        let ticket = controller.request_download(&mut log).expect("download");
        let _ = controller.resolve(
            ticket,
            Err(AgentError::DownloadFailed("404".into())),
            &mut log,
        );
        let before = log.len();

        controller.clear_error(&mut log);
        assert_eq!(controller.link().status(), AgentStatus::Unknown);
        assert_eq!(log.len(), before + 1);
        let entry = log.latest().expect("entry");
        assert_eq!(entry.source, "Setup");
        assert!(entry.message.contains("Error cleared"));

        controller.clear_error(&mut log);
        assert_eq!(log.len(), before + 1);
    }
}
