use crate::setup::SetupStep;
use crate::types::DeviceStatus;
use thiserror::Error;

/// Failures reported by the local agent collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("Agent download failed: {0}")]
    DownloadFailed(String),

    #[error("Agent install failed: {0}")]
    InstallFailed(String),

    #[error("Agent connection failed: {0}")]
    ConnectFailed(String),

    #[error("Device scan failed: {0}")]
    ScanFailed(String),

    #[error("Firmware flash failed: {0}")]
    FlashFailed(String),

    #[error("Throughput test failed: {0}")]
    TestFailed(String),

    #[error("Tool download failed: {0}")]
    ToolDownloadFailed(String),
}

impl AgentError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AgentError::DownloadFailed(_) => "Could not download the agent. Check your connection.",
            AgentError::InstallFailed(_) => "Agent installation failed. Re-run the installer.",
            AgentError::ConnectFailed(_) => "Could not reach the agent. Make sure it is running.",
            AgentError::ScanFailed(_) => "Device scan failed. Try scanning again.",
            AgentError::FlashFailed(_) => {
                "Flashing failed. Check the device before starting a new flash."
            }
            AgentError::TestFailed(_) => "Throughput test failed. Try again.",
            AgentError::ToolDownloadFailed(_) => "Could not download the tool. Try again.",
        }
    }

    /// Interrupted firmware writes leave the device in an unknown state, so a
    /// flash failure always needs the user to start over.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AgentError::FlashFailed(_))
    }

    pub fn detail(&self) -> &str {
        match self {
            AgentError::DownloadFailed(msg)
            | AgentError::InstallFailed(msg)
            | AgentError::ConnectFailed(msg)
            | AgentError::ScanFailed(msg)
            | AgentError::FlashFailed(msg)
            | AgentError::TestFailed(msg)
            | AgentError::ToolDownloadFailed(msg) => msg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Step {0} is not complete yet")]
    StepNotReady(SetupStep),

    #[error("Expected step {expected}, but setup is at {current}")]
    WrongStep {
        expected: SetupStep,
        current: SetupStep,
    },

    #[error("An action is already in progress for {0}")]
    ActionInProgress(String),

    #[error("External action failed: {0}")]
    ExternalActionFailed(String),

    #[error("Duplicate device id in scan: {0}")]
    DuplicateDeviceId(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Agent is not connected")]
    NotConnected,

    #[error("Device {id} is {status}")]
    DeviceBusy { id: String, status: DeviceStatus },

    #[error("Invalid firmware image: {0}")]
    InvalidFirmware(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{0} is already downloaded")]
    ToolAlreadyDownloaded(String),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl SessionError {
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::StepNotReady(_) => "Finish the current step first.",
            SessionError::WrongStep { .. } => "That action belongs to a different setup step.",
            SessionError::ActionInProgress(_) => "Please wait for the current action to finish.",
            SessionError::ExternalActionFailed(_) => "The agent action failed. You can retry.",
            SessionError::DuplicateDeviceId(_) => "The agent reported conflicting devices.",
            SessionError::NotFound(_) => "That device is no longer available.",
            SessionError::NotConnected => "Connect the agent from the setup page first.",
            SessionError::DeviceBusy { .. } => "The device is busy or in an error state.",
            SessionError::InvalidFirmware(_) => "Select a valid firmware file.",
            SessionError::UnknownTool(_) => "No tool by that name. See the Tools page.",
            SessionError::ToolAlreadyDownloaded(_) => "That tool is already downloaded.",
            SessionError::Agent(e) => e.user_message(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Agent(e) => e.is_retryable(),
            SessionError::DuplicateDeviceId(_) | SessionError::InvalidFirmware(_) => false,
            _ => true,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_failures_are_never_retryable() {
        assert!(!AgentError::FlashFailed("device disconnected".into()).is_retryable());
        assert!(AgentError::ScanFailed("timeout".into()).is_retryable());
        assert!(!SessionError::Agent(AgentError::FlashFailed("x".into())).is_retryable());
    }

    #[test]
    fn step_errors_render_step_names() {
        let err = SessionError::WrongStep {
            expected: SetupStep::InstallAgent,
            current: SetupStep::DownloadAgent,
        };
        assert_eq!(
            err.to_string(),
            "Expected step Install Agent, but setup is at Download Agent"
        );
    }
}
