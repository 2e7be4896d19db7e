use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AgentStatus {
    Unknown,
    Downloading,
    Downloaded,
    Installing,
    Installed,
    Connecting,
    Connected,
    Error,
}

impl AgentStatus {
    pub fn label(self) -> &'static str {
        match self {
            AgentStatus::Unknown => "not installed",
            AgentStatus::Downloading => "downloading",
            AgentStatus::Downloaded => "downloaded",
            AgentStatus::Installing => "installing",
            AgentStatus::Installed => "installed",
            AgentStatus::Connecting => "connecting",
            AgentStatus::Connected => "connected",
            AgentStatus::Error => "error",
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(
            self,
            AgentStatus::Downloading | AgentStatus::Installing | AgentStatus::Connecting
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTransitionError {
    pub from: AgentStatus,
    pub to: AgentStatus,
}

impl fmt::Display for LinkTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent link cannot move from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for LinkTransitionError {}

// `status` only moves forward. Clearing `Error` restores the settled status
// recorded in `high_water`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLink {
    status: AgentStatus,
    last_error: Option<String>,
    high_water: AgentStatus,
}

impl Default for AgentLink {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentLink {
    pub fn new() -> Self {
        Self {
            status: AgentStatus::Unknown,
            last_error: None,
            high_water: AgentStatus::Unknown,
        }
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn reached(&self, status: AgentStatus) -> bool {
        self.high_water >= status
    }

    pub fn is_connected(&self) -> bool {
        self.status == AgentStatus::Connected
    }

    pub fn transition(&mut self, to: AgentStatus) -> Result<(), LinkTransitionError> {
        if to == AgentStatus::Error || self.status == AgentStatus::Error || to < self.status {
            return Err(LinkTransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to > self.high_water {
            self.high_water = to;
        }
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = AgentStatus::Error;
        self.last_error = Some(message.into());
    }

    // In-flight statuses fall back to the last settled one.
    pub fn clear_error(&mut self) {
        if self.status != AgentStatus::Error {
            return;
        }
        self.last_error = None;
        self.status = match self.high_water {
            AgentStatus::Downloading => AgentStatus::Unknown,
            AgentStatus::Installing => AgentStatus::Downloaded,
            AgentStatus::Connecting => AgentStatus::Installed,
            settled => settled,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_only_move_forward() {
        let mut link = AgentLink::new();
        link.transition(AgentStatus::Downloading).expect("downloading");
        link.transition(AgentStatus::Downloaded).expect("downloaded");
        let err = link
            .transition(AgentStatus::Downloading)
            .expect_err("backwards move");
        assert_eq!(err.from, AgentStatus::Downloaded);
        assert_eq!(link.status(), AgentStatus::Downloaded);
    }

    #[test]
    fn error_must_be_cleared_before_progress() {
        let mut link = AgentLink::new();
        link.transition(AgentStatus::Downloading).expect("downloading");
        link.fail("network unreachable");
        assert_eq!(link.last_error(), Some("network unreachable"));
        assert!(link.transition(AgentStatus::Downloaded).is_err());

        link.clear_error();
        assert_eq!(link.status(), AgentStatus::Unknown);
        assert_eq!(link.last_error(), None);
        link.transition(AgentStatus::Downloading).expect("retry");
    }

    #[test]
    fn clearing_error_keeps_settled_progress() {
        let mut link = AgentLink::new();
        for status in [
            AgentStatus::Downloading,
            AgentStatus::Downloaded,
            AgentStatus::Installing,
            AgentStatus::Installed,
            AgentStatus::Connecting,
        ] {
            link.transition(status).expect("forward");
        }
        link.fail("refused");
        assert!(link.reached(AgentStatus::Installed));

        link.clear_error();
        assert_eq!(link.status(), AgentStatus::Installed);
    }
}
