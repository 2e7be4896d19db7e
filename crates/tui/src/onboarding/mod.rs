use dma_toolkit_core::{AgentStatus, Platform, SetupController, SetupStep};

/// What Enter does on the current setup screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingAction {
    Download,
    Install,
    Connect,
    Advance,
    Finish,
    Wait,
}

pub struct OnboardingState {
    pub platform: Platform,
    pub error_message: Option<String>,
}

impl Default for OnboardingState {
    fn default() -> Self {
        Self::new()
    }
}

impl OnboardingState {
    pub fn new() -> Self {
        Self {
            platform: Platform::current(),
            error_message: None,
        }
    }

    pub fn next_platform(&mut self) {
        self.platform = self.platform.next();
    }

    pub fn previous_platform(&mut self) {
        // Three platforms: two steps forward is one back.
        self.platform = self.platform.next().next();
    }

    pub fn primary_action(controller: &SetupController) -> OnboardingAction {
        let step = controller.current_step();
        if controller.pending().is_some() {
            return OnboardingAction::Wait;
        }
        if step == SetupStep::Ready {
            return OnboardingAction::Finish;
        }
        if controller.is_complete(step) {
            return OnboardingAction::Advance;
        }
        match step {
            SetupStep::DownloadAgent => OnboardingAction::Download,
            SetupStep::InstallAgent => OnboardingAction::Install,
            SetupStep::ConnectAgent => OnboardingAction::Connect,
            SetupStep::Ready => OnboardingAction::Finish,
        }
    }

    pub fn screen_text(&self, controller: &SetupController) -> String {
        let step = controller.current_step();
        let link = controller.link();
        let mut text = String::from("\n");

        for s in SetupStep::ALL {
            let marker = if controller.is_complete(s) && s != step {
                "[x]"
            } else if s == step {
                "[>]"
            } else {
                "[ ]"
            };
            text.push_str(&format!("  {marker} {}. {}\n", s.index() + 1, s.title()));
        }
        text.push('\n');

        let body = match step {
            SetupStep::DownloadAgent => {
                let mut body = format!(
                    "  The DMA agent talks to your hardware on this machine.\n\n  Platform: < {} >\n",
                    self.platform
                );
                if self.platform != Platform::current() {
                    body.push_str(&format!(
                        "  Only the {} build can be installed here.\n",
                        Platform::current()
                    ));
                }
                body
            }
            SetupStep::InstallAgent => {
                "  Install the downloaded agent and verify that it runs.\n".to_string()
            }
            SetupStep::ConnectAgent => {
                "  Start the agent and establish a local connection.\n".to_string()
            }
            SetupStep::Ready => {
                "  Setup complete. The agent is connected and the tools are unlocked.\n"
                    .to_string()
            }
        };
        text.push_str(&body);
        text.push_str(&format!("\n  Agent status: {}\n", link.status().label()));

        if link.status() == AgentStatus::Error {
            if let Some(err) = link.last_error() {
                text.push_str(&format!("\n  Error: {err}\n  Press [Enter] to retry, [c] to clear\n"));
            }
        }
        if let Some(ref msg) = self.error_message {
            text.push_str(&format!("\n  {msg}\n"));
        }

        let hint = match Self::primary_action(controller) {
            OnboardingAction::Download => "[Enter] download agent  [←/→] platform",
            OnboardingAction::Install => "[Enter] install agent",
            OnboardingAction::Connect => "[Enter] connect to agent",
            OnboardingAction::Advance => "[Enter] continue",
            OnboardingAction::Finish => "[Enter] open the toolkit",
            OnboardingAction::Wait => "working...",
        };
        text.push_str(&format!("\n  {hint}   [Esc] quit\n"));
        text
    }
}
