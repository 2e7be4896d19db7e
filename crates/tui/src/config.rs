use anyhow::{Context, Result};
use directories::ProjectDirs;
use dma_toolkit_agent::local::DEFAULT_TOOLS_BASE;
use dma_toolkit_agent::{RunnerConfig, ToolStore};
use dma_toolkit_core::DEFAULT_LOG_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PORT_ENV: &str = "DMA_AGENT_PORT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub logs: LogsConfig,
    pub flash: FlashConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub binary_name: String,
    pub download_base: String,
    pub port: u16,
    pub connect_timeout_seconds: u64,
    pub auto_connect: bool,
    /// Overrides the per-user data directory the agent is installed into.
    pub install_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub capacity: usize,
    /// Stream the agent's own log records into the log viewer.
    pub follow: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub download_base: String,
    /// Defaults to `tools/` under the agent install directory.
    pub dir: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            download_base: DEFAULT_TOOLS_BASE.to_string(),
            dir: None,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary_name: "dma-agent".to_string(),
            download_base: "https://downloads.dma-toolkit.dev/agent/latest".to_string(),
            port: 7420,
            connect_timeout_seconds: 15,
            auto_connect: false,
            install_dir: None,
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOG_CAPACITY,
            follow: true,
        }
    }
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "dma-toolkit", "dma-toolkit")
}

pub fn config_path() -> PathBuf {
    if let Some(proj_dirs) = project_dirs() {
        proj_dirs.config_dir().join("config.toml")
    } else {
        PathBuf::from("config/default.toml")
    }
}

pub fn data_dir() -> PathBuf {
    if let Some(proj_dirs) = project_dirs() {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from(".dma-toolkit")
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if path.exists() {
                    tracing::warn!("{e:#}; using defaults");
                }
                Self::default()
            }
        }
    }

    /// Applies environment overrides, normally read after `.env` is loaded.
    pub fn with_env(mut self) -> Self {
        self.apply_port_override(std::env::var(PORT_ENV).ok().as_deref());
        self
    }

    pub fn apply_port_override(&mut self, value: Option<&str>) {
        let Some(value) = value else {
            return;
        };
        match value.trim().parse::<u16>() {
            Ok(port) if port > 0 => self.agent.port = port,
            _ => tracing::warn!("Ignoring {PORT_ENV}={value:?}: not a port number"),
        }
    }

    pub fn install_dir(&self) -> PathBuf {
        self.agent
            .install_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("agent"))
    }

    pub fn tool_store(&self) -> ToolStore {
        let dir = self
            .tools
            .dir
            .clone()
            .unwrap_or_else(|| self.install_dir().join("tools"));
        ToolStore::new(dir, self.tools.download_base.clone())
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            install_dir: self.install_dir(),
            binary_name: self.agent.binary_name.clone(),
            download_base: self.agent.download_base.clone(),
            port: self.agent.port,
            connect_timeout: Duration::from_secs(self.agent.connect_timeout_seconds.max(1)),
        }
    }
}
