use dma_toolkit_core::LogLevel;
use std::path::PathBuf;

pub fn process_command(text: &str) -> Option<(String, Vec<String>)> {
    let rest = text.trim().strip_prefix('/')?;

    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.is_empty() {
        return None;
    }

    let command = parts[0].to_string();
    let args = parts[1..].iter().map(|s| s.to_string()).collect();

    Some((command, args))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandType {
    Scan,
    Flash { device_id: String, path: PathBuf },
    SpeedTest { device_id: String },
    Cancel,
    /// `tool == None` downloads every tool not yet on disk.
    Download { tool: Option<String> },
    Checkup,
    ClearLogs,
    Export { path: PathBuf },
    Filter { level: Option<LogLevel> },
    Search { query: String },
    Reset,
    Help,
    Invalid { usage: &'static str },
    Unknown(String),
}

impl CommandType {
    pub fn parse(text: &str) -> Option<Self> {
        let (name, args) = process_command(text)?;
        Some(Self::from_command(&name, &args))
    }

    pub fn from_command(name: &str, args: &[String]) -> Self {
        match name.to_lowercase().as_str() {
            "scan" | "rescan" => Self::Scan,
            "flash" => match args {
                [device_id, path @ ..] if !path.is_empty() => Self::Flash {
                    device_id: device_id.clone(),
                    path: PathBuf::from(path.join(" ")),
                },
                _ => Self::Invalid {
                    usage: "/flash <device> <firmware path>",
                },
            },
            "speedtest" | "throughput" => match args.first() {
                Some(device_id) => Self::SpeedTest {
                    device_id: device_id.clone(),
                },
                None => Self::Invalid {
                    usage: "/speedtest <device>",
                },
            },
            "cancel" | "stop" => Self::Cancel,
            "download" | "dl" => match args {
                [] => Self::Invalid {
                    usage: "/download <tool|all>",
                },
                [all] if all.eq_ignore_ascii_case("all") => Self::Download { tool: None },
                tool => Self::Download {
                    tool: Some(tool.join(" ")),
                },
            },
            "checkup" | "check" => Self::Checkup,
            "clear" => Self::ClearLogs,
            "export" => {
                if args.is_empty() {
                    Self::Invalid {
                        usage: "/export <path>",
                    }
                } else {
                    Self::Export {
                        path: PathBuf::from(args.join(" ")),
                    }
                }
            }
            "filter" => match args.first().map(|s| s.as_str()) {
                None | Some("all") => Self::Filter { level: None },
                Some(level) => match LogLevel::parse(level) {
                    Some(level) => Self::Filter { level: Some(level) },
                    None => Self::Invalid {
                        usage: "/filter <info|warning|error|debug|all>",
                    },
                },
            },
            "search" | "find" => Self::Search {
                query: args.join(" "),
            },
            "reset" => Self::Reset,
            "help" | "?" => Self::Help,
            _ => Self::Unknown(name.to_string()),
        }
    }

    pub fn help_lines() -> &'static [&'static str] {
        &[
            "/scan                      rescan DMA devices",
            "/flash <device> <path>     write a firmware image",
            "/speedtest <device>        run a throughput test",
            "/cancel                    stop the running throughput test",
            "/download <tool|all>       download DMA tools",
            "/checkup                   run the system checkup",
            "/filter <level|all>        filter the log viewer",
            "/search <text>             search the log viewer",
            "/export <path>             save the filtered log",
            "/clear                     clear the log",
            "/reset                     restart agent setup",
        ]
    }
}
