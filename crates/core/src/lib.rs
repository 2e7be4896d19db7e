pub mod backend;
pub mod checkup;
pub mod error;
pub mod link;
pub mod log;
pub mod registry;
pub mod session;
pub mod setup;
pub mod tasks;
pub mod tools;
pub mod types;

pub use backend::{progress_channel, AgentBackend, ProgressSink, ProgressWatch};
pub use error::{AgentError, SessionError, SessionResult};
pub use link::{AgentLink, AgentStatus};
pub use log::{LogFilter, NotificationLog, DEFAULT_LOG_CAPACITY};
pub use registry::DeviceRegistry;
pub use session::{FlashRequest, JobTicket, Session};
pub use setup::{ActionTicket, Resolution, SetupController, SetupStep};
pub use tools::{Tool, ToolCatalog, ToolEntry, ToolState, ToolTicket};
pub use types::*;
