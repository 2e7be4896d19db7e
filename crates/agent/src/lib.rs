pub mod commands;
pub mod events;
pub mod gateway;
pub mod local;
mod retry;
pub mod runner;
pub mod tools;

pub use commands::CommandType;
pub use events::{AgentEvent, EventStream};
pub use gateway::GatewayClient;
pub use local::LocalAgent;
pub use runner::{AgentRunner, RunnerConfig};
pub use tools::ToolStore;
