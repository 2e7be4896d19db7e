pub mod app;
pub mod config;
pub mod input;
pub mod keybinds;
pub mod logging;
pub mod onboarding;
pub mod ui;

pub use config::Config;
