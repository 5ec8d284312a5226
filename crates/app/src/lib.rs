/// Terminal shell: wiring, REPL loop, incremental echo.
pub mod app;
/// Chat domain: stream state machine, accumulator, controller, viewport.
pub mod chat;
/// Settings file + environment fallback.
pub mod config;

pub use app::ChatApp;
pub use config::{ProviderSettings, SettingsStore};
