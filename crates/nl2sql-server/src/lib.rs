//! HTTP façade over the NL-to-SQL pipeline.

pub mod handlers;
pub mod logging;
pub mod server;
pub mod settings;
pub mod state;

pub use server::{configure, run_server};
pub use settings::{Settings, SettingsError};
pub use state::AppState;
