//! Tick recorder.
//!
//! Connects to the vendor trading-data API, authorizes the application and
//! each configured account, discovers symbols, subscribes to spot prices and
//! records every bid/ask change to per-symbol CSV day files.

pub mod accounts;
pub mod activity;
pub mod app;
pub mod config;
pub mod console;
pub mod error;
pub mod manager;
pub mod state;

pub use accounts::AccountArena;
pub use activity::ActivityLog;
pub use app::Application;
pub use config::{ActivityLogConfig, AppConfig};
pub use error::{AppError, AppResult};
pub use manager::{ApiCredentials, ConnectionManager, SessionEnd};
pub use state::{AccountPhase, ConnectionState};
