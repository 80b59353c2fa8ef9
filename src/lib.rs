pub mod adapter;
pub mod commands;
pub mod defaults;
pub mod errors;
pub mod favicon;
pub mod import;
pub mod models;
pub mod ops;
pub mod planner;
pub mod resolver;
pub mod store;

pub use adapter::DocSession;
pub use errors::{AppError, AppResult};
pub use models::{Address, NavTree};
pub use store::Database;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Wires the global subscriber: env-filtered JSON lines rolled daily under
/// `<data_dir>/logs`. Call once per process.
pub fn init_logging(data_dir: &Path) -> Result<(), String> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "linkboard.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
