pub mod config;
pub mod db;
pub mod ensemble;
pub mod errors;
pub mod features;
pub mod forecast;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod priority;
pub mod report;
pub mod risk;
pub mod tracker;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs JSON logging into a daily rolling file under `log_dir`.
pub fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "sprint-analytics.log");
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
