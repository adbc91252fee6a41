use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::BotError;

pub const LOG_FILE_NAME: &str = "kenmabot.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn log_file_path(log_dir: &str) -> PathBuf {
    Path::new(log_dir).join(LOG_FILE_NAME)
}

/// Console-only logging, filtered by `RUST_LOG` (default `info`).
pub fn init_console_logging() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Console logging plus an append-only `<log_dir>/kenmabot.log`.
pub fn init_logging(log_dir: &str) -> Result<(), BotError> {
    std::fs::create_dir_all(log_dir)?;
    let path = log_file_path(log_dir);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(|e| BotError::Config(format!("Failed to initialize logging: {e}")))?;
    Ok(())
}
