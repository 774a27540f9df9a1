//! Tracing subscriber setup for the `fers` binary.
//!
//! `FERS_LOG` takes an `EnvFilter` directive such as `debug` or
//! `fers::storage=trace`; without it only `info` and above are kept.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("FERS_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Where batch runs write their log files when journald is not available
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fers")
        .join("logs")
}

/// Send prediction logs to the system journal, or to `fers.log` in
/// `log_dir` (rotated daily) when no journal socket is reachable.
pub fn init(log_dir: &Path) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(journald_layer)
                .try_init()?;

            tracing::info!("Logging to journald");
            return Ok(());
        }
    }

    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "fers.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()?;

    tracing::info!(dir = ?log_dir, "Logging to file");
    Ok(())
}

/// Plain stderr output for `--verbose` runs.
pub fn init_stderr() -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()?;
    Ok(())
}
