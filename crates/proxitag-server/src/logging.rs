//! Logging initialization.
//!
//! Driven by [`ServerConfig`]:
//! - `production = false`: pretty stdout with span open/close events.
//! - `production = true`: JSON lines in a daily-rolling `proxitag.*` file
//!   plus compact, colourless stdout for the journal.
//!
//! The filter is taken from `RUST_LOG`, then `PROXITAG_LOG_LEVEL`, then
//! `log_level`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use proxitag_core::ServerConfig;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable overriding the configured log level.
pub const LOG_LEVEL_ENV: &str = "PROXITAG_LOG_LEVEL";

const LOG_FILE_PREFIX: &str = "proxitag";

/// Flush guards for the non-blocking writers; dropping them loses buffered lines.
static WRITER_GUARDS: OnceLock<[WorkerGuard; 2]> = OnceLock::new();

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns an error if the filter does not parse, the log directory cannot
/// be created, or a subscriber is already installed.
pub fn init(config: &ServerConfig) -> anyhow::Result<()> {
    let filter = env_filter(&config.log_level)?;
    let registry = tracing_subscriber::registry().with(filter);

    if config.production {
        let dir = config.log_dir.clone().unwrap_or_else(default_log_dir);
        let (file, stdout) = production_writers(&dir)?;
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(file)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(stdout)
                    .with_ansi(false),
            )
            .try_init()?;
        tracing::info!(dir = %dir.display(), "Writing logs to file");
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE),
            )
            .try_init()?;
    }

    Ok(())
}

fn env_filter(fallback: &str) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| fallback.to_string());
    EnvFilter::try_new(&level).with_context(|| format!("invalid log filter '{level}'"))
}

fn production_writers(dir: &Path) -> anyhow::Result<(NonBlocking, NonBlocking)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;

    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    let (file, file_guard) = tracing_appender::non_blocking(appender);
    let (stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    if WRITER_GUARDS.set([file_guard, stdout_guard]).is_err() {
        anyhow::bail!("logging is already initialized");
    }
    Ok((file, stdout))
}

fn default_log_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/proxitag")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "proxitag")
            .map_or_else(|| PathBuf::from("logs"), |dirs| dirs.data_dir().join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_dir_is_valid_path() {
        assert!(!default_log_dir().as_os_str().is_empty());
    }

    #[test]
    fn test_configured_level_builds_filter() {
        assert!(env_filter("proxitag_core=debug,info").is_ok());
    }

    #[test]
    fn test_production_writers_create_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("logs");
        assert!(production_writers(&dir).is_ok());
        assert!(dir.is_dir());
    }
}
