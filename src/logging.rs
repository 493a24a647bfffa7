use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Where and how loudly to log.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Directory for the daily log files
    pub log_dir: Utf8PathBuf,

    /// File name prefix, e.g. "dam-upload"
    pub log_prefix: String,

    /// `debug` level when no `RUST_LOG` is set; otherwise `info`
    pub debug_mode: bool,

    /// Also log to stderr
    pub console: bool,
}

impl LogOptions {
    pub fn new(log_dir: impl Into<Utf8PathBuf>, log_prefix: impl Into<String>) -> Self {
        Self {
            log_dir: log_dir.into(),
            log_prefix: log_prefix.into(),
            debug_mode: false,
            console: false,
        }
    }

    pub fn debug(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    /// `RUST_LOG` wins; the debug flag only picks the fallback level.
    fn env_filter(&self) -> EnvFilter {
        let fallback = if self.debug_mode { "debug" } else { "info" };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
    }
}

fn ensure_log_dir(log_dir: &Utf8Path) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }
    Ok(())
}

/// Setup logging with a daily rotating file appender.
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging active
pub fn setup_logging(options: &LogOptions) -> Result<WorkerGuard> {
    ensure_log_dir(&options.log_dir)?;

    let file_appender = rolling::daily(&options.log_dir, &options.log_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false) // No ANSI codes in log files
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = options.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(options.env_filter())
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    tracing::info!(
        "Logging initialized: dir={}, prefix={}, debug={}, console={}",
        options.log_dir,
        options.log_prefix,
        options.debug_mode,
        options.console
    );

    Ok(guard)
}
