//! tracing subscriber setup
//!
//! The level filter sits behind a reload layer so the persisted
//! `settings.logLevel` can be applied at the start of every scheduled run.
//! `RUST_LOG`, when set, always wins.

use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use crate::error::{GmailError, Result};
use crate::models::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn directive(level: LogLevel) -> String {
    format!("gmail_regex_rules={},warn", level.as_str())
}

fn env_override() -> Option<EnvFilter> {
    std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .and_then(|_| EnvFilter::try_from_default_env().ok())
}

/// Handle for changing the active level after initialization
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    pinned: bool,
}

impl LogHandle {
    /// Apply `level` unless `RUST_LOG` or `--verbose` pinned the filter
    pub fn set_level(&self, level: LogLevel) -> Result<()> {
        if self.pinned {
            return Ok(());
        }
        self.handle
            .reload(EnvFilter::new(directive(level)))
            .map_err(|e| GmailError::ConfigError(format!("Failed to change log level: {}", e)))
    }
}

/// Install the global subscriber, writing to stderr
///
/// `verbose` forces debug output for the crate and pins it for the process.
pub fn init(level: LogLevel, verbose: bool, format: LogFormat) -> Result<LogHandle> {
    let (filter, pinned) = match env_override() {
        Some(filter) => (filter, true),
        None if verbose => (EnvFilter::new(directive(LogLevel::Debug)), true),
        None => (EnvFilter::new(directive(level)), false),
    };
    let (filter, handle) = reload::Layer::new(filter);

    let (text, json) = match format {
        LogFormat::Text => (
            Some(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .map_err(|e| GmailError::ConfigError(format!("Failed to initialize logging: {}", e)))?;

    Ok(LogHandle { handle, pinned })
}
