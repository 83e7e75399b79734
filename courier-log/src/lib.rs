//! Courier Logging
//!
//! Installs a `tracing` subscriber for the dispatch engine, configured from
//! `COURIER_*` environment variables or from loaded settings.
//!
//! # Usage
//!
//! ```rust,no_run
//! // Reads COURIER_DEBUG, COURIER_LOG_LEVEL, COURIER_LOG_FORMAT, COURIER_LOG_COLOR
//! courier_log::init();
//!
//! tracing::info!("dispatcher starting");
//! ```
//!
//! # Environment Variables
//!
//! - `COURIER_DEBUG=1` - Enable debug logging
//! - `COURIER_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `COURIER_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `COURIER_LOG_COLOR=1|0` - Enable/disable colors
//! - `COURIER_LOG_TARGETS=1|0` - Include event targets
//!
//! `RUST_LOG`, when set, replaces the level-derived filter.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::env;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level of emitted events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    /// Debug level
    Debug,
    /// Info level
    #[default]
    Info,
    /// Warning level
    #[serde(alias = "warning")]
    Warn,
    /// Error level (least verbose)
    Error,
    /// Off (no logging)
    #[serde(alias = "none")]
    Off,
}

impl Level {
    /// Get level from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Filter directive for this level.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_directive().to_uppercase())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line human readable format
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for structured logging
    #[default]
    Json,
}

impl Format {
    /// Get format from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled (ignored for JSON)
    pub color: bool,
    /// Whether to include event targets
    pub targets: bool,
    /// Whether to include thread ids
    pub thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            targets: true,
            thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Create config from `COURIER_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let debug = flag("COURIER_DEBUG").unwrap_or(false);

        let level = lookup("COURIER_LOG_LEVEL")
            .and_then(|s| Level::from_str(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("COURIER_LOG_FORMAT")
            .and_then(|s| Format::from_str(&s))
            .unwrap_or(Format::Json);

        let color = flag("COURIER_LOG_COLOR")
            .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some());

        Self {
            debug,
            level,
            format,
            color,
            targets: flag("COURIER_LOG_TARGETS").unwrap_or(true),
            thread_ids: false,
        }
    }

    /// Set the minimum level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable debug mode.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Level actually applied: debug mode lowers anything above `Debug`.
    pub fn effective_level(&self) -> Level {
        if self.debug && self.level > Level::Debug {
            Level::Debug
        } else {
            self.level
        }
    }

    /// Filter derived from this config; `RUST_LOG` takes precedence.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.effective_level().as_directive()))
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Logging setup errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Logging already initialized")]
    AlreadyInitialized,

    #[error("Failed to install log subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

// ============================================================================
// Public API
// ============================================================================

static INSTALLED: OnceCell<LogConfig> = OnceCell::new();

/// Install the global subscriber from environment variables.
///
/// Later calls, and failures because another subscriber is already set,
/// are ignored.
pub fn init() {
    let _ = try_init(LogConfig::from_env());
}

/// Install the global subscriber from an explicit config.
pub fn init_with(config: LogConfig) {
    let _ = try_init(config);
}

/// Install the global subscriber, reporting why it could not be.
pub fn try_init(config: LogConfig) -> Result<(), LogError> {
    if INSTALLED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = config.env_filter();
    match config.format {
        Format::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(config.targets)
                    .with_thread_ids(config.thread_ids),
            )
            .try_init()?,
        Format::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_target(config.targets)
                    .with_thread_ids(config.thread_ids)
                    .with_ansi(config.color),
            )
            .try_init()?,
        Format::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr)
                    .with_target(config.targets)
                    .with_thread_ids(config.thread_ids)
                    .with_ansi(config.color),
            )
            .try_init()?,
    }

    tracing::debug!(
        level = %config.effective_level(),
        format = ?config.format,
        "Logging initialized"
    );
    let _ = INSTALLED.set(config);
    Ok(())
}

/// Config of the subscriber installed by this crate, if any.
pub fn config() -> Option<&'static LogConfig> {
    INSTALLED.get()
}

/// Check if debug logging is enabled by the installed config.
pub fn is_debug_enabled() -> bool {
    config().is_some_and(|c| c.effective_level() <= Level::Debug)
}

// ============================================================================
// Tests
// ============================================================================
