//! Structured logging utilities for Encore
//!
//! All logs use structured fields for easy parsing and analysis.
//!
//! # Log Format Conventions
//!
//! - `service`: The emitting layer ("memo", "session", "rerun")
//! - `operation`: The operation being performed (e.g., "get", "put", "run")
//! - `status`: The result status ("hit", "miss", "join", "success", "error")
//! - `fingerprint`: Short fingerprint of a memoized call
//! - `session_id`: The viewer session
//!
//! # Examples
//!
//! ```rust
//! use encore::logging::{operations, services, status};
//! use tracing::info;
//!
//! let session_id = "3f2a";
//! info!(
//!     service = services::RERUN,
//!     operation = operations::RUN,
//!     status = status::SUCCESS,
//!     session_id = %session_id,
//!     "rerun completed"
//! );
//! ```

use std::str::FromStr;
use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Custom formatter that shows "encore" instead of full module path
struct EncoreFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for EncoreFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m", // Red
                tracing::Level::WARN => "\x1b[33m",  // Yellow
                tracing::Level::INFO => "\x1b[32m",  // Green
                tracing::Level::DEBUG => "\x1b[34m", // Blue
                tracing::Level::TRACE => "\x1b[35m", // Magenta
            };
            write!(writer, "{}{:5}(encore)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(encore): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    Pretty,
    /// Compact format (for CI/production)
    Compact,
    /// JSON format (for log aggregation systems)
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

impl LogFormat {
    /// Parse from environment variable (ENCORE_LOG_FORMAT)
    pub fn from_env() -> Self {
        Self::from_env_or(None)
    }

    /// `ENCORE_LOG_FORMAT` wins, then the configured format, then the
    /// pretty/compact default depending on `CI`
    pub fn from_env_or(configured: Option<&str>) -> Self {
        let from_env = std::env::var("ENCORE_LOG_FORMAT").unwrap_or_default();
        if let Ok(format) = from_env.parse() {
            return format;
        }
        if let Some(format) = configured.and_then(|c| c.parse().ok()) {
            return format;
        }

        if std::env::var("CI").is_ok() {
            Self::Compact
        } else {
            Self::Pretty
        }
    }
}

/// Initialize the global tracing subscriber with default settings
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "debug", "info", "warn")
/// - `ENCORE_LOG_FORMAT`: Set format ("pretty", "compact", "json")
/// - `CI`: If set, defaults to compact format
pub fn init() {
    init_with("info", None);
}

/// Initialize logging with fallbacks taken from the config file
///
/// Environment variables still take precedence.
pub fn init_with(default_level: &str, configured_format: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = LogFormat::from_env_or(configured_format);

    // try_init: a second initialization (tests, embedding) is a no-op
    let result = match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(EncoreFormatter { with_ansi: true })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(EncoreFormatter { with_ansi: false })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}

/// Service names for consistent logging
pub mod services {
    pub const MEMO: &str = "memo";
    pub const SESSION: &str = "session";
    pub const RERUN: &str = "rerun";
}

/// Operation names for consistent logging
pub mod operations {
    pub const GET: &str = "get";
    pub const PUT: &str = "put";
    pub const INVALIDATE: &str = "invalidate";
    pub const CLEAR: &str = "clear";
    pub const EVICT: &str = "evict";
    pub const EXPIRE: &str = "expire";
    pub const CREATE: &str = "create";
    pub const DESTROY: &str = "destroy";
    pub const RUN: &str = "run";
    pub const WIDGET_CHANGE: &str = "widget_change";
}

/// Status values for consistent logging
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const JOIN: &str = "join";
    pub const EXPIRED: &str = "expired";
    pub const ERROR: &str = "error";
    pub const CANCELED: &str = "canceled";
}
