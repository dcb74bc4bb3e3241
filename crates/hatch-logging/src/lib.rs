//! ---
//! hatch_section: "03-logging"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Logging collaborator and structured log helpers."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Every user-visible progress or remediation message in hatch goes through
//! a [`Logger`]. Production code uses [`TracingLogger`]; tests use
//! [`MemoryLogger`] to assert on what a user would have seen.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Severity of a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Informational progress output.
    Log,
    /// Recoverable problem the user should know about.
    Warn,
    /// Failure surfaced to the user.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Log => "log",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(label)
    }
}

/// Leveled sink for user-visible output.
pub trait Logger: Send + Sync {
    /// Emit an informational message.
    fn log(&self, message: &str);
    /// Emit a warning.
    fn warn(&self, message: &str);
    /// Emit an error.
    fn error(&self, message: &str);
}

/// Shared handle type passed between components.
pub type SharedLogger = Arc<dyn Logger>;

/// Logger forwarding to `tracing` events under the `hatch::user` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl TracingLogger {
    /// Construct a shared handle.
    pub fn shared() -> SharedLogger {
        Arc::new(Self)
    }
}

impl Logger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::info!(target: "hatch::user", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "hatch::user", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "hatch::user", "{message}");
    }
}

/// A single captured message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Severity of the message.
    pub level: LogLevel,
    /// Rendered message text.
    pub message: String,
}

/// Logger that records every message in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<LogLine>>,
}

impl MemoryLogger {
    /// Construct an empty capturing logger.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Copy of every captured line, in emission order.
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().clone()
    }

    /// Messages captured at the given level.
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|line| line.level == level)
            .map(|line| line.message.clone())
            .collect()
    }

    /// Whether any message at `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines
            .lock()
            .iter()
            .any(|line| line.level == level && line.message.contains(needle))
    }

    /// All captured output joined with newlines.
    pub fn output(&self) -> String {
        self.lines
            .lock()
            .iter()
            .map(|line| line.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push(&self, level: LogLevel, message: &str) {
        self.lines.lock().push(LogLine {
            level,
            message: message.to_owned(),
        });
    }
}

impl Logger for MemoryLogger {
    fn log(&self, message: &str) {
        self.push(LogLevel::Log, message);
    }

    fn warn(&self, message: &str) {
        self.push(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(LogLevel::Error, message);
    }
}

/// Structured context attached by the `hatch_*` macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Worker the event concerns.
    pub worker: Option<&'a str>,
    /// Pipeline step or operation name.
    pub step: Option<&'a str>,
    /// Remote account identifier.
    pub account: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a worker name.
    pub fn with_worker(mut self, worker: &'a str) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Attach a step name.
    pub fn with_step(mut self, step: &'a str) -> Self {
        self.step = Some(step);
        self
    }

    /// Attach an account identifier.
    pub fn with_account(mut self, account: &'a str) -> Self {
        self.account = Some(account);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new().with_worker("api").with_step("upload");
        hatch_info!(context = ctx.clone(), "upload started");
        hatch_debug!("debug message");
        hatch_warn!(context = ctx, "retry budget: {}", 0);
    }

    #[test]
    fn memory_logger_captures_by_level() {
        let logger = MemoryLogger::new();
        logger.log("building");
        logger.warn("cache write failed for /tmp/key.pem");
        logger.error("upload failed");

        assert_eq!(logger.lines().len(), 3);
        assert_eq!(logger.messages(LogLevel::Warn).len(), 1);
        assert!(logger.contains(LogLevel::Warn, "/tmp/key.pem"));
        assert!(!logger.contains(LogLevel::Log, "/tmp/key.pem"));
        assert_eq!(logger.output(), "building\ncache write failed for /tmp/key.pem\nupload failed");
    }

    #[test]
    fn tracing_logger_is_shareable() {
        init();
        let logger = TracingLogger::shared();
        logger.log("hello");
        logger.warn("careful");
        logger.error("boom");
    }
}
