//! ---
//! hatch_section: "01-core-functionality"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Shared primitives and utilities for the hatch tooling."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
//! Subscriber setup for the `hatch` binary.
//!
//! Two audiences read the terminal: people running a deploy, who should see
//! the progress and remediation messages emitted under [`USER_TARGET`]
//! verbatim, and people debugging hatch itself, who opt into diagnostics
//! through `HATCH_LOG`. Everything at `debug` and above also lands in a daily
//! JSON file under the global logs directory.

use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::debug;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::{filter_fn, EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "HATCH_LOG";

/// Target of user-facing messages (see `hatch_logging::TracingLogger`).
pub const USER_TARGET: &str = "hatch::user";

/// Diagnostics stay quiet unless asked for.
const DEFAULT_DIAGNOSTICS: &str = "warn";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Terminal output formats for the CLI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Pretty,
    StructuredJson,
}

/// Filter directive for terminal diagnostics: `HATCH_LOG`, then `RUST_LOG`,
/// then [`DEFAULT_DIAGNOSTICS`]. Blank values are skipped.
fn diagnostics_directive(hatch_log: Option<String>, rust_log: Option<String>) -> String {
    [hatch_log, rust_log]
        .into_iter()
        .flatten()
        .find(|directive| !directive.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DIAGNOSTICS.to_owned())
}

fn diagnostics_filter() -> EnvFilter {
    let directive = diagnostics_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
    );
    EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("ignoring {LOG_ENV} directive `{directive}`: {err}");
        EnvFilter::new(DEFAULT_DIAGNOSTICS)
    })
}

fn is_user_message(metadata: &tracing::Metadata<'_>) -> bool {
    metadata.target() == USER_TARGET
}

/// Install the global subscriber for a hatch process.
///
/// User messages at `info` and above are always printed to stderr. Other
/// events pass through the `HATCH_LOG` / `RUST_LOG` filter. Installing twice
/// is a no-op.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(daily(&config.directory, format!("{prefix}.log")));
    let _ = FILE_GUARD.set(file_guard);

    let (user_layer, diagnostics_layer) = match config.format {
        LogFormat::Pretty => (
            fmt::layer()
                .without_time()
                .with_target(false)
                .with_level(false)
                .with_writer(std::io::stderr)
                .boxed(),
            fmt::layer()
                .without_time()
                .with_target(true)
                .with_writer(std::io::stderr)
                .boxed(),
        ),
        LogFormat::StructuredJson => (
            fmt::layer()
                .json()
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(std::io::stderr)
                .boxed(),
            fmt::layer()
                .json()
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(std::io::stderr)
                .boxed(),
        ),
    };

    let file_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(file_writer)
        .with_filter(LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(
            user_layer
                .with_filter(filter_fn(is_user_message))
                .with_filter(LevelFilter::INFO),
        )
        .with(
            diagnostics_layer
                .with_filter(filter_fn(|metadata| !is_user_message(metadata)))
                .with_filter(diagnostics_filter()),
        )
        .with(file_layer)
        .try_init()
        .ok();

    debug!(service = %service_name, log_dir = %config.directory.display(), format = ?config.format, "tracing initialised");
    Ok(())
}
