//! ---
//! hatch_section: "03-logging"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Logging collaborator and structured log helpers."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
/// Emit an informational log enriched with worker context.
#[macro_export]
macro_rules! hatch_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            worker = ctx.worker.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            account = ctx.account.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        tracing::event!(tracing::Level::INFO, message = %format_args!($($arg)+));
    }};
}

/// Emit a debug log enriched with worker context.
#[macro_export]
macro_rules! hatch_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            worker = ctx.worker.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            account = ctx.account.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        tracing::event!(tracing::Level::DEBUG, message = %format_args!($($arg)+));
    }};
}

/// Emit a warning enriched with worker context.
#[macro_export]
macro_rules! hatch_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            worker = ctx.worker.unwrap_or(""),
            step = ctx.step.unwrap_or(""),
            account = ctx.account.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        tracing::event!(tracing::Level::WARN, message = %format_args!($($arg)+));
    }};
}
