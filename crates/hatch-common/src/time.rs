//! ---
//! hatch_section: "01-core-functionality"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Shared primitives and utilities for the hatch tooling."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{NaiveDate, Utc};

/// Render a duration as seconds with two decimal digits.
pub fn format_elapsed(duration: Duration) -> String {
    format!("{:.2}", duration.as_secs_f64())
}

/// Today's UTC date as `YYYY-MM-DD`, used in compatibility-date remediation.
pub fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Whether `value` is a well-formed `YYYY-MM-DD` date.
pub fn is_valid_date(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}
