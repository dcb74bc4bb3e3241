//! ---
//! hatch_section: "07-deploy-pipeline"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Worker build, binding assembly and upload."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A single error entry from the platform response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub code: u32,
    pub message: String,
}

/// Failures talking to the platform API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The platform answered with `success: false`.
    #[error("A request to the platform API ({path}) failed.{}", render_messages(.errors))]
    Api {
        path: String,
        status: Option<u16>,
        errors: Vec<ApiMessage>,
    },
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected response from {path}: {reason}")]
    Decode { path: String, reason: String },
    #[error("invalid API base URL \"{0}\"")]
    InvalidBaseUrl(String),
    #[error("no API token found; set HATCH_API_TOKEN")]
    Unauthenticated,
}

impl ApiError {
    /// Whether the platform reported `code` among its errors.
    pub fn has_code(&self, code: u32) -> bool {
        match self {
            ApiError::Api { errors, .. } => errors.iter().any(|err| err.code == code),
            _ => false,
        }
    }
}

fn render_messages(errors: &[ApiMessage]) -> String {
    errors
        .iter()
        .map(|err| format!("\n  {} [code: {}]", err.message, err.code))
        .collect()
}

/// Everything that can stop a deploy.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(
        "A compatibility date is required when publishing. Add the following to your hatch.toml file:\n    ```\n    compatibility_date = \"{today}\"\n    ```\n    Or pass it in your terminal:\n    ```\n    --compatibility-date {today}\n    ```"
    )]
    MissingCompatibilityDate { today: String },
    #[error(
        "You need to provide a name when publishing a worker. Either pass it as a cli arg with `--name <name>` or in your config file as `name = \"<name>\"`"
    )]
    MissingName,
    #[error("Missing entry point: pass a script path or set `main = \"src/index.js\"` in hatch.toml")]
    MissingEntry,
    #[error("Missing account id: set `account_id` in hatch.toml or pass `--account-id <id>`")]
    MissingAccountId,
    #[error("Queue \"{name}\" does not exist. To create it, run: hatch queues create {name}")]
    QueueNotFound { name: String },
    #[error("invalid module rule: {0}")]
    InvalidRule(String),
    #[error("bundling failed: {0}")]
    Bundle(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialise upload metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl DeployError {
    /// Adapter for `map_err` that remembers which path failed.
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| DeployError::Io { path, source }
    }

    /// True for errors caused by missing or invalid user configuration.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            DeployError::MissingCompatibilityDate { .. }
                | DeployError::MissingName
                | DeployError::MissingEntry
                | DeployError::MissingAccountId
                | DeployError::QueueNotFound { .. }
                | DeployError::InvalidRule(_)
        )
    }
}
