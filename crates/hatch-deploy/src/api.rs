//! ---
//! hatch_section: "07-deploy-pipeline"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Worker build, binding assembly and upload."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
//! Client seam for the remote platform API.
//!
//! Every endpoint answers with the envelope
//! `{"success": bool, "errors": [{"code", "message"}], "result": ...}`;
//! [`PlatformApi::fetch_result`] unwraps it and returns `result`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{ApiError, ApiMessage};
use crate::form::UploadForm;

/// Default platform endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.hatch.dev/client/v4";

/// Absolute API path built from raw segments, each percent-encoded.
///
/// `api_path(&["accounts", "a b", "queues"])` is `/accounts/a%20b/queues`.
pub fn api_path(segments: &[&str]) -> Result<String, ApiError> {
    let invalid = || ApiError::InvalidBaseUrl(segments.join("/"));
    let mut url = Url::parse("http://api.invalid/").map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .clear()
        .extend(segments);
    Ok(url.path().to_owned())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(verb)
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(UploadForm),
}

/// Remote platform API.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Issue a request against `path` (relative to the API root) and return
    /// the envelope's `result`.
    async fn fetch_result(
        &self,
        method: HttpMethod,
        path: &str,
        body: RequestBody,
        query: &[(&str, &str)],
    ) -> Result<Value, ApiError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    #[serde(default)]
    result: Value,
}

/// `reqwest` implementation authenticating with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpPlatformClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpPlatformClient {
    pub const ENV_BASE_URL: &'static str = "HATCH_API_BASE_URL";
    pub const ENV_API_TOKEN: &'static str = "HATCH_API_TOKEN";

    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        let parsed =
            Url::parse(base_url).map_err(|_| ApiError::InvalidBaseUrl(base_url.to_owned()))?;
        if parsed.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(base_url.to_owned()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .user_agent(concat!("hatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| ApiError::Transport {
                path: base_url.to_owned(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.into(),
        })
    }

    /// Build from `HATCH_API_BASE_URL` and `HATCH_API_TOKEN`.
    pub fn from_env() -> Result<Self, ApiError> {
        let token = std::env::var(Self::ENV_API_TOKEN)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .ok_or(ApiError::Unauthenticated)?;
        let base_url = std::env::var(Self::ENV_BASE_URL)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        Self::new(&base_url, token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl PlatformApi for HttpPlatformClient {
    async fn fetch_result(
        &self,
        method: HttpMethod,
        path: &str,
        body: RequestBody,
        query: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "platform API request");
        let transport = |source| ApiError::Transport {
            path: path.to_owned(),
            source,
        };

        let mut request = self
            .client
            .request(method.into(), &url)
            .bearer_auth(&self.token)
            .query(query);
        request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(&value),
            RequestBody::Multipart(form) => request.multipart(form.into_multipart().map_err(transport)?),
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        let envelope: Envelope = serde_json::from_str(&text).map_err(|err| ApiError::Decode {
            path: path.to_owned(),
            reason: format!("status {status}: {err}"),
        })?;

        if !envelope.success {
            return Err(ApiError::Api {
                path: path.to_owned(),
                status: Some(status.as_u16()),
                errors: envelope.errors,
            });
        }
        Ok(envelope.result)
    }
}
