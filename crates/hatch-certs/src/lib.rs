//! ---
//! hatch_section: "05-local-tls"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Local TLS credential generation and caching."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Self-signed TLS credentials for local HTTPS testing.
//!
//! [`CertCache`] hands out a PEM key/certificate pair, reusing the copy cached
//! under `<global>/local-cert/` while it is fresh and regenerating it
//! otherwise. Caching is best effort: a failed write is reported as a warning
//! and the freshly generated pair is still returned.

pub mod cache;
pub mod generate;

pub use cache::{CertCache, CertWriter, FsCertWriter, CERT_FILE, KEY_FILE};
pub use generate::{generate_self_signed, CERT_VALIDITY_DAYS};

/// PEM-encoded private key and certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPair {
    /// PEM private key.
    pub key: String,
    /// PEM certificate.
    pub cert: String,
}

/// Errors surfaced by the credential cache.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    /// Key or certificate generation failed; there is no fallback.
    #[error("failed to generate self-signed certificate: {0}")]
    Generate(String),
}

/// Result alias for the certificate crate.
pub type Result<T> = std::result::Result<T, CertError>;
