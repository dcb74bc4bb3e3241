//! ---
//! hatch_section: "05-local-tls"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Local TLS credential generation and caching."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType};

use crate::{CertError, CertPair, Result};

/// Lifetime of a generated certificate. The cache treats files older than
/// this as expired.
pub const CERT_VALIDITY_DAYS: i64 = 30;

const SUBJECT_ALT_NAMES: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// Generate a fresh ECDSA P-256 self-signed pair for `localhost`.
pub fn generate_self_signed() -> Result<CertPair> {
    let mut params = CertificateParams::new(
        SUBJECT_ALT_NAMES
            .iter()
            .map(|name| (*name).to_owned())
            .collect::<Vec<_>>(),
    );
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, "localhost");
    params
        .distinguished_name
        .push(DnType::OrganizationName, "hatch local development");
    params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;

    // Backdate by a day to tolerate clock skew between processes.
    let today = Utc::now().date_naive();
    let (start, end) = validity_window(today);
    params.not_before = rcgen::date_time_ymd(start.year(), start.month() as u8, start.day() as u8);
    params.not_after = rcgen::date_time_ymd(end.year(), end.month() as u8, end.day() as u8);

    let cert = Certificate::from_params(params).map_err(|err| CertError::Generate(err.to_string()))?;
    let pem = cert
        .serialize_pem()
        .map_err(|err| CertError::Generate(err.to_string()))?;
    Ok(CertPair {
        key: cert.serialize_private_key_pem(),
        cert: pem,
    })
}

fn validity_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (
        today - ChronoDuration::days(1),
        today + ChronoDuration::days(CERT_VALIDITY_DAYS),
    )
}
