//! ---
//! hatch_section: "05-local-tls"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Local TLS credential generation and caching."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use hatch_common::GlobalPaths;
use hatch_logging::SharedLogger;
use tokio::fs;
use tracing::debug;

use crate::generate::{generate_self_signed, CERT_VALIDITY_DAYS};
use crate::{CertPair, Result};

/// File name of the cached private key.
pub const KEY_FILE: &str = "key.pem";
/// File name of the cached certificate.
pub const CERT_FILE: &str = "cert.pem";

/// Persistence seam for generated credentials.
#[async_trait]
pub trait CertWriter: Send + Sync {
    /// Create `path` and any missing parents.
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Write `contents` to `path`, replacing any existing file.
    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
}

/// Default writer backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsCertWriter;

#[async_trait]
impl CertWriter for FsCertWriter {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path).await
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::write(path, contents).await
    }
}

/// On-disk cache of the local HTTPS key/certificate pair.
#[derive(Clone)]
pub struct CertCache {
    dir: PathBuf,
    max_age: Duration,
    writer: Arc<dyn CertWriter>,
    logger: SharedLogger,
}

impl CertCache {
    /// Cache rooted at an explicit directory.
    pub fn new(dir: impl Into<PathBuf>, logger: SharedLogger) -> Self {
        Self {
            dir: dir.into(),
            max_age: Duration::from_secs(CERT_VALIDITY_DAYS as u64 * 24 * 60 * 60),
            writer: Arc::new(FsCertWriter),
            logger,
        }
    }

    /// Cache under `<global>/local-cert`.
    pub fn from_paths(paths: &GlobalPaths, logger: SharedLogger) -> Self {
        Self::new(paths.local_cert_dir(), logger)
    }

    /// Override how old a cached pair may be before it is regenerated.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Replace the persistence backend.
    pub fn with_writer(mut self, writer: Arc<dyn CertWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE)
    }

    pub fn cert_path(&self) -> PathBuf {
        self.dir.join(CERT_FILE)
    }

    /// Return the cached pair if fresh, otherwise generate and cache a new one.
    ///
    /// Only generation failures are returned as errors.
    pub async fn get_credentials(&self) -> Result<CertPair> {
        let key_path = self.key_path();
        let cert_path = self.cert_path();

        if self.is_fresh(&key_path).await && self.is_fresh(&cert_path).await {
            match (fs::read_to_string(&key_path).await, fs::read_to_string(&cert_path).await) {
                (Ok(key), Ok(cert)) => {
                    debug!(dir = %self.dir.display(), "reusing cached local certificate");
                    return Ok(CertPair { key, cert });
                }
                (Err(err), _) | (_, Err(err)) => {
                    debug!(dir = %self.dir.display(), error = %err, "cached certificate unreadable");
                }
            }
        }

        self.logger.log("Generating new self-signed certificate...");
        let pair = generate_self_signed()?;
        self.persist(&pair).await;
        Ok(pair)
    }

    async fn is_fresh(&self, path: &Path) -> bool {
        let modified = match fs::metadata(path).await.and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };
        // A modification time in the future counts as brand new.
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        age < self.max_age
    }

    async fn persist(&self, pair: &CertPair) {
        if let Err(err) = self.writer.create_dir_all(&self.dir).await {
            self.warn_unwritable(&self.dir, &err);
            return;
        }
        for (path, contents) in [
            (self.key_path(), pair.key.as_bytes()),
            (self.cert_path(), pair.cert.as_bytes()),
        ] {
            if let Err(err) = self.writer.write(&path, contents).await {
                self.warn_unwritable(&path, &err);
            }
        }
    }

    fn warn_unwritable(&self, path: &Path, err: &io::Error) {
        self.logger.warn(&format!(
            "Unable to cache generated self-signed certificate at {}: {}",
            path.display(),
            err
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hatch_logging::{LogLevel, MemoryLogger};
    use std::fs::File;
    use tempfile::tempdir;

    /// Refuses every `.pem` write.
    struct PemRejectingWriter;

    #[async_trait]
    impl CertWriter for PemRejectingWriter {
        async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            fs::create_dir_all(path).await
        }

        async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
            if path.extension().and_then(|ext| ext.to_str()) == Some("pem") {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only volume"));
            }
            fs::write(path, contents).await
        }
    }

    fn age_file(path: &Path, age: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn second_call_reuses_cached_pair() {
        let dir = tempdir().unwrap();
        let logger = MemoryLogger::new();
        let cache = CertCache::new(dir.path().join("local-cert"), logger.clone());

        let first = cache.get_credentials().await.unwrap();
        let second = cache.get_credentials().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            logger.messages(LogLevel::Log),
            vec!["Generating new self-signed certificate...".to_owned()]
        );
        assert_eq!(std::fs::read_to_string(cache.key_path()).unwrap(), first.key);
        assert_eq!(std::fs::read_to_string(cache.cert_path()).unwrap(), first.cert);
    }

    #[tokio::test]
    async fn cached_files_are_returned_verbatim() {
        let dir = tempdir().unwrap();
        let cache = CertCache::new(dir.path(), MemoryLogger::new());
        std::fs::write(cache.key_path(), "not really a key\n").unwrap();
        std::fs::write(cache.cert_path(), "not really a cert\n").unwrap();

        let pair = cache.get_credentials().await.unwrap();
        assert_eq!(pair.key, "not really a key\n");
        assert_eq!(pair.cert, "not really a cert\n");
    }

    #[tokio::test]
    async fn expired_pair_is_regenerated() {
        let dir = tempdir().unwrap();
        let logger = MemoryLogger::new();
        let cache = CertCache::new(dir.path(), logger.clone());

        let original = cache.get_credentials().await.unwrap();
        let stale = Duration::from_secs((CERT_VALIDITY_DAYS as u64 + 1) * 24 * 60 * 60);
        age_file(&cache.key_path(), stale);
        age_file(&cache.cert_path(), stale);

        let renewed = cache.get_credentials().await.unwrap();
        assert_ne!(original, renewed);
        assert_eq!(logger.messages(LogLevel::Log).len(), 2);
    }

    #[tokio::test]
    async fn one_missing_file_forces_regeneration() {
        let dir = tempdir().unwrap();
        let cache = CertCache::new(dir.path(), MemoryLogger::new());
        let original = cache.get_credentials().await.unwrap();
        std::fs::remove_file(cache.cert_path()).unwrap();

        let renewed = cache.get_credentials().await.unwrap();
        assert_ne!(original.key, renewed.key);
        assert!(cache.cert_path().exists());
    }

    #[tokio::test]
    async fn write_failure_degrades_to_warning() {
        let dir = tempdir().unwrap();
        let logger = MemoryLogger::new();
        let cache = CertCache::new(dir.path().join("local-cert"), logger.clone())
            .with_writer(Arc::new(PemRejectingWriter));

        let pair = cache.get_credentials().await.unwrap();
        assert!(pair.key.contains("PRIVATE KEY"));
        assert!(pair.cert.contains("CERTIFICATE"));
        assert!(!cache.key_path().exists());
        assert!(!cache.cert_path().exists());

        let key_path = cache.key_path().display().to_string();
        assert!(logger.contains(LogLevel::Warn, &key_path));
        assert!(logger.contains(LogLevel::Warn, "read-only volume"));
    }
}
