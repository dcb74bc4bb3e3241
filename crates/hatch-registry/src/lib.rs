//! ---
//! hatch_section: "06-service-registry"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Local worker discovery through a shared record directory."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
//! Directory-backed discovery for workers running side by side.
//!
//! Each running worker writes one JSON record named after itself into the
//! shared registry directory. A [`ServiceRegistry`] mirrors that directory in
//! memory: on every filesystem event it re-reads the whole directory and
//! publishes a fresh, immutable snapshot.
//!
//! Writers in other processes are not locked out. Correctness relies on
//! atomic record replacement on the writer side and on the reader skipping
//! records it cannot parse yet.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hatch_common::{DurableObjectBindingConfig, GlobalPaths, ServiceBindingConfig};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

pub mod definition;
pub mod rescan;
pub mod resolve;
pub mod store;
mod watcher;

pub use definition::{DurableObjectExport, Protocol, WorkerDefinition, WorkerMode};
pub use rescan::{DirectoryRescan, Rescan};
pub use resolve::resolve_bound;

/// Immutable view of the registry; replaced wholesale, never mutated.
pub type RegistrySnapshot = Arc<IndexMap<String, WorkerDefinition>>;

/// Result alias used throughout the registry crate.
pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to watch registry directory: {0}")]
    Watch(#[from] notify::Error),
    #[error("failed to serialise worker definition: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("worker \"{0}\" is not registered")]
    NotFound(String),
    #[error("invalid worker name \"{0}\"")]
    InvalidName(String),
}

pub(crate) struct Inner {
    pub(crate) dir: PathBuf,
    rescan: Arc<dyn Rescan>,
    snapshots: watch::Sender<RegistrySnapshot>,
    ready: watch::Sender<bool>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl Inner {
    /// Rescan and publish. Serialised so a slow scan never overwrites a newer one.
    pub(crate) async fn refresh(&self) -> io::Result<RegistrySnapshot> {
        let _guard = self.refresh_lock.lock().await;
        let records = Arc::new(self.rescan.scan(&self.dir).await?);
        debug!(workers = records.len(), "registry snapshot published");
        self.snapshots.send_replace(Arc::clone(&records));
        self.ready.send_replace(true);
        Ok(records)
    }
}

/// Handle over the shared registry directory.
///
/// Construct one per process and pass it to every consumer.
pub struct ServiceRegistry {
    inner: Arc<Inner>,
    watch: Mutex<Option<watcher::DirWatch>>,
    start_lock: tokio::sync::Mutex<()>,
}

impl ServiceRegistry {
    /// Registry over an explicit directory using the full-rescan strategy.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_rescan(dir, Arc::new(DirectoryRescan))
    }

    /// Registry under `<global>/registry`.
    pub fn from_paths(paths: &GlobalPaths) -> Self {
        Self::new(paths.registry_dir())
    }

    /// Registry with a custom rescan strategy.
    pub fn with_rescan(dir: impl Into<PathBuf>, rescan: Arc<dyn Rescan>) -> Self {
        let (snapshots, _) = watch::channel(RegistrySnapshot::default());
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                dir: dir.into(),
                rescan,
                snapshots,
                ready,
                refresh_lock: tokio::sync::Mutex::new(()),
            }),
            watch: Mutex::new(None),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Create the directory, start watching it and publish the first scan.
    ///
    /// Calling `start` on a registry that is already watching is a no-op.
    /// The registry only counts as watching once the first scan succeeded,
    /// so a failed `start` can be retried.
    pub async fn start(&self) -> Result<()> {
        let _starting = self.start_lock.lock().await;
        if self.is_watching() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.inner.dir).await?;
        // Watch before the first scan so no change between the two is lost.
        let dir_watch = watcher::watch_dir(&self.inner.dir, Arc::clone(&self.inner))?;
        // On failure the watch is dropped here, which stops it.
        let snapshot = self.inner.refresh().await?;
        *self.watch.lock() = Some(dir_watch);
        info!(dir = %self.inner.dir.display(), workers = snapshot.len(), "service registry watching");
        Ok(())
    }

    /// Release the watch. Safe to call when never started.
    pub fn stop(&self) {
        if self.watch.lock().take().is_some() {
            debug!(dir = %self.inner.dir.display(), "service registry stopped");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watch.lock().is_some()
    }

    /// Write (or overwrite) the record for `name`.
    pub async fn register(&self, name: &str, definition: &WorkerDefinition) -> Result<()> {
        store::write_record(&self.inner.dir, name, definition).await
    }

    /// Remove the record for `name`, failing with [`RegistryError::NotFound`]
    /// when it is absent.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        store::remove_record(&self.inner.dir, name).await
    }

    /// Best-effort removal: `Ok(false)` when the record was already gone.
    pub async fn unregister_if_present(&self, name: &str) -> Result<bool> {
        match self.unregister(name).await {
            Ok(()) => Ok(true),
            Err(RegistryError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Current snapshot.
    ///
    /// Before the first scan has completed this is empty. Call
    /// [`wait_ready`](Self::wait_ready) first when an empty answer would be wrong.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.inner.snapshots.borrow().clone()
    }

    /// Resolve once at least one scan has been published.
    pub async fn wait_ready(&self) {
        let mut ready = self.inner.ready.subscribe();
        let _ = ready.wait_for(|is_ready| *is_ready).await;
    }

    /// Rescan synchronously, bypassing the filesystem watcher.
    pub async fn rescan_now(&self) -> Result<RegistrySnapshot> {
        Ok(self.inner.refresh().await?)
    }

    /// Receiver notified with every newly published snapshot.
    pub fn watch_changes(&self) -> watch::Receiver<RegistrySnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Snapshot entries referenced by the given bindings.
    pub fn resolve_bound(
        &self,
        services: &[ServiceBindingConfig],
        durable_objects: &[DurableObjectBindingConfig],
    ) -> IndexMap<String, WorkerDefinition> {
        resolve_bound(&self.snapshot(), services, durable_objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct CountingRescan {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Rescan for CountingRescan {
        async fn scan(&self, dir: &Path) -> io::Result<IndexMap<String, WorkerDefinition>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            store::scan_dir(dir).await
        }
    }

    fn definition(port: u16) -> WorkerDefinition {
        WorkerDefinition {
            port: Some(port),
            protocol: Some(Protocol::Http),
            host: Some("127.0.0.1".into()),
            ..WorkerDefinition::default()
        }
    }

    #[tokio::test]
    async fn snapshot_is_empty_before_first_scan() {
        let dir = tempdir().unwrap();
        let registry = ServiceRegistry::new(dir.path());
        registry.register("api", &definition(1)).await.unwrap();
        assert!(registry.snapshot().is_empty());

        registry.rescan_now().await.unwrap();
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn register_and_unregister_with_manual_rescan() {
        let dir = tempdir().unwrap();
        let registry = ServiceRegistry::new(dir.path().join("registry"));
        for (idx, name) in ["a", "b", "c"].iter().enumerate() {
            registry.register(name, &definition(idx as u16)).await.unwrap();
        }
        let snapshot = registry.rescan_now().await.unwrap();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);

        registry.unregister("b").await.unwrap();
        let after = registry.rescan_now().await.unwrap();
        assert_eq!(after.keys().collect::<Vec<_>>(), vec!["a", "c"]);
        // The earlier snapshot handed out is untouched.
        assert_eq!(snapshot.len(), 3);
    }

    #[tokio::test]
    async fn unregister_policies() {
        let dir = tempdir().unwrap();
        let registry = ServiceRegistry::new(dir.path());
        registry.register("api", &definition(1)).await.unwrap();

        assert!(registry.unregister_if_present("api").await.unwrap());
        assert!(!registry.unregister_if_present("api").await.unwrap());
        assert!(matches!(
            registry.unregister("api").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let dir = tempdir().unwrap();
        let registry = ServiceRegistry::new(dir.path());
        assert!(matches!(
            registry.register("../outside", &definition(1)).await,
            Err(RegistryError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn custom_rescan_strategy_is_used() {
        let dir = tempdir().unwrap();
        let counting = Arc::new(CountingRescan {
            calls: AtomicUsize::new(0),
        });
        let registry = ServiceRegistry::with_rescan(dir.path(), counting.clone());
        registry.rescan_now().await.unwrap();
        registry.rescan_now().await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn start_creates_directory_and_signals_ready() {
        let dir = tempdir().unwrap();
        let registry_dir = dir.path().join("nested").join("registry");
        let registry = ServiceRegistry::new(&registry_dir);

        registry.start().await.unwrap();
        assert!(registry_dir.is_dir());
        assert!(registry.is_watching());
        tokio::time::timeout(std::time::Duration::from_secs(1), registry.wait_ready())
            .await
            .expect("ready after start");

        registry.start().await.unwrap();
        registry.stop();
        registry.stop();
        assert!(!registry.is_watching());
    }

    /// Fails every scan while `failing` is set.
    struct FlakyRescan {
        failing: AtomicBool,
    }

    #[async_trait]
    impl Rescan for FlakyRescan {
        async fn scan(&self, dir: &Path) -> io::Result<IndexMap<String, WorkerDefinition>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "scan refused"));
            }
            store::scan_dir(dir).await
        }
    }

    #[tokio::test]
    async fn failed_start_can_be_retried() {
        let dir = tempdir().unwrap();
        let flaky = Arc::new(FlakyRescan {
            failing: AtomicBool::new(true),
        });
        let registry = ServiceRegistry::with_rescan(dir.path(), flaky.clone());

        assert!(matches!(registry.start().await, Err(RegistryError::Io(_))));
        assert!(!registry.is_watching());

        flaky.failing.store(false, Ordering::SeqCst);
        registry.start().await.unwrap();
        assert!(registry.is_watching());
        registry.stop();
    }

    #[tokio::test]
    async fn concurrent_starts_share_one_watch() {
        let dir = tempdir().unwrap();
        let registry = ServiceRegistry::new(dir.path());
        registry.register("api", &definition(1)).await.unwrap();

        let (first, second) = tokio::join!(registry.start(), registry.start());
        first.unwrap();
        second.unwrap();
        assert!(registry.is_watching());
        assert_eq!(registry.snapshot().len(), 1);

        // A single stop releases it.
        registry.stop();
        assert!(!registry.is_watching());
    }

    #[tokio::test]
    async fn stop_without_start_is_harmless() {
        let dir = tempdir().unwrap();
        let registry = ServiceRegistry::new(dir.path());
        registry.stop();
        assert!(!registry.is_watching());
    }
}
