//! ---
//! hatch_section: "06-service-registry"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Local worker discovery through a shared record directory."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::path::Path;
use std::sync::Arc;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Inner, Result};

/// Live filesystem watch plus the task that turns events into rescans.
///
/// Dropping it closes the watcher and aborts the task.
pub(crate) struct DirWatch {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for DirWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watch `dir` recursively; every event kind triggers a full rescan.
pub(crate) fn watch_dir(dir: &Path, inner: Arc<Inner>) -> Result<DirWatch> {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            debug!(kind = ?event.kind, paths = ?event.paths, "registry directory changed");
            let _ = tx.send(());
        }
        Err(err) => warn!(error = %err, "registry watch error"),
    })?;
    watcher.watch(dir, RecursiveMode::Recursive)?;

    let task = tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // Coalesce bursts (write + rename) into a single rescan.
            while rx.try_recv().is_ok() {}
            if let Err(err) = inner.refresh().await {
                warn!(dir = %inner.dir.display(), error = %err, "registry rescan failed; keeping previous snapshot");
            }
        }
    });

    Ok(DirWatch {
        _watcher: watcher,
        task,
    })
}
