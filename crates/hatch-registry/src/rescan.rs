//! ---
//! hatch_section: "06-service-registry"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Local worker discovery through a shared record directory."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::io;
use std::path::Path;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::definition::WorkerDefinition;
use crate::store::scan_dir;

/// Strategy used to rebuild the registry mapping from the directory.
///
/// The registry always replaces its whole mapping with whatever this
/// returns; implementations never patch incrementally.
#[async_trait]
pub trait Rescan: Send + Sync {
    async fn scan(&self, dir: &Path) -> io::Result<IndexMap<String, WorkerDefinition>>;
}

/// Full directory re-read, skipping unparseable records.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryRescan;

#[async_trait]
impl Rescan for DirectoryRescan {
    async fn scan(&self, dir: &Path) -> io::Result<IndexMap<String, WorkerDefinition>> {
        scan_dir(dir).await
    }
}
