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
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use tokio::fs;
use tracing::{debug, warn};

use crate::definition::WorkerDefinition;
use crate::{RegistryError, Result};

/// Reject names that would escape the registry directory or collide with
/// the hidden temp files used for atomic writes.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(RegistryError::InvalidName(name.to_owned()));
    }
    Ok(())
}

/// Path of the record for `name`.
pub fn record_path(dir: &Path, name: &str) -> Result<PathBuf> {
    validate_name(name)?;
    Ok(dir.join(name))
}

/// Write the record for `name` as one atomic replace.
///
/// Readers in other processes either see the previous file or the complete
/// new one, never a truncated write.
pub async fn write_record(dir: &Path, name: &str, definition: &WorkerDefinition) -> Result<()> {
    let target = record_path(dir, name)?;
    fs::create_dir_all(dir).await?;

    let payload = serde_json::to_vec_pretty(definition)?;
    let staging = dir.join(staging_name(name));
    fs::write(&staging, payload).await?;
    if let Err(err) = fs::rename(&staging, &target).await {
        let _ = fs::remove_file(&staging).await;
        return Err(err.into());
    }
    debug!(worker = name, path = %target.display(), "registered worker");
    Ok(())
}

/// Remove the record for `name`; `NotFound` when it does not exist.
pub async fn remove_record(dir: &Path, name: &str) -> Result<()> {
    let target = record_path(dir, name)?;
    match fs::remove_file(&target).await {
        Ok(()) => {
            debug!(worker = name, "unregistered worker");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(RegistryError::NotFound(name.to_owned()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Read every record in `dir`, sorted by worker name.
///
/// A missing directory is an empty registry. Records that cannot be read or
/// parsed are skipped; they are usually mid-write by another process and
/// will be picked up by the next change event.
pub async fn scan_dir(dir: &Path) -> io::Result<IndexMap<String, WorkerDefinition>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(IndexMap::new()),
        Err(err) => return Err(err),
    };

    let mut records = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = match entry.file_name().into_string() {
            Ok(name) if !name.starts_with('.') => name,
            _ => continue,
        };
        match entry.file_type().await {
            Ok(kind) if kind.is_file() => {}
            _ => continue,
        }

        let path = entry.path();
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(worker = %name, error = %err, "skipping unreadable registry record");
                continue;
            }
        };
        match serde_json::from_slice::<WorkerDefinition>(&raw) {
            Ok(definition) => records.push((name, definition)),
            Err(err) => {
                warn!(worker = %name, error = %err, "skipping malformed registry record");
            }
        }
    }

    records.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(records.into_iter().collect())
}

fn staging_name(name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    format!(".{name}.{}.{nanos}.tmp", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Protocol;
    use tempfile::tempdir;

    fn definition(port: u16) -> WorkerDefinition {
        WorkerDefinition {
            port: Some(port),
            protocol: Some(Protocol::Http),
            host: Some("localhost".into()),
            ..WorkerDefinition::default()
        }
    }

    #[test]
    fn rejects_path_like_names() {
        for name in ["", ".hidden", "../escape", "a/b", "a\\b"] {
            assert!(
                matches!(validate_name(name), Err(RegistryError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
        assert!(validate_name("api-worker").is_ok());
    }

    #[tokio::test]
    async fn write_then_scan_round_trips() {
        let dir = tempdir().unwrap();
        let registry = dir.path().join("registry");
        write_record(&registry, "beta", &definition(2)).await.unwrap();
        write_record(&registry, "alpha", &definition(1)).await.unwrap();
        write_record(&registry, "alpha", &definition(3)).await.unwrap();

        let records = scan_dir(&registry).await.unwrap();
        assert_eq!(records.keys().collect::<Vec<_>>(), vec!["alpha", "beta"]);
        assert_eq!(records["alpha"].port, Some(3));

        let leftovers: Vec<_> = std::fs::read_dir(&registry)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty(), "staging files must be renamed away");
    }

    #[tokio::test]
    async fn scan_skips_corrupt_and_hidden_files() {
        let dir = tempdir().unwrap();
        write_record(dir.path(), "good", &definition(1)).await.unwrap();
        std::fs::write(dir.path().join("partial"), b"{\"port\": 12").unwrap();
        std::fs::write(dir.path().join(".staging.tmp"), b"{}").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let records = scan_dir(dir.path()).await.unwrap();
        assert_eq!(records.keys().collect::<Vec<_>>(), vec!["good"]);
    }

    #[tokio::test]
    async fn missing_directory_scans_empty() {
        let dir = tempdir().unwrap();
        let records = scan_dir(&dir.path().join("absent")).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn removing_absent_record_is_not_found() {
        let dir = tempdir().unwrap();
        let err = remove_record(dir.path(), "ghost").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(name) if name == "ghost"));
    }
}
