//! ---
//! hatch_section: "01-core-functionality"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Shared primitives and utilities for the hatch tooling."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

/// Environment variable overriding the global hatch directory.
pub const ENV_HOME: &str = "HATCH_HOME";

const DEFAULT_DIR_NAME: &str = ".hatch";
const LOCAL_CERT_DIR: &str = "local-cert";
const REGISTRY_DIR: &str = "registry";
const LOGS_DIR: &str = "logs";

/// User-scoped directory shared by every hatch process on the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalPaths {
    root: PathBuf,
}

impl GlobalPaths {
    /// Construct the layout from an arbitrary root directory.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolve the root from `HATCH_HOME`, then `~/.hatch`.
    ///
    /// Falls back to the system temp directory when no home directory can be
    /// determined (containers without a passwd entry).
    pub fn resolve() -> Self {
        if let Ok(dir) = std::env::var(ENV_HOME) {
            if !dir.trim().is_empty() {
                return Self::new(dir);
            }
        }
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        Self::new(home.join(DEFAULT_DIR_NAME))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the cached `key.pem` / `cert.pem` pair.
    pub fn local_cert_dir(&self) -> PathBuf {
        self.root.join(LOCAL_CERT_DIR)
    }

    /// Directory of worker definition records.
    pub fn registry_dir(&self) -> PathBuf {
        self.root.join(REGISTRY_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }
}
