//! ---
//! hatch_section: "07-deploy-pipeline"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Worker build, binding assembly and upload."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tempfile::TempDir;
use tracing::debug;

use crate::error::DeployError;

const TEMP_PREFIX: &str = "hatch-deploy-";

/// Where build output is written for one deploy.
///
/// The temporary variant deletes its directory when dropped, so every exit
/// path out of the pipeline cleans up.
#[derive(Debug)]
pub enum OutputLocation {
    Explicit(PathBuf),
    Temp(TempDir),
}

impl OutputLocation {
    /// Use `outdir` when given (writing a provenance README), otherwise a
    /// fresh temporary directory under `temp_root` or the system temp dir.
    pub async fn prepare(
        outdir: Option<&Path>,
        temp_root: Option<&Path>,
        worker_name: &str,
    ) -> Result<Self, DeployError> {
        if let Some(dir) = outdir {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(DeployError::io(dir))?;
            let readme = dir.join("README.md");
            let generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            let contents = format!(
                "This folder contains the built output assets for the worker \"{worker_name}\" generated at {generated_at}.\n"
            );
            tokio::fs::write(&readme, contents)
                .await
                .map_err(DeployError::io(&readme))?;
            return Ok(OutputLocation::Explicit(dir.to_path_buf()));
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX);
        let temp = match temp_root {
            Some(root) => {
                tokio::fs::create_dir_all(root)
                    .await
                    .map_err(DeployError::io(root))?;
                builder.tempdir_in(root).map_err(DeployError::io(root))?
            }
            None => builder
                .tempdir()
                .map_err(DeployError::io(std::env::temp_dir()))?,
        };
        debug!(path = %temp.path().display(), "created temporary output directory");
        Ok(OutputLocation::Temp(temp))
    }

    pub fn path(&self) -> &Path {
        match self {
            OutputLocation::Explicit(path) => path,
            OutputLocation::Temp(temp) => temp.path(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, OutputLocation::Temp(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn explicit_dir_gets_readme() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dist");
        let location = OutputLocation::prepare(Some(&out), None, "api").await.unwrap();
        assert!(!location.is_temporary());
        let readme = std::fs::read_to_string(out.join("README.md")).unwrap();
        assert!(readme.contains("worker \"api\""));
        drop(location);
        assert!(out.exists());
    }

    #[tokio::test]
    async fn temp_dir_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let location = OutputLocation::prepare(None, Some(root.path()), "api")
            .await
            .unwrap();
        let path = location.path().to_path_buf();
        assert!(path.starts_with(root.path()));
        assert!(path.is_dir());
        drop(location);
        assert!(!path.exists());
    }
}
