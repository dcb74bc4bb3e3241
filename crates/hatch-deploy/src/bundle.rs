//! ---
//! hatch_section: "07-deploy-pipeline"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Worker build, binding assembly and upload."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hatch_common::config::PlacementMode;
use indexmap::IndexMap;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::DeployError;
use crate::modules::{Module, ModuleContent, ModuleType};

/// What the bundle is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleTarget {
    Deploy,
    Dev,
}

impl BundleTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            BundleTarget::Deploy => "deploy",
            BundleTarget::Dev => "dev",
        }
    }
}

/// Fully resolved bundler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOptions {
    pub target: BundleTarget,
    pub minify: bool,
    pub sourcemap: bool,
    pub jsx_factory: String,
    pub jsx_fragment: String,
    pub tsconfig: Option<PathBuf>,
    pub define: IndexMap<String, String>,
    pub node_compat: bool,
    pub placement: PlacementMode,
    pub assets_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleType {
    EsModule,
    CommonJs,
}

/// Per-input contribution to the bundle, used for size reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DependencyInfo {
    #[serde(rename = "bytesInOutput")]
    pub bytes_in_output: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleResult {
    pub modules: Vec<Module>,
    pub dependencies: IndexMap<String, DependencyInfo>,
    pub resolved_entry_point: PathBuf,
    pub bundle_type: BundleType,
    pub entry_content: String,
    pub source_map: Option<String>,
}

impl BundleResult {
    /// The bundled entry point as an uploadable module.
    pub fn entry_module(&self) -> Module {
        let name = self
            .resolved_entry_point
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index.js".to_owned());
        let module_type = match self.bundle_type {
            BundleType::EsModule => ModuleType::EsModule,
            BundleType::CommonJs => ModuleType::CommonJs,
        };
        Module {
            name,
            module_type,
            content: ModuleContent::Text(self.entry_content.clone()),
            file_path: Some(self.resolved_entry_point.clone()),
        }
    }

    /// Source map module named after the entry, when one was produced.
    pub fn source_map_module(&self) -> Option<Module> {
        let map = self.source_map.as_ref()?;
        let entry = self.entry_module();
        Some(Module {
            name: format!("{}.map", entry.name),
            module_type: ModuleType::SourceMap,
            content: ModuleContent::Text(map.clone()),
            file_path: None,
        })
    }
}

/// Build step collaborator.
#[async_trait]
pub trait Bundler: Send + Sync {
    async fn bundle(
        &self,
        entry: &Path,
        out_dir: &Path,
        options: &BundleOptions,
    ) -> Result<BundleResult, DeployError>;
}

/// Bundler backed by an esbuild-compatible executable.
#[derive(Debug, Clone)]
pub struct ExternalBundler {
    program: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Metafile {
    #[serde(default)]
    outputs: IndexMap<String, MetafileOutput>,
}

#[derive(Debug, Deserialize)]
struct MetafileOutput {
    #[serde(default)]
    inputs: IndexMap<String, DependencyInfo>,
}

const METAFILE: &str = "bundle-meta.json";

impl ExternalBundler {
    pub const ENV_PROGRAM: &'static str = "HATCH_BUNDLER";

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `HATCH_BUNDLER`, falling back to `esbuild` on `PATH`.
    pub fn from_env() -> Self {
        let program = std::env::var_os(Self::ENV_PROGRAM)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| OsString::from("esbuild"));
        Self::new(program)
    }

    fn outfile(entry: &Path, out_dir: &Path) -> PathBuf {
        let stem = entry
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index".to_owned());
        out_dir.join(format!("{stem}.js"))
    }

    /// Command line for one build.
    pub fn args(&self, entry: &Path, out_dir: &Path, options: &BundleOptions) -> Vec<OsString> {
        let outfile = Self::outfile(entry, out_dir);
        let mut args: Vec<OsString> = vec![
            entry.as_os_str().to_owned(),
            "--bundle".into(),
            "--format=esm".into(),
            "--target=es2022".into(),
            "--conditions=workerd,worker,browser".into(),
            "--log-level=warning".into(),
        ];
        args.push(flag("--outfile=", &outfile));
        args.push(flag("--metafile=", &out_dir.join(METAFILE)));
        args.push(format!("--jsx-factory={}", options.jsx_factory).into());
        args.push(format!("--jsx-fragment={}", options.jsx_fragment).into());
        if options.minify {
            args.push("--minify".into());
        }
        if options.sourcemap {
            args.push("--sourcemap=external".into());
        }
        if let Some(tsconfig) = &options.tsconfig {
            args.push(flag("--tsconfig=", tsconfig));
        }
        if options.node_compat {
            args.push("--external:node:*".into());
        }
        for (key, value) in &options.define {
            args.push(format!("--define:{key}={value}").into());
        }
        if options.target == BundleTarget::Dev {
            args.push("--define:HATCH_DEV=true".into());
        }
        args
    }
}

fn flag(prefix: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(prefix);
    arg.push(path.as_os_str());
    arg
}

#[async_trait]
impl Bundler for ExternalBundler {
    async fn bundle(
        &self,
        entry: &Path,
        out_dir: &Path,
        options: &BundleOptions,
    ) -> Result<BundleResult, DeployError> {
        let args = self.args(entry, out_dir, options);
        debug!(program = %self.program.display(), ?args, target = options.target.as_str(), "running bundler");
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|err| {
                DeployError::Bundle(format!("could not run {}: {err}", self.program.display()))
            })?;
        if !output.status.success() {
            return Err(DeployError::Bundle(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let outfile = Self::outfile(entry, out_dir);
        let entry_content = tokio::fs::read_to_string(&outfile)
            .await
            .map_err(DeployError::io(&outfile))?;
        let map_path = outfile.with_extension("js.map");
        let source_map = if options.sourcemap {
            tokio::fs::read_to_string(&map_path).await.ok()
        } else {
            None
        };
        let meta_path = out_dir.join(METAFILE);
        let raw_meta = tokio::fs::read(&meta_path)
            .await
            .map_err(DeployError::io(&meta_path))?;
        let metafile: Metafile = serde_json::from_slice(&raw_meta)
            .map_err(|err| DeployError::Bundle(format!("unreadable metafile: {err}")))?;
        let dependencies = metafile
            .outputs
            .into_iter()
            .find(|(name, _)| !name.ends_with(".map"))
            .map(|(_, output)| output.inputs)
            .unwrap_or_default();

        Ok(BundleResult {
            modules: Vec::new(),
            dependencies,
            resolved_entry_point: outfile,
            bundle_type: BundleType::EsModule,
            entry_content,
            source_map,
        })
    }
}
