//! ---
//! hatch_section: "01-core-functionality"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Shared primitives and utilities for the hatch tooling."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::LogFormat;
use crate::paths::GlobalPaths;
use crate::time::is_valid_date;

/// File name searched for when no explicit config path is given.
pub const DEFAULT_CONFIG_FILE: &str = "hatch.toml";

fn default_jsx_factory() -> String {
    "React.createElement".to_owned()
}

fn default_jsx_fragment() -> String {
    "React.Fragment".to_owned()
}

/// Worker configuration as declared in `hatch.toml`.
///
/// Loading and validation live here; the deploy pipeline only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub main: Option<PathBuf>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub compatibility_date: Option<String>,
    #[serde(default)]
    pub compatibility_flags: Vec<String>,
    #[serde(default)]
    pub node_compat: bool,
    #[serde(default)]
    pub no_bundle: bool,
    #[serde(default)]
    pub minify: bool,
    #[serde(default)]
    pub upload_source_maps: bool,
    #[serde(default)]
    pub tsconfig: Option<PathBuf>,
    #[serde(default = "default_jsx_factory")]
    pub jsx_factory: String,
    #[serde(default = "default_jsx_fragment")]
    pub jsx_fragment: String,
    #[serde(default)]
    pub define: IndexMap<String, String>,
    #[serde(default)]
    pub rules: Vec<ModuleRuleConfig>,
    #[serde(default)]
    pub usage_model: Option<UsageModel>,
    #[serde(default)]
    pub placement: Option<PlacementConfig>,
    #[serde(default)]
    pub limits: Option<LimitsConfig>,
    #[serde(default)]
    pub assets: Option<AssetsConfig>,
    #[serde(default)]
    pub vars: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub kv_namespaces: Vec<KvNamespaceConfig>,
    #[serde(default)]
    pub r2_buckets: Vec<R2BucketConfig>,
    #[serde(default)]
    pub d1_databases: Vec<D1DatabaseConfig>,
    #[serde(default)]
    pub durable_objects: DurableObjectsConfig,
    #[serde(default)]
    pub migrations: Vec<MigrationConfig>,
    #[serde(default)]
    pub queues: QueuesConfig,
    #[serde(default)]
    pub services: Vec<ServiceBindingConfig>,
    #[serde(default)]
    pub vectorize: Vec<VectorizeConfig>,
    #[serde(default)]
    pub hyperdrive: Vec<HyperdriveConfig>,
    #[serde(default)]
    pub ai: Option<SimpleBindingConfig>,
    #[serde(default)]
    pub browser: Option<SimpleBindingConfig>,
    #[serde(default)]
    pub analytics_engine_datasets: Vec<AnalyticsEngineConfig>,
    #[serde(default)]
    pub dispatch_namespaces: Vec<DispatchNamespaceConfig>,
    #[serde(default)]
    pub mtls_certificates: Vec<MtlsCertificateConfig>,
    #[serde(default, rename = "unsafe")]
    pub unsafe_bindings: UnsafeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`WorkerConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedWorkerConfig {
    pub config: WorkerConfig,
    pub source: PathBuf,
}

impl WorkerConfig {
    pub const ENV_CONFIG_PATH: &'static str = "HATCH_CONFIG";

    /// Load configuration from disk, respecting the `HATCH_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedWorkerConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedWorkerConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedWorkerConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Parse and validate a single config file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<WorkerConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Whether the worker asked for Node.js compatibility, through either the
    /// legacy `node_compat` key or the `nodejs_compat` compatibility flag.
    pub fn wants_node_compat(&self) -> bool {
        self.node_compat || self.compatibility_flags.iter().any(|f| f == "nodejs_compat")
    }

    /// Every queue name referenced as producer or consumer, producers first, deduplicated.
    pub fn referenced_queues(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.queues
            .producers
            .iter()
            .map(|p| p.queue.as_str())
            .chain(self.queues.consumers.iter().map(|c| c.queue.as_str()))
            .filter(|name| seen.insert(*name))
            .map(str::to_owned)
            .collect()
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if let Some(date) = &self.compatibility_date {
            if !is_valid_date(date) {
                return Err(anyhow!(
                    "compatibility_date \"{date}\" must be formatted as YYYY-MM-DD"
                ));
            }
        }
        if self.no_bundle && !self.define.is_empty() {
            return Err(anyhow!("`define` has no effect together with `no_bundle = true`"));
        }

        let mut names = HashSet::new();
        for name in self.binding_names() {
            if !names.insert(name) {
                return Err(anyhow!("binding name \"{name}\" is declared more than once"));
            }
        }
        Ok(())
    }

    fn binding_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.vars.keys().map(String::as_str).collect();
        names.extend(self.kv_namespaces.iter().map(|b| b.binding.as_str()));
        names.extend(self.r2_buckets.iter().map(|b| b.binding.as_str()));
        names.extend(self.d1_databases.iter().map(|b| b.binding.as_str()));
        names.extend(self.durable_objects.bindings.iter().map(|b| b.name.as_str()));
        names.extend(self.queues.producers.iter().map(|b| b.binding.as_str()));
        names.extend(self.services.iter().map(|b| b.binding.as_str()));
        names.extend(self.vectorize.iter().map(|b| b.binding.as_str()));
        names.extend(self.hyperdrive.iter().map(|b| b.binding.as_str()));
        names.extend(self.ai.iter().map(|b| b.binding.as_str()));
        names.extend(self.browser.iter().map(|b| b.binding.as_str()));
        names.extend(self.analytics_engine_datasets.iter().map(|b| b.binding.as_str()));
        names.extend(self.dispatch_namespaces.iter().map(|b| b.binding.as_str()));
        names.extend(self.mtls_certificates.iter().map(|b| b.binding.as_str()));
        names
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: None,
            main: None,
            account_id: None,
            compatibility_date: None,
            compatibility_flags: Vec::new(),
            node_compat: false,
            no_bundle: false,
            minify: false,
            upload_source_maps: false,
            tsconfig: None,
            jsx_factory: default_jsx_factory(),
            jsx_fragment: default_jsx_fragment(),
            define: IndexMap::new(),
            rules: Vec::new(),
            usage_model: None,
            placement: None,
            limits: None,
            assets: None,
            vars: IndexMap::new(),
            kv_namespaces: Vec::new(),
            r2_buckets: Vec::new(),
            d1_databases: Vec::new(),
            durable_objects: DurableObjectsConfig::default(),
            migrations: Vec::new(),
            queues: QueuesConfig::default(),
            services: Vec::new(),
            vectorize: Vec::new(),
            hyperdrive: Vec::new(),
            ai: None,
            browser: None,
            analytics_engine_datasets: Vec::new(),
            dispatch_namespaces: Vec::new(),
            mtls_certificates: Vec::new(),
            unsafe_bindings: UnsafeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for WorkerConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: WorkerConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// User module rule: files matching `globs` are uploaded as `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleRuleConfig {
    #[serde(rename = "type")]
    pub module_type: String,
    pub globs: Vec<String>,
    #[serde(default)]
    pub fallthrough: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UsageModel {
    Bundled,
    Unbound,
    Standard,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    #[default]
    Off,
    Smart,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PlacementConfig {
    #[serde(default)]
    pub mode: PlacementMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LimitsConfig {
    #[serde(default)]
    pub cpu_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetsConfig {
    pub directory: PathBuf,
    #[serde(default)]
    pub binding: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KvNamespaceConfig {
    pub binding: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct R2BucketConfig {
    pub binding: String,
    pub bucket_name: String,
    #[serde(default)]
    pub jurisdiction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct D1DatabaseConfig {
    pub binding: String,
    pub database_id: String,
    #[serde(default)]
    pub database_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DurableObjectsConfig {
    #[serde(default)]
    pub bindings: Vec<DurableObjectBindingConfig>,
}

/// Durable object binding; `script_name` points at another worker when set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DurableObjectBindingConfig {
    pub name: String,
    pub class_name: String,
    #[serde(default)]
    pub script_name: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenamedClass {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationConfig {
    pub tag: String,
    #[serde(default)]
    pub new_classes: Vec<String>,
    #[serde(default)]
    pub new_sqlite_classes: Vec<String>,
    #[serde(default)]
    pub renamed_classes: Vec<RenamedClass>,
    #[serde(default)]
    pub deleted_classes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct QueuesConfig {
    #[serde(default)]
    pub producers: Vec<QueueProducerConfig>,
    #[serde(default)]
    pub consumers: Vec<QueueConsumerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueProducerConfig {
    pub binding: String,
    pub queue: String,
    #[serde(default)]
    pub delivery_delay: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueConsumerConfig {
    pub queue: String,
    #[serde(default)]
    pub max_batch_size: Option<u32>,
    #[serde(default)]
    pub max_batch_timeout: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub dead_letter_queue: Option<String>,
}

/// Binding to another worker, resolved locally through the service registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceBindingConfig {
    pub binding: String,
    pub service: String,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub entrypoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorizeConfig {
    pub binding: String,
    pub index_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HyperdriveConfig {
    pub binding: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimpleBindingConfig {
    pub binding: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalyticsEngineConfig {
    pub binding: String,
    #[serde(default)]
    pub dataset: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchOutboundConfig {
    pub service: String,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchNamespaceConfig {
    pub binding: String,
    pub namespace: String,
    #[serde(default)]
    pub outbound: Option<DispatchOutboundConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MtlsCertificateConfig {
    pub binding: String,
    pub certificate_id: String,
}

/// Raw bindings passed through to the platform untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UnsafeConfig {
    #[serde(default)]
    pub bindings: Vec<serde_json::Value>,
}

fn default_log_directory() -> PathBuf {
    GlobalPaths::resolve().logs_dir()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            format: LogFormat::default(),
            file_prefix: None,
        }
    }
}
