//! ---
//! hatch_section: "07-deploy-pipeline"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Worker build, binding assembly and upload."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
//! The deploy state machine.
//!
//! validate → prepare output → build → assemble bindings → ensure queues →
//! upload → report → cleanup. Every step runs at most once and nothing is
//! retried. Remote calls are skipped on dry runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use hatch_common::time::{format_elapsed, today};
use hatch_common::WorkerConfig;
use hatch_logging::{hatch_debug, hatch_info, LogContext, SharedLogger};
use indexmap::IndexMap;
use serde_json::Value;

use crate::api::{api_path, HttpMethod, PlatformApi, RequestBody};
use crate::bindings::{BindingManifest, BindingOverrides};
use crate::bundle::{BundleOptions, BundleTarget, Bundler, DependencyInfo};
use crate::error::{ApiError, DeployError};
use crate::form::UploadForm;
use crate::metadata::{fetch_migration_tag, plan_migrations, WorkerMetadata};
use crate::modules::{collect_additional_modules, load_entry, resolve_rules, Module, ModuleRule};
use crate::output::OutputLocation;
use crate::queues::ensure_queues_exist;
use crate::size::spawn_size_report;

/// Inputs of one deploy: the loaded config plus command line overrides.
#[derive(Debug, Clone, Default)]
pub struct DeployProps {
    pub config: WorkerConfig,
    /// Directory holding `hatch.toml`; relative config paths resolve against it.
    pub base_dir: Option<PathBuf>,
    /// Script path from the command line, overriding `main`.
    pub entry: Option<PathBuf>,
    pub name: Option<String>,
    pub account_id: Option<String>,
    pub compatibility_date: Option<String>,
    /// Added to the configured compatibility flags.
    pub compatibility_flags: Vec<String>,
    pub overrides: BindingOverrides,
    /// Merged over the configured `define` map.
    pub define: IndexMap<String, String>,
    pub minify: Option<bool>,
    pub no_bundle: Option<bool>,
    pub outdir: Option<PathBuf>,
    pub dry_run: bool,
}

impl DeployProps {
    /// Run the configuration checks [`deploy`] starts with, without touching
    /// the filesystem or the platform.
    ///
    /// Lets callers report a missing compatibility date, name, entry point
    /// or account id before they go on to acquire credentials.
    pub fn check(&self) -> Result<(), DeployError> {
        validate(self).map(drop)
    }
}

/// Collaborators and environment for [`deploy`].
#[derive(Clone)]
pub struct DeployContext {
    pub api: Arc<dyn PlatformApi>,
    pub bundler: Arc<dyn Bundler>,
    pub logger: SharedLogger,
    /// Parent directory for the temporary output dir; system temp when unset.
    pub temp_root: Option<PathBuf>,
    /// Await the size report before returning instead of leaving it detached.
    pub await_diagnostics: bool,
}

impl DeployContext {
    pub const ENV_DETERMINISTIC_OUTPUT: &'static str = "HATCH_DETERMINISTIC_OUTPUT";

    pub fn new(api: Arc<dyn PlatformApi>, bundler: Arc<dyn Bundler>, logger: SharedLogger) -> Self {
        Self {
            api,
            bundler,
            logger,
            temp_root: None,
            await_diagnostics: deterministic_output_requested(),
        }
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    pub fn with_await_diagnostics(mut self, await_diagnostics: bool) -> Self {
        self.await_diagnostics = await_diagnostics;
        self
    }
}

fn deterministic_output_requested() -> bool {
    std::env::var(DeployContext::ENV_DETERMINISTIC_OUTPUT)
        .map(|value| !matches!(value.trim(), "" | "0" | "false"))
        .unwrap_or(false)
}

/// Values every later step relies on, resolved up front.
#[derive(Debug)]
struct Resolved {
    name: String,
    compatibility_date: String,
    compatibility_flags: Vec<String>,
    entry: PathBuf,
    account_id: Option<String>,
}

struct Built {
    entry: Module,
    modules: Vec<Module>,
    dependencies: IndexMap<String, DependencyInfo>,
}

/// Build and upload a worker.
///
/// Returns the new version id, or `None` on a dry run. Fails before any
/// remote call when the compatibility date, name, entry point or (outside
/// dry runs) account id cannot be resolved.
pub async fn deploy(props: DeployProps, ctx: &DeployContext) -> Result<Option<String>, DeployError> {
    let resolved = validate(&props)?;
    let output = OutputLocation::prepare(
        props.outdir.as_deref(),
        ctx.temp_root.as_deref(),
        &resolved.name,
    )
    .await?;

    let outcome = run(&props, &resolved, output.path(), ctx).await;
    // Removes the temporary output directory whatever the outcome.
    drop(output);
    outcome
}

fn validate(props: &DeployProps) -> Result<Resolved, DeployError> {
    let config = &props.config;
    let compatibility_date = props
        .compatibility_date
        .clone()
        .or_else(|| config.compatibility_date.clone())
        .filter(|date| !date.trim().is_empty())
        .ok_or_else(|| DeployError::MissingCompatibilityDate { today: today() })?;
    let name = props
        .name
        .clone()
        .or_else(|| config.name.clone())
        .filter(|name| !name.trim().is_empty())
        .ok_or(DeployError::MissingName)?;
    let entry = match (&props.entry, &config.main) {
        (Some(entry), _) => entry.clone(),
        (None, Some(main)) => resolve_against(props.base_dir.as_deref(), main),
        (None, None) => return Err(DeployError::MissingEntry),
    };
    let account_id = props.account_id.clone().or_else(|| config.account_id.clone());
    if account_id.is_none() && !props.dry_run {
        return Err(DeployError::MissingAccountId);
    }

    let mut compatibility_flags = config.compatibility_flags.clone();
    for flag in &props.compatibility_flags {
        if !compatibility_flags.contains(flag) {
            compatibility_flags.push(flag.clone());
        }
    }

    Ok(Resolved {
        name,
        compatibility_date,
        compatibility_flags,
        entry,
        account_id,
    })
}

fn resolve_against(base: Option<&Path>, path: &Path) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

async fn run(
    props: &DeployProps,
    resolved: &Resolved,
    out_dir: &Path,
    ctx: &DeployContext,
) -> Result<Option<String>, DeployError> {
    let config = &props.config;
    let log_ctx = LogContext::new().with_worker(&resolved.name);

    let rules = resolve_rules(&config.rules)?;
    let built = if props.no_bundle.unwrap_or(config.no_bundle) {
        hatch_debug!(context = log_ctx.clone().with_step("build"), "copying sources without bundling");
        build_unbundled(&resolved.entry, out_dir, ctx.temp_root.as_deref(), &rules).await?
    } else {
        hatch_debug!(context = log_ctx.clone().with_step("build"), "bundling {}", resolved.entry.display());
        build_bundled(props, resolved, out_dir, ctx.bundler.as_ref()).await?
    };

    let manifest = BindingManifest::assemble(config, &props.overrides);
    let display_vars = manifest.masked_vars(&config.vars);

    let version_id = match (&resolved.account_id, props.dry_run) {
        (Some(account_id), false) => {
            ensure_queues_exist(ctx.api.as_ref(), account_id, &config.referenced_queues()).await?;
            hatch_info!(
                context = log_ctx.clone().with_account(account_id).with_step("upload"),
                "uploading worker"
            );
            let started = Instant::now();
            let version_id = upload(ctx.api.as_ref(), account_id, resolved, config, &manifest, &built).await?;
            Some((version_id, started.elapsed()))
        }
        _ => {
            // Build the payload anyway so a dry run catches serialisation problems.
            let metadata = build_metadata(resolved, config, &manifest, &built, None)?;
            UploadForm::build(&metadata, &built.entry, &built.modules)?;
            None
        }
    };

    let mut sized = Vec::with_capacity(built.modules.len() + 1);
    sized.push(built.entry.clone());
    sized.extend(built.modules.iter().cloned());
    let size_report = spawn_size_report(sized, built.dependencies.clone(), ctx.logger.clone());
    if ctx.await_diagnostics {
        let _ = size_report.await;
    }

    ctx.logger.log(&manifest.summary_lines(&display_vars).join("\n"));

    match version_id {
        None => {
            ctx.logger.log("--dry-run: exiting now.");
            Ok(None)
        }
        Some((version_id, elapsed)) => {
            ctx.logger
                .log(&format!("Uploaded {} ({} sec)", resolved.name, format_elapsed(elapsed)));
            ctx.logger.log(&format!("Current Version ID: {version_id}"));
            Ok(Some(version_id))
        }
    }
}

async fn build_unbundled(
    entry: &Path,
    out_dir: &Path,
    temp_root: Option<&Path>,
    rules: &[ModuleRule],
) -> Result<Built, DeployError> {
    let entry_module = load_entry(entry, rules).await?;
    // Output from this or an earlier deploy may sit under the entry's directory.
    let mut excluded = vec![out_dir];
    excluded.extend(temp_root);
    let modules = collect_additional_modules(entry, rules, &excluded).await?;
    for module in std::iter::once(&entry_module).chain(&modules) {
        let target = out_dir.join(&module.name);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(DeployError::io(parent))?;
        }
        tokio::fs::write(&target, module.content.as_bytes())
            .await
            .map_err(DeployError::io(&target))?;
    }
    Ok(Built {
        entry: entry_module,
        modules,
        dependencies: IndexMap::new(),
    })
}

async fn build_bundled(
    props: &DeployProps,
    resolved: &Resolved,
    out_dir: &Path,
    bundler: &dyn Bundler,
) -> Result<Built, DeployError> {
    let config = &props.config;
    let base = props.base_dir.as_deref();
    let mut define = config.define.clone();
    define.extend(props.define.iter().map(|(k, v)| (k.clone(), v.clone())));

    let options = BundleOptions {
        target: BundleTarget::Deploy,
        minify: props.minify.unwrap_or(config.minify),
        sourcemap: config.upload_source_maps,
        jsx_factory: config.jsx_factory.clone(),
        jsx_fragment: config.jsx_fragment.clone(),
        tsconfig: config.tsconfig.as_deref().map(|path| resolve_against(base, path)),
        define,
        node_compat: config.wants_node_compat()
            || resolved.compatibility_flags.iter().any(|flag| flag == "nodejs_compat"),
        placement: config.placement.as_ref().map(|p| p.mode).unwrap_or_default(),
        assets_dir: config
            .assets
            .as_ref()
            .map(|assets| resolve_against(base, &assets.directory)),
    };

    let result = bundler.bundle(&resolved.entry, out_dir, &options).await?;
    let entry = result.entry_module();
    let mut modules = result.modules.clone();
    if config.upload_source_maps {
        modules.extend(result.source_map_module());
    }
    Ok(Built {
        entry,
        modules,
        dependencies: result.dependencies,
    })
}

fn build_metadata(
    resolved: &Resolved,
    config: &WorkerConfig,
    manifest: &BindingManifest,
    built: &Built,
    current_migration_tag: Option<&str>,
) -> Result<WorkerMetadata, DeployError> {
    let mut metadata = WorkerMetadata::for_entry(&built.entry, resolved.compatibility_date.clone())
        .with_placement(config.placement.as_ref());
    metadata.bindings = manifest.to_upload()?;
    metadata.compatibility_flags = resolved.compatibility_flags.clone();
    metadata.usage_model = config.usage_model;
    metadata.limits = config.limits.clone();
    metadata.migrations = plan_migrations(&config.migrations, current_migration_tag);
    Ok(metadata)
}

async fn upload(
    api: &dyn PlatformApi,
    account_id: &str,
    resolved: &Resolved,
    config: &WorkerConfig,
    manifest: &BindingManifest,
    built: &Built,
) -> Result<String, DeployError> {
    let current_tag = if config.migrations.is_empty() {
        None
    } else {
        fetch_migration_tag(api, account_id, &resolved.name).await?
    };
    let metadata = build_metadata(resolved, config, manifest, built, current_tag.as_deref())?;
    let form = UploadForm::build(&metadata, &built.entry, &built.modules)?;

    let path = api_path(&["accounts", account_id, "workflows", resolved.name.as_str()])?;
    let result = api
        .fetch_result(
            HttpMethod::Put,
            &path,
            RequestBody::Multipart(form),
            &[
                ("include_subdomain_availability", "true"),
                ("excludeScript", "true"),
            ],
        )
        .await?;

    version_id(&result).ok_or_else(|| {
        DeployError::Api(ApiError::Decode {
            path,
            reason: "upload response did not include a version id".to_owned(),
        })
    })
}

fn version_id(result: &Value) -> Option<String> {
    ["id", "version_id", "etag"]
        .iter()
        .find_map(|key| result.get(*key).and_then(Value::as_str))
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props() -> DeployProps {
        DeployProps {
            config: WorkerConfig {
                name: Some("api".into()),
                main: Some(PathBuf::from("src/index.js")),
                compatibility_date: Some("2024-06-01".into()),
                account_id: Some("acct".into()),
                compatibility_flags: vec!["streams_enable_constructors".into()],
                ..WorkerConfig::default()
            },
            base_dir: Some(PathBuf::from("/project")),
            ..DeployProps::default()
        }
    }

    #[test]
    fn validate_prefers_cli_values() {
        let mut props = props();
        props.name = Some("api-staging".into());
        props.compatibility_date = Some("2024-09-09".into());
        props.compatibility_flags = vec!["nodejs_compat".into(), "streams_enable_constructors".into()];
        let resolved = validate(&props).unwrap();
        assert_eq!(resolved.name, "api-staging");
        assert_eq!(resolved.compatibility_date, "2024-09-09");
        assert_eq!(resolved.entry, PathBuf::from("/project/src/index.js"));
        assert_eq!(
            resolved.compatibility_flags,
            vec!["streams_enable_constructors".to_owned(), "nodejs_compat".to_owned()]
        );
    }

    #[test]
    fn validate_requires_date_then_name() {
        let mut props = props();
        props.config.compatibility_date = None;
        props.config.name = None;
        assert!(matches!(
            validate(&props),
            Err(DeployError::MissingCompatibilityDate { .. })
        ));
        props.compatibility_date = Some("2024-06-01".into());
        assert!(matches!(validate(&props), Err(DeployError::MissingName)));
    }

    #[test]
    fn account_only_required_outside_dry_run() {
        let mut props = props();
        props.config.account_id = None;
        assert!(matches!(validate(&props), Err(DeployError::MissingAccountId)));
        props.dry_run = true;
        assert!(validate(&props).is_ok());
    }

    #[test]
    fn check_reports_configuration_errors_in_deploy_order() {
        let mut props = props();
        props.config.compatibility_date = None;
        props.config.account_id = None;
        let err = props.check().unwrap_err();
        assert!(err.to_string().contains("--compatibility-date"));

        props.compatibility_date = Some("2024-06-01".into());
        assert!(matches!(props.check(), Err(DeployError::MissingAccountId)));
        props.account_id = Some("acct".into());
        props.check().unwrap();
    }

    #[test]
    fn version_id_falls_back_through_known_keys() {
        assert_eq!(version_id(&json!({"id": "v1", "etag": "e"})).as_deref(), Some("v1"));
        assert_eq!(version_id(&json!({"version_id": "v2"})).as_deref(), Some("v2"));
        assert_eq!(version_id(&json!({"etag": "e3"})).as_deref(), Some("e3"));
        assert_eq!(version_id(&json!({})), None);
    }
}
