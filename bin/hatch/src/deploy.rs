//! ---
//! hatch_section: "08-cli"
//! hatch_subsection: "binary"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Command line tool for deploying workers and managing local state."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use hatch_common::config::{LoadedWorkerConfig, DEFAULT_CONFIG_FILE};
use hatch_common::WorkerConfig;
use hatch_deploy::{
    deploy, ApiError, BindingOverrides, DeployContext, DeployProps, ExternalBundler,
    HttpPlatformClient, DEFAULT_BASE_URL,
};
use hatch_logging::TracingLogger;
use indexmap::IndexMap;
use tokio::runtime::Runtime;
use tracing::debug;

/// Options for the `deploy` command.
#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Entry point of the worker; defaults to `main` from the config.
    #[arg(value_name = "SCRIPT")]
    pub script: Option<PathBuf>,
    /// Path to the worker configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub name: Option<String>,
    /// Date of the runtime behaviour to target, as YYYY-MM-DD.
    #[arg(long, value_name = "DATE")]
    pub compatibility_date: Option<String>,
    #[arg(long = "compatibility-flag", value_name = "FLAG")]
    pub compatibility_flags: Vec<String>,
    /// Plain text variable, overriding `[vars]`.
    #[arg(long = "var", value_name = "KEY:VALUE", value_parser = parse_key_value)]
    pub vars: Vec<(String, String)>,
    /// Secret uploaded with the worker and never printed.
    #[arg(long = "secret", value_name = "KEY:VALUE", value_parser = parse_key_value)]
    pub secrets: Vec<(String, String)>,
    /// Bundler substitution for a global identifier.
    #[arg(long = "define", value_name = "KEY:VALUE", value_parser = parse_key_value)]
    pub defines: Vec<(String, String)>,
    #[arg(long)]
    pub minify: bool,
    /// Upload sources as they are instead of running the bundler.
    #[arg(long)]
    pub no_bundle: bool,
    /// Keep build output in this directory instead of a temporary one.
    #[arg(long, value_name = "DIR")]
    pub outdir: Option<PathBuf>,
    /// Build and validate everything without uploading.
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long, env = "HATCH_ACCOUNT_ID")]
    pub account_id: Option<String>,
}

/// Execute a deploy and print the resulting version id.
pub fn run(args: DeployArgs) -> Result<()> {
    let loaded = load_config(args.config.as_deref())?;
    let (config, base_dir) = match loaded {
        Some(LoadedWorkerConfig { config, source }) => {
            debug!(config = %source.display(), "using worker configuration");
            let base_dir = source.parent().map(Path::to_path_buf);
            (config, base_dir)
        }
        None => (WorkerConfig::default(), None),
    };

    let props = DeployProps {
        config,
        base_dir,
        entry: args.script,
        name: args.name,
        account_id: args.account_id,
        compatibility_date: args.compatibility_date,
        compatibility_flags: args.compatibility_flags,
        overrides: BindingOverrides {
            vars: args.vars.into_iter().collect(),
            secrets: args.secrets.into_iter().collect(),
        },
        define: args.defines.into_iter().collect::<IndexMap<_, _>>(),
        minify: args.minify.then_some(true),
        no_bundle: args.no_bundle.then_some(true),
        outdir: args.outdir,
        dry_run: args.dry_run,
    };

    // Configuration mistakes are reported before credentials are looked up.
    props.check()?;

    let api = match HttpPlatformClient::from_env() {
        Ok(client) => client,
        // Dry runs never reach the API, so a missing token only matters for real deploys.
        Err(ApiError::Unauthenticated) if args.dry_run => {
            HttpPlatformClient::new(DEFAULT_BASE_URL, String::new())?
        }
        Err(err) => return Err(err.into()),
    };
    let ctx = DeployContext::new(
        Arc::new(api),
        Arc::new(ExternalBundler::from_env()),
        TracingLogger::shared(),
    );

    let runtime = Runtime::new()?;
    if let Some(version_id) = runtime.block_on(deploy(props, &ctx))? {
        debug!(%version_id, "deploy finished");
    }
    Ok(())
}

/// The explicit `--config`, `HATCH_CONFIG`, or `hatch.toml` in the working
/// directory. Deploying purely from flags is allowed when none exist.
fn load_config(explicit: Option<&Path>) -> Result<Option<LoadedWorkerConfig>> {
    let from_env = std::env::var_os(WorkerConfig::ENV_CONFIG_PATH).is_some_and(|v| !v.is_empty());
    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
    let candidates = match explicit {
        Some(path) => vec![path.to_path_buf()],
        None if from_env || default.exists() => vec![default],
        None => return Ok(None),
    };
    Ok(Some(WorkerConfig::load_with_source(&candidates)?))
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!("expected KEY:VALUE, got `{raw}`")),
    }
}
