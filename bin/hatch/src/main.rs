//! ---
//! hatch_section: "08-cli"
//! hatch_subsection: "binary"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Command line tool for deploying workers and managing local state."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hatch_common::{init_tracing, GlobalPaths, LoggingConfig};
use hatch_logging as logging;

mod cert;
mod deploy;
mod registry;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Build, deploy and run workers locally",
    long_about = None
)]
struct Cli {
    /// Root of the global hatch directory (registry, certificates, logs).
    #[arg(long, env = "HATCH_HOME", global = true, value_name = "DIR")]
    home: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Build a worker and upload it to the platform")]
    Deploy(deploy::DeployArgs),
    #[command(subcommand, about = "Inspect and edit the local dev registry")]
    Registry(registry::RegistryCommand),
    #[command(about = "Print the locally trusted TLS certificate paths")]
    Cert(cert::CertArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = match &cli.home {
        Some(home) => GlobalPaths::new(home),
        None => GlobalPaths::resolve(),
    };
    let logging_config = LoggingConfig {
        directory: paths.logs_dir(),
        ..LoggingConfig::default()
    };
    if let Err(err) = init_tracing("hatch", &logging_config) {
        logging::init();
        tracing::warn!(error = %err, "file logging unavailable; using terminal output only");
    }

    match cli.command {
        Commands::Deploy(args) => deploy::run(args)?,
        Commands::Registry(cmd) => registry::run(cmd, &paths)?,
        Commands::Cert(args) => cert::run(args, &paths)?,
    }
    Ok(())
}
