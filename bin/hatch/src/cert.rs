//! ---
//! hatch_section: "08-cli"
//! hatch_subsection: "binary"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Command line tool for deploying workers and managing local state."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use anyhow::Result;
use clap::Args;
use hatch_certs::CertCache;
use hatch_common::GlobalPaths;
use hatch_logging::TracingLogger;
use tokio::runtime::Runtime;

/// Options for the `cert` command.
#[derive(Debug, Args)]
pub struct CertArgs {
    /// Print the PEM certificate instead of the file locations.
    #[arg(long)]
    pub print: bool,
}

/// Ensure a local certificate exists and report where it lives.
pub fn run(args: CertArgs, paths: &GlobalPaths) -> Result<()> {
    let cache = CertCache::from_paths(paths, TracingLogger::shared());
    let runtime = Runtime::new()?;
    let pair = runtime.block_on(cache.get_credentials())?;

    if args.print {
        print!("{}", pair.cert);
    } else {
        println!("key:  {}", cache.key_path().display());
        println!("cert: {}", cache.cert_path().display());
    }
    Ok(())
}
