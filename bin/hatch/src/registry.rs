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
use clap::{Args, Subcommand, ValueEnum};
use hatch_common::GlobalPaths;
use hatch_registry::{Protocol, ServiceRegistry, WorkerDefinition, WorkerMode};
use tokio::runtime::Runtime;

/// Registry maintenance commands.
#[derive(Debug, Subcommand)]
pub enum RegistryCommand {
    /// List every registered worker.
    List(ListArgs),
    /// Register (or replace) a worker record.
    Register(RegisterArgs),
    /// Remove a worker record. Missing records are not an error.
    Unregister(UnregisterArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Emit the snapshot as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RegisterArgs {
    /// Worker name.
    pub name: String,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long, value_enum, default_value_t = ProtocolArg::Http)]
    pub protocol: ProtocolArg,
    /// Register as proxying to the deployed worker instead of a local one.
    #[arg(long)]
    pub remote: bool,
}

#[derive(Debug, Args)]
pub struct UnregisterArgs {
    /// Worker name.
    pub name: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProtocolArg {
    Http,
    Https,
}

impl From<ProtocolArg> for Protocol {
    fn from(value: ProtocolArg) -> Self {
        match value {
            ProtocolArg::Http => Protocol::Http,
            ProtocolArg::Https => Protocol::Https,
        }
    }
}

/// Execute the supplied registry command.
pub fn run(command: RegistryCommand, paths: &GlobalPaths) -> Result<()> {
    let registry = ServiceRegistry::from_paths(paths);
    let runtime = Runtime::new()?;
    runtime.block_on(async {
        match command {
            RegistryCommand::List(args) => {
                let snapshot = registry.rescan_now().await?;
                if args.json {
                    println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
                } else if snapshot.is_empty() {
                    println!("No workers registered in {}", registry.dir().display());
                } else {
                    for (name, definition) in snapshot.iter() {
                        let address = definition.url().unwrap_or_else(|| "(not listening)".into());
                        println!("{name}\t{:?}\t{address}", definition.mode);
                    }
                }
            }
            RegistryCommand::Register(args) => {
                let definition = WorkerDefinition {
                    port: args.port,
                    protocol: Some(args.protocol.into()),
                    host: Some(args.host),
                    mode: if args.remote {
                        WorkerMode::Remote
                    } else {
                        WorkerMode::Local
                    },
                    ..WorkerDefinition::default()
                };
                registry.register(&args.name, &definition).await?;
                println!("Registered {}", args.name);
            }
            RegistryCommand::Unregister(args) => {
                if registry.unregister_if_present(&args.name).await? {
                    println!("Unregistered {}", args.name);
                } else {
                    println!("{} was not registered", args.name);
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    })
}
