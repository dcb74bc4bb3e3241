//! ---
//! hatch_section: "01-core-functionality"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Shared primitives and utilities for the hatch tooling."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
//! Shared primitives for the hatch workspace: the global directory layout,
//! the `hatch.toml` worker configuration model and tracing initialisation.

pub mod config;
pub mod logging;
pub mod paths;
pub mod time;

pub use config::{
    DurableObjectBindingConfig, LoggingConfig, QueueConsumerConfig, QueueProducerConfig,
    ServiceBindingConfig, WorkerConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use paths::GlobalPaths;
