//! ---
//! hatch_section: "07-deploy-pipeline"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Worker build, binding assembly and upload."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
//! Deploy pipeline for hatch workers.
//!
//! [`deploy`] drives a single deploy end to end. The bundler and the
//! platform API are collaborators behind the [`Bundler`] and
//! [`PlatformApi`] traits so the pipeline can run against fakes.

pub mod api;
pub mod bindings;
pub mod bundle;
pub mod error;
pub mod form;
pub mod metadata;
pub mod modules;
pub mod output;
pub mod pipeline;
pub mod queues;
pub mod size;

pub use api::{api_path, HttpMethod, HttpPlatformClient, PlatformApi, RequestBody, DEFAULT_BASE_URL};
pub use bindings::{Binding, BindingManifest, BindingOverrides, REDACTED};
pub use bundle::{BundleOptions, BundleResult, BundleTarget, BundleType, Bundler, ExternalBundler};
pub use error::{ApiError, ApiMessage, DeployError};
pub use form::{FormPart, UploadForm};
pub use modules::{Module, ModuleContent, ModuleType};
pub use output::OutputLocation;
pub use pipeline::{deploy, DeployContext, DeployProps};
pub use queues::QUEUE_NOT_FOUND_CODE;
pub use size::{SizeReport, SIZE_BUDGET_BYTES};
