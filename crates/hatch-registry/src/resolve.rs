//! ---
//! hatch_section: "06-service-registry"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Local worker discovery through a shared record directory."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::collections::HashSet;

use hatch_common::{DurableObjectBindingConfig, ServiceBindingConfig};
use indexmap::IndexMap;

use crate::definition::WorkerDefinition;

/// Registry entries a worker's bindings point at.
///
/// Keeps every snapshot entry whose name is a bound service or the
/// `script_name` of a durable object binding, in snapshot order. Pure: the
/// snapshot is not modified.
pub fn resolve_bound(
    snapshot: &IndexMap<String, WorkerDefinition>,
    services: &[ServiceBindingConfig],
    durable_objects: &[DurableObjectBindingConfig],
) -> IndexMap<String, WorkerDefinition> {
    let referenced: HashSet<&str> = services
        .iter()
        .map(|binding| binding.service.as_str())
        .chain(
            durable_objects
                .iter()
                .filter_map(|binding| binding.script_name.as_deref()),
        )
        .collect();

    snapshot
        .iter()
        .filter(|(name, _)| referenced.contains(name.as_str()))
        .map(|(name, definition)| (name.clone(), definition.clone()))
        .collect()
}
