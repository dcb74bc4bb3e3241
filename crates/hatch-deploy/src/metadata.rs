//! ---
//! hatch_section: "07-deploy-pipeline"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Worker build, binding assembly and upload."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use hatch_common::config::{
    LimitsConfig, MigrationConfig, PlacementConfig, PlacementMode, RenamedClass, UsageModel,
};
use serde::Serialize;
use serde_json::Value;

use crate::api::{api_path, HttpMethod, PlatformApi, RequestBody};
use crate::error::ApiError;
use crate::modules::{Module, ModuleType};

/// JSON document sent as the `metadata` part of an upload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkerMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_part: Option<String>,
    pub bindings: Vec<Value>,
    pub compatibility_date: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compatibility_flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_model: Option<UsageModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<PlacementConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrations: Option<MigrationPlan>,
}

impl WorkerMetadata {
    /// Metadata skeleton for `entry`: ES modules are referenced as
    /// `main_module`, CommonJS workers as `body_part`.
    pub fn for_entry(entry: &Module, compatibility_date: impl Into<String>) -> Self {
        let (main_module, body_part) = match entry.module_type {
            ModuleType::CommonJs => (None, Some(entry.name.clone())),
            _ => (Some(entry.name.clone()), None),
        };
        Self {
            main_module,
            body_part,
            bindings: Vec::new(),
            compatibility_date: compatibility_date.into(),
            compatibility_flags: Vec::new(),
            usage_model: None,
            placement: None,
            limits: None,
            migrations: None,
        }
    }

    /// Placement is only sent when smart placement is on.
    pub fn with_placement(mut self, placement: Option<&PlacementConfig>) -> Self {
        self.placement = placement
            .filter(|placement| placement.mode == PlacementMode::Smart)
            .cloned();
        self
    }
}

/// Durable object migrations still to be applied.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MigrationPlan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_tag: Option<String>,
    pub new_tag: String,
    pub steps: Vec<MigrationStep>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MigrationStep {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub new_classes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub new_sqlite_classes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub renamed_classes: Vec<RenamedClass>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deleted_classes: Vec<String>,
}

impl From<&MigrationConfig> for MigrationStep {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            new_classes: config.new_classes.clone(),
            new_sqlite_classes: config.new_sqlite_classes.clone(),
            renamed_classes: config.renamed_classes.clone(),
            deleted_classes: config.deleted_classes.clone(),
        }
    }
}

/// Migrations after `current_tag`, or `None` when nothing is pending.
///
/// An unknown current tag sends every configured step.
pub fn plan_migrations(
    configured: &[MigrationConfig],
    current_tag: Option<&str>,
) -> Option<MigrationPlan> {
    let last = configured.last()?;
    let pending = match current_tag.and_then(|tag| configured.iter().position(|m| m.tag == tag)) {
        Some(applied) => &configured[applied + 1..],
        None => configured,
    };
    if pending.is_empty() {
        return None;
    }
    Some(MigrationPlan {
        old_tag: current_tag.map(str::to_owned),
        new_tag: last.tag.clone(),
        steps: pending.iter().map(MigrationStep::from).collect(),
    })
}

/// Migration tag currently applied to `script_name`, if the script exists.
pub async fn fetch_migration_tag(
    api: &dyn PlatformApi,
    account_id: &str,
    script_name: &str,
) -> Result<Option<String>, ApiError> {
    let path = api_path(&["accounts", account_id, "workers", "scripts"])?;
    let scripts = api
        .fetch_result(HttpMethod::Get, &path, RequestBody::Empty, &[])
        .await?;
    let tag = scripts
        .as_array()
        .into_iter()
        .flatten()
        .find(|script| script.get("id").and_then(Value::as_str) == Some(script_name))
        .and_then(|script| script.get("migration_tag"))
        .and_then(Value::as_str)
        .map(str::to_owned);
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleContent;
    use serde_json::json;

    fn migration(tag: &str, new_class: &str) -> MigrationConfig {
        MigrationConfig {
            tag: tag.into(),
            new_classes: vec![new_class.into()],
            new_sqlite_classes: Vec::new(),
            renamed_classes: Vec::new(),
            deleted_classes: Vec::new(),
        }
    }

    #[test]
    fn sends_only_steps_after_current_tag() {
        let configured = vec![migration("v1", "A"), migration("v2", "B"), migration("v3", "C")];
        let plan = plan_migrations(&configured, Some("v1")).unwrap();
        assert_eq!(plan.old_tag.as_deref(), Some("v1"));
        assert_eq!(plan.new_tag, "v3");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].new_classes, vec!["B".to_owned()]);

        assert!(plan_migrations(&configured, Some("v3")).is_none());
        assert_eq!(plan_migrations(&configured, None).unwrap().steps.len(), 3);
        assert!(plan_migrations(&[], None).is_none());
    }

    #[test]
    fn commonjs_entry_is_a_body_part() {
        let entry = Module {
            name: "worker.cjs".into(),
            module_type: ModuleType::CommonJs,
            content: ModuleContent::Text(String::new()),
            file_path: None,
        };
        let value = serde_json::to_value(WorkerMetadata::for_entry(&entry, "2024-01-01")).unwrap();
        assert_eq!(
            value,
            json!({"body_part": "worker.cjs", "bindings": [], "compatibility_date": "2024-01-01"})
        );
    }

    #[test]
    fn placement_only_when_smart() {
        let entry = Module {
            name: "index.js".into(),
            module_type: ModuleType::EsModule,
            content: ModuleContent::Text(String::new()),
            file_path: None,
        };
        let off = PlacementConfig {
            mode: PlacementMode::Off,
        };
        let smart = PlacementConfig {
            mode: PlacementMode::Smart,
        };
        let metadata = WorkerMetadata::for_entry(&entry, "2024-01-01");
        assert!(metadata.clone().with_placement(Some(&off)).placement.is_none());
        assert_eq!(metadata.with_placement(Some(&smart)).placement, Some(smart));
    }
}
