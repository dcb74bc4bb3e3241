//! ---
//! hatch_section: "06-service-registry"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Local worker discovery through a shared record directory."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Transport a registered worker listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => f.write_str("http"),
            Protocol::Https => f.write_str("https"),
        }
    }
}

/// Whether the worker runs in the local simulator or proxies to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    #[default]
    Local,
    Remote,
}

/// A durable object class exported by a registered worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableObjectExport {
    pub name: String,
    pub class_name: String,
}

/// Registry record describing how to reach a running worker.
///
/// Address fields are optional because a worker may register before its
/// server has bound a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default)]
    pub mode: WorkerMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<IndexMap<String, String>>,
    #[serde(default)]
    pub durable_objects: Vec<DurableObjectExport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable_objects_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable_objects_port: Option<u16>,
}

impl WorkerDefinition {
    /// Base URL of the worker, once protocol, host and port are all known.
    pub fn url(&self) -> Option<String> {
        match (self.protocol, self.host.as_deref(), self.port) {
            (Some(protocol), Some(host), Some(port)) => Some(format!("{protocol}://{host}:{port}")),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_camel_case_keys() {
        let definition = WorkerDefinition {
            port: Some(8787),
            protocol: Some(Protocol::Http),
            host: Some("127.0.0.1".into()),
            durable_objects: vec![DurableObjectExport {
                name: "COUNTER".into(),
                class_name: "Counter".into(),
            }],
            durable_objects_port: Some(9000),
            ..WorkerDefinition::default()
        };
        let value = serde_json::to_value(&definition).unwrap();
        assert_eq!(
            value,
            json!({
                "port": 8787,
                "protocol": "http",
                "host": "127.0.0.1",
                "mode": "local",
                "durableObjects": [{"name": "COUNTER", "className": "Counter"}],
                "durableObjectsPort": 9000
            })
        );
    }

    #[test]
    fn tolerates_sparse_records() {
        let definition: WorkerDefinition = serde_json::from_str(r#"{"mode":"remote"}"#).unwrap();
        assert_eq!(definition.mode, WorkerMode::Remote);
        assert!(definition.durable_objects.is_empty());
        assert_eq!(definition.url(), None);
    }

    #[test]
    fn url_requires_full_address() {
        let definition = WorkerDefinition {
            port: Some(443),
            protocol: Some(Protocol::Https),
            host: Some("localhost".into()),
            ..WorkerDefinition::default()
        };
        assert_eq!(definition.url().as_deref(), Some("https://localhost:443"));
    }
}
