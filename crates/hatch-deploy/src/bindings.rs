//! ---
//! hatch_section: "07-deploy-pipeline"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Worker build, binding assembly and upload."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
//! Binding manifest assembled from `hatch.toml` plus command line overrides.

use hatch_common::WorkerConfig;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// Display value for vars that differ from the config file.
pub const REDACTED: &str = "(hidden)";

/// One binding as the platform expects it in upload metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Binding {
    PlainText {
        name: String,
        text: String,
    },
    Json {
        name: String,
        json: Value,
    },
    SecretText {
        name: String,
        text: String,
    },
    KvNamespace {
        name: String,
        namespace_id: String,
    },
    R2Bucket {
        name: String,
        bucket_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        jurisdiction: Option<String>,
    },
    D1 {
        name: String,
        id: String,
    },
    DurableObjectNamespace {
        name: String,
        class_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        script_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        environment: Option<String>,
    },
    Queue {
        name: String,
        queue_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        delivery_delay: Option<u32>,
    },
    Service {
        name: String,
        service: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        environment: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        entrypoint: Option<String>,
    },
    Vectorize {
        name: String,
        index_name: String,
    },
    Hyperdrive {
        name: String,
        id: String,
    },
    Ai {
        name: String,
    },
    Browser {
        name: String,
    },
    AnalyticsEngine {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        dataset: Option<String>,
    },
    DispatchNamespace {
        name: String,
        namespace: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        outbound: Option<Value>,
    },
    MtlsCertificate {
        name: String,
        certificate_id: String,
    },
}

impl Binding {
    pub fn name(&self) -> &str {
        match self {
            Binding::PlainText { name, .. }
            | Binding::Json { name, .. }
            | Binding::SecretText { name, .. }
            | Binding::KvNamespace { name, .. }
            | Binding::R2Bucket { name, .. }
            | Binding::D1 { name, .. }
            | Binding::DurableObjectNamespace { name, .. }
            | Binding::Queue { name, .. }
            | Binding::Service { name, .. }
            | Binding::Vectorize { name, .. }
            | Binding::Hyperdrive { name, .. }
            | Binding::Ai { name }
            | Binding::Browser { name }
            | Binding::AnalyticsEngine { name, .. }
            | Binding::DispatchNamespace { name, .. }
            | Binding::MtlsCertificate { name, .. } => name,
        }
    }

    /// Heading used in the bindings summary.
    fn group(&self) -> &'static str {
        match self {
            Binding::PlainText { .. } | Binding::Json { .. } => "Vars",
            Binding::SecretText { .. } => "Secrets",
            Binding::KvNamespace { .. } => "KV Namespaces",
            Binding::R2Bucket { .. } => "R2 Buckets",
            Binding::D1 { .. } => "D1 Databases",
            Binding::DurableObjectNamespace { .. } => "Durable Objects",
            Binding::Queue { .. } => "Queues",
            Binding::Service { .. } => "Services",
            Binding::Vectorize { .. } => "Vectorize Indexes",
            Binding::Hyperdrive { .. } => "Hyperdrive Configs",
            Binding::Ai { .. } => "AI",
            Binding::Browser { .. } => "Browser",
            Binding::AnalyticsEngine { .. } => "Analytics Engine Datasets",
            Binding::DispatchNamespace { .. } => "Dispatch Namespaces",
            Binding::MtlsCertificate { .. } => "mTLS Certificates",
        }
    }

    /// Right-hand side of the summary line; `None` prints the name only.
    fn describe(&self) -> Option<String> {
        match self {
            Binding::PlainText { text, .. } => Some(Value::from(text.as_str()).to_string()),
            Binding::Json { json, .. } => Some(json.to_string()),
            Binding::SecretText { .. } | Binding::Ai { .. } | Binding::Browser { .. } => None,
            Binding::KvNamespace { namespace_id, .. } => Some(namespace_id.clone()),
            Binding::R2Bucket { bucket_name, .. } => Some(bucket_name.clone()),
            Binding::D1 { id, .. } | Binding::Hyperdrive { id, .. } => Some(id.clone()),
            Binding::DurableObjectNamespace {
                class_name,
                script_name,
                ..
            } => Some(match script_name {
                Some(script) => format!("{class_name} (defined in {script})"),
                None => class_name.clone(),
            }),
            Binding::Queue { queue_name, .. } => Some(queue_name.clone()),
            Binding::Service {
                service,
                entrypoint,
                ..
            } => Some(match entrypoint {
                Some(entrypoint) => format!("{service}#{entrypoint}"),
                None => service.clone(),
            }),
            Binding::Vectorize { index_name, .. } => Some(index_name.clone()),
            Binding::AnalyticsEngine { dataset, name } => {
                Some(dataset.clone().unwrap_or_else(|| name.clone()))
            }
            Binding::DispatchNamespace { namespace, .. } => Some(namespace.clone()),
            Binding::MtlsCertificate { certificate_id, .. } => Some(certificate_id.clone()),
        }
    }
}

/// Command line additions to the configured bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingOverrides {
    /// `--var KEY:VALUE`; wins over `[vars]` in the config.
    pub vars: IndexMap<String, String>,
    /// `--secret KEY:VALUE`; uploaded as `secret_text`.
    pub secrets: IndexMap<String, String>,
}

/// Every binding a deploy uploads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingManifest {
    /// Effective vars, config order with CLI additions appended.
    pub vars: IndexMap<String, Value>,
    pub bindings: Vec<Binding>,
    /// `[[unsafe.bindings]]`, passed through untouched.
    pub unsafe_bindings: Vec<Value>,
}

impl BindingManifest {
    pub fn assemble(config: &WorkerConfig, overrides: &BindingOverrides) -> Self {
        let mut vars = config.vars.clone();
        for (key, value) in &overrides.vars {
            vars.insert(key.clone(), Value::String(value.clone()));
        }

        let mut bindings = Vec::new();
        bindings.extend(overrides.secrets.iter().map(|(name, text)| Binding::SecretText {
            name: name.clone(),
            text: text.clone(),
        }));
        bindings.extend(config.kv_namespaces.iter().map(|kv| Binding::KvNamespace {
            name: kv.binding.clone(),
            namespace_id: kv.id.clone(),
        }));
        bindings.extend(config.r2_buckets.iter().map(|r2| Binding::R2Bucket {
            name: r2.binding.clone(),
            bucket_name: r2.bucket_name.clone(),
            jurisdiction: r2.jurisdiction.clone(),
        }));
        bindings.extend(config.d1_databases.iter().map(|d1| Binding::D1 {
            name: d1.binding.clone(),
            id: d1.database_id.clone(),
        }));
        bindings.extend(
            config
                .durable_objects
                .bindings
                .iter()
                .map(|durable| Binding::DurableObjectNamespace {
                    name: durable.name.clone(),
                    class_name: durable.class_name.clone(),
                    script_name: durable.script_name.clone(),
                    environment: durable.environment.clone(),
                }),
        );
        bindings.extend(config.queues.producers.iter().map(|producer| Binding::Queue {
            name: producer.binding.clone(),
            queue_name: producer.queue.clone(),
            delivery_delay: producer.delivery_delay,
        }));
        bindings.extend(config.services.iter().map(|service| Binding::Service {
            name: service.binding.clone(),
            service: service.service.clone(),
            environment: service.environment.clone(),
            entrypoint: service.entrypoint.clone(),
        }));
        bindings.extend(config.vectorize.iter().map(|index| Binding::Vectorize {
            name: index.binding.clone(),
            index_name: index.index_name.clone(),
        }));
        bindings.extend(config.hyperdrive.iter().map(|hd| Binding::Hyperdrive {
            name: hd.binding.clone(),
            id: hd.id.clone(),
        }));
        bindings.extend(config.ai.iter().map(|ai| Binding::Ai {
            name: ai.binding.clone(),
        }));
        bindings.extend(config.browser.iter().map(|browser| Binding::Browser {
            name: browser.binding.clone(),
        }));
        bindings.extend(
            config
                .analytics_engine_datasets
                .iter()
                .map(|dataset| Binding::AnalyticsEngine {
                    name: dataset.binding.clone(),
                    dataset: dataset.dataset.clone(),
                }),
        );
        bindings.extend(
            config
                .dispatch_namespaces
                .iter()
                .map(|dispatch| Binding::DispatchNamespace {
                    name: dispatch.binding.clone(),
                    namespace: dispatch.namespace.clone(),
                    outbound: dispatch.outbound.as_ref().map(|outbound| {
                        serde_json::json!({
                            "worker": {
                                "service": outbound.service,
                                "environment": outbound.environment,
                            },
                            "params": outbound
                                .parameters
                                .iter()
                                .map(|name| serde_json::json!({ "name": name }))
                                .collect::<Vec<_>>(),
                        })
                    }),
                }),
        );
        bindings.extend(config.mtls_certificates.iter().map(|cert| Binding::MtlsCertificate {
            name: cert.binding.clone(),
            certificate_id: cert.certificate_id.clone(),
        }));

        Self {
            vars,
            bindings,
            unsafe_bindings: config.unsafe_bindings.bindings.clone(),
        }
    }

    /// Vars for display: anything that differs from the config file value is
    /// replaced by [`REDACTED`].
    pub fn masked_vars(&self, config_vars: &IndexMap<String, Value>) -> IndexMap<String, Value> {
        self.vars
            .iter()
            .map(|(key, value)| {
                let shown = if config_vars.get(key) == Some(value) {
                    value.clone()
                } else {
                    Value::String(REDACTED.to_owned())
                };
                (key.clone(), shown)
            })
            .collect()
    }

    /// Bindings in upload order: vars, then typed bindings, then unsafe ones.
    pub fn to_upload(&self) -> Result<Vec<Value>, serde_json::Error> {
        let mut out = Vec::with_capacity(self.vars.len() + self.bindings.len());
        for binding in self.var_bindings(&self.vars).iter().chain(&self.bindings) {
            out.push(serde_json::to_value(binding)?);
        }
        out.extend(self.unsafe_bindings.iter().cloned());
        Ok(out)
    }

    /// Human readable summary; vars are taken from `display_vars` so callers
    /// pass the masked copy.
    pub fn summary_lines(&self, display_vars: &IndexMap<String, Value>) -> Vec<String> {
        let displayed = self.var_bindings(display_vars);
        let mut groups: IndexMap<&'static str, Vec<String>> = IndexMap::new();
        for binding in displayed.iter().chain(&self.bindings) {
            let line = match binding.describe() {
                Some(detail) => format!("  - {}: {}", binding.name(), detail),
                None => format!("  - {}", binding.name()),
            };
            groups.entry(binding.group()).or_default().push(line);
        }
        if !self.unsafe_bindings.is_empty() {
            groups
                .entry("Unsafe")
                .or_default()
                .push(format!("  - {} binding(s)", self.unsafe_bindings.len()));
        }

        if groups.is_empty() {
            return vec!["No bindings found.".to_owned()];
        }
        let mut lines = vec!["Your worker has access to the following bindings:".to_owned()];
        for (group, entries) in groups {
            lines.push(format!("- {group}:"));
            lines.extend(entries);
        }
        lines
    }

    fn var_bindings(&self, vars: &IndexMap<String, Value>) -> Vec<Binding> {
        vars.iter()
            .map(|(name, value)| match value {
                Value::String(text) => Binding::PlainText {
                    name: name.clone(),
                    text: text.clone(),
                },
                other => Binding::Json {
                    name: name.clone(),
                    json: other.clone(),
                },
            })
            .collect()
    }
}
