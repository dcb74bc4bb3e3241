//! ---
//! hatch_section: "07-deploy-pipeline"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Worker build, binding assembly and upload."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use hatch_common::WorkerConfig;
use hatch_deploy::bundle::DependencyInfo;
use hatch_deploy::{
    deploy, ApiError, ApiMessage, BindingOverrides, BundleOptions, BundleResult, BundleTarget,
    BundleType, Bundler, DeployContext, DeployError, DeployProps, HttpMethod, PlatformApi,
    RequestBody, QUEUE_NOT_FOUND_CODE,
};
use hatch_logging::{LogLevel, MemoryLogger};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct Call {
    method: HttpMethod,
    path: String,
    query: Vec<(String, String)>,
    body: RequestBody,
}

/// Platform fake recording every request.
#[derive(Default)]
struct RecordingApi {
    calls: Mutex<Vec<Call>>,
    queue_error: Option<u32>,
    upload_error: bool,
    migration_tag: Option<String>,
}

impl RecordingApi {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn uploads(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == HttpMethod::Put)
            .collect()
    }
}

#[async_trait]
impl PlatformApi for RecordingApi {
    async fn fetch_result(
        &self,
        method: HttpMethod,
        path: &str,
        body: RequestBody,
        query: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        self.calls.lock().push(Call {
            method,
            path: path.to_owned(),
            query: query
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            body,
        });
        let failure = |code: u32, message: &str| ApiError::Api {
            path: path.to_owned(),
            status: Some(400),
            errors: vec![ApiMessage {
                code,
                message: message.to_owned(),
            }],
        };

        if path.contains("/queues/") {
            return match self.queue_error {
                Some(code) => Err(failure(code, "Queue does not exist")),
                None => Ok(json!({"queue_name": "jobs"})),
            };
        }
        if path.ends_with("/workers/scripts") {
            return Ok(json!([{"id": "api", "migration_tag": self.migration_tag}]));
        }
        if self.upload_error {
            return Err(failure(10021, "Uncaught SyntaxError"));
        }
        Ok(json!({"id": "version-123", "etag": "abc"}))
    }
}

/// Bundler fake returning a fixed bundle and remembering the options it saw.
#[derive(Default)]
struct StaticBundler {
    seen: Mutex<Option<BundleOptions>>,
    fail: bool,
}

#[async_trait]
impl Bundler for StaticBundler {
    async fn bundle(
        &self,
        _entry: &Path,
        out_dir: &Path,
        options: &BundleOptions,
    ) -> Result<BundleResult, DeployError> {
        *self.seen.lock() = Some(options.clone());
        if self.fail {
            return Err(DeployError::Bundle("Could not resolve \"missing-dep\"".into()));
        }
        Ok(BundleResult {
            modules: Vec::new(),
            dependencies: IndexMap::from([(
                "src/index.ts".to_owned(),
                DependencyInfo { bytes_in_output: 42 },
            )]),
            resolved_entry_point: out_dir.join("index.js"),
            bundle_type: BundleType::EsModule,
            entry_content: "export default { fetch() { return new Response('ok'); } };".into(),
            source_map: None,
        })
    }
}

struct Fixture {
    project: TempDir,
    temp_root: TempDir,
    api: Arc<RecordingApi>,
    bundler: Arc<StaticBundler>,
    logger: Arc<MemoryLogger>,
}

impl Fixture {
    fn new(api: RecordingApi) -> Self {
        Self::with_bundler(api, StaticBundler::default())
    }

    fn with_bundler(api: RecordingApi, bundler: StaticBundler) -> Self {
        let project = tempfile::tempdir().unwrap();
        let src = project.path().join("src");
        std::fs::create_dir_all(src.join("lib")).unwrap();
        std::fs::write(src.join("index.js"), "import { a } from './lib/a.js';\nexport default {};\n")
            .unwrap();
        std::fs::write(src.join("lib/a.js"), "export const a = 1;\n").unwrap();
        Self {
            project,
            temp_root: tempfile::tempdir().unwrap(),
            api: Arc::new(api),
            bundler: Arc::new(bundler),
            logger: MemoryLogger::new(),
        }
    }

    fn context(&self) -> DeployContext {
        DeployContext::new(self.api.clone(), self.bundler.clone(), self.logger.clone())
            .with_temp_root(self.temp_root.path())
            .with_await_diagnostics(true)
    }

    fn props(&self, toml: &str) -> DeployProps {
        DeployProps {
            config: WorkerConfig::from_str(toml).unwrap(),
            base_dir: Some(self.project.path().to_path_buf()),
            ..DeployProps::default()
        }
    }

    fn temp_root_is_empty(&self) -> bool {
        std::fs::read_dir(self.temp_root.path()).unwrap().next().is_none()
    }
}

const BASE: &str = r#"
name = "api"
main = "src/index.js"
account_id = "acct-1"
compatibility_date = "2024-06-01"
no_bundle = true
"#;

#[tokio::test]
async fn dry_run_never_uploads() {
    let fixture = Fixture::new(RecordingApi::default());
    let mut props = fixture.props(&format!("{BASE}\n[[queues.producers]]\nbinding = \"JOBS\"\nqueue = \"jobs\"\n"));
    props.dry_run = true;
    props.config.account_id = None;

    let outcome = deploy(props, &fixture.context()).await.unwrap();
    assert_eq!(outcome, None);
    assert!(fixture.api.calls().is_empty(), "dry run must not reach the platform");
    assert!(fixture.logger.contains(LogLevel::Log, "--dry-run: exiting now."));
    assert!(fixture.logger.contains(LogLevel::Log, "Total Upload:"));
    assert!(fixture.temp_root_is_empty());
}

#[tokio::test]
async fn missing_queue_fails_before_upload() {
    let fixture = Fixture::new(RecordingApi {
        queue_error: Some(QUEUE_NOT_FOUND_CODE),
        ..RecordingApi::default()
    });
    let props = fixture.props(&format!(
        "{BASE}\n[[queues.producers]]\nbinding = \"JOBS\"\nqueue = \"jobs\"\n"
    ));

    let err = deploy(props, &fixture.context()).await.unwrap_err();
    assert!(matches!(&err, DeployError::QueueNotFound { name } if name == "jobs"));
    assert!(err.to_string().contains("hatch queues create jobs"));

    let calls = fixture.api.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, "/accounts/acct-1/queues/jobs");
    assert!(fixture.api.uploads().is_empty());
    assert!(fixture.temp_root_is_empty());
}

#[tokio::test]
async fn other_queue_errors_propagate() {
    let fixture = Fixture::new(RecordingApi {
        queue_error: Some(10000),
        ..RecordingApi::default()
    });
    let props = fixture.props(&format!(
        "{BASE}\n[[queues.consumers]]\nqueue = \"events\"\n"
    ));

    let err = deploy(props, &fixture.context()).await.unwrap_err();
    assert!(matches!(err, DeployError::Api(ref api) if api.has_code(10000)));
    assert!(fixture.api.uploads().is_empty());
}

#[tokio::test]
async fn vars_are_masked_on_screen_but_uploaded_verbatim() {
    let fixture = Fixture::new(RecordingApi::default());
    let mut props = fixture.props(&format!("{BASE}\n[vars]\nA = \"1\"\nB = \"2\"\n"));
    props.overrides = BindingOverrides {
        vars: IndexMap::from([("A".to_owned(), "override".to_owned())]),
        secrets: IndexMap::new(),
    };

    let version = deploy(props, &fixture.context()).await.unwrap();
    assert_eq!(version.as_deref(), Some("version-123"));

    let output = fixture.logger.output();
    assert!(output.contains("  - A: \"(hidden)\""), "{output}");
    assert!(output.contains("  - B: \"2\""), "{output}");
    assert!(!output.contains("override"));

    let uploads = fixture.api.uploads();
    assert_eq!(uploads.len(), 1);
    let RequestBody::Multipart(form) = &uploads[0].body else {
        panic!("upload must be multipart");
    };
    let metadata = form.metadata().expect("metadata part");
    let bindings = metadata["bindings"].as_array().unwrap();
    assert!(bindings.contains(&json!({"type": "plain_text", "name": "A", "text": "override"})));
    assert!(bindings.contains(&json!({"type": "plain_text", "name": "B", "text": "2"})));
}

#[tokio::test]
async fn upload_request_shape_and_report() {
    let fixture = Fixture::new(RecordingApi::default());
    let props = fixture.props(BASE);

    deploy(props, &fixture.context()).await.unwrap();

    let uploads = fixture.api.uploads();
    let upload = &uploads[0];
    assert_eq!(upload.path, "/accounts/acct-1/workflows/api");
    assert!(upload
        .query
        .contains(&("include_subdomain_availability".to_owned(), "true".to_owned())));
    assert!(upload.query.contains(&("excludeScript".to_owned(), "true".to_owned())));

    let RequestBody::Multipart(form) = &upload.body else {
        panic!("upload must be multipart");
    };
    let names: Vec<_> = form.parts().iter().map(|part| part.name.as_str()).collect();
    assert_eq!(names, vec!["metadata", "index.js", "lib/a.js"]);
    let metadata = form.metadata().unwrap();
    assert_eq!(metadata["main_module"], json!("index.js"));
    assert_eq!(metadata["compatibility_date"], json!("2024-06-01"));

    assert!(fixture.logger.contains(LogLevel::Log, "Uploaded api ("));
    assert!(fixture
        .logger
        .contains(LogLevel::Log, "Current Version ID: version-123"));
    assert!(fixture.temp_root_is_empty());
}

#[tokio::test]
async fn temp_dir_removed_when_upload_fails() {
    let fixture = Fixture::new(RecordingApi {
        upload_error: true,
        ..RecordingApi::default()
    });
    let err = deploy(fixture.props(BASE), &fixture.context())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Uncaught SyntaxError [code: 10021]"));
    assert!(fixture.temp_root_is_empty());
}

#[tokio::test]
async fn temp_dir_removed_when_bundling_fails() {
    let fixture = Fixture::with_bundler(
        RecordingApi::default(),
        StaticBundler {
            fail: true,
            ..StaticBundler::default()
        },
    );
    let mut props = fixture.props(BASE);
    props.no_bundle = Some(false);

    let err = deploy(props, &fixture.context()).await.unwrap_err();
    assert!(matches!(err, DeployError::Bundle(_)));
    assert!(fixture.api.calls().is_empty());
    assert!(fixture.temp_root_is_empty());
}

#[tokio::test]
async fn missing_compatibility_date_stops_before_any_work() {
    let fixture = Fixture::new(RecordingApi::default());
    let mut props = fixture.props(BASE);
    props.config.compatibility_date = None;

    let err = deploy(props, &fixture.context()).await.unwrap_err();
    assert!(matches!(err, DeployError::MissingCompatibilityDate { .. }));
    assert!(err.to_string().contains("--compatibility-date"));
    assert!(fixture.api.calls().is_empty());
    assert!(fixture.temp_root_is_empty());
}

#[tokio::test]
async fn explicit_outdir_keeps_build_output() {
    let fixture = Fixture::new(RecordingApi::default());
    let outdir = fixture.project.path().join("dist");
    let mut props = fixture.props(BASE);
    props.outdir = Some(outdir.clone());
    props.dry_run = true;

    deploy(props, &fixture.context()).await.unwrap();
    assert!(outdir.join("README.md").is_file());
    assert!(outdir.join("index.js").is_file());
    assert_eq!(
        std::fs::read_to_string(outdir.join("lib/a.js")).unwrap(),
        "export const a = 1;\n"
    );
}

#[tokio::test]
async fn outdir_inside_sources_is_not_reuploaded() {
    let fixture = Fixture::new(RecordingApi::default());
    let outdir = fixture.project.path().join("src/dist");

    for _ in 0..2 {
        let mut props = fixture.props(BASE);
        props.outdir = Some(outdir.clone());
        deploy(props, &fixture.context()).await.unwrap();
    }

    let uploads = fixture.api.uploads();
    assert_eq!(uploads.len(), 2);
    let RequestBody::Multipart(form) = &uploads[1].body else {
        panic!("upload must be multipart");
    };
    let names: Vec<&str> = form.parts().iter().map(|part| part.name.as_str()).collect();
    assert_eq!(names, ["metadata", "index.js", "lib/a.js"]);
    assert!(outdir.join("lib/a.js").is_file());
}

#[tokio::test]
async fn bundler_receives_resolved_options() {
    let fixture = Fixture::new(RecordingApi::default());
    let mut props = fixture.props(&format!(
        "{BASE}\ncompatibility_flags = [\"nodejs_compat\"]\nminify = true\n"
    ));
    props.no_bundle = Some(false);
    props.define = IndexMap::from([("VERSION".to_owned(), "\"1.0\"".to_owned())]);

    deploy(props, &fixture.context()).await.unwrap();

    let options = fixture.bundler.seen.lock().clone().expect("bundler called");
    assert_eq!(options.target, BundleTarget::Deploy);
    assert!(options.minify);
    assert!(options.node_compat);
    assert_eq!(options.define["VERSION"], "\"1.0\"");

    let uploads = fixture.api.uploads();
    let RequestBody::Multipart(form) = &uploads[0].body else {
        panic!("upload must be multipart");
    };
    assert!(form.part("index.js").is_some());
}

#[tokio::test]
async fn only_pending_migrations_are_sent() {
    let fixture = Fixture::new(RecordingApi {
        migration_tag: Some("v1".into()),
        ..RecordingApi::default()
    });
    let props = fixture.props(&format!(
        "{BASE}\n[[migrations]]\ntag = \"v1\"\nnew_classes = [\"Counter\"]\n\n[[migrations]]\ntag = \"v2\"\nnew_classes = [\"Room\"]\n"
    ));

    deploy(props, &fixture.context()).await.unwrap();

    let uploads = fixture.api.uploads();
    let RequestBody::Multipart(form) = &uploads[0].body else {
        panic!("upload must be multipart");
    };
    let migrations = &form.metadata().unwrap()["migrations"];
    assert_eq!(migrations["old_tag"], json!("v1"));
    assert_eq!(migrations["new_tag"], json!("v2"));
    assert_eq!(migrations["steps"], json!([{"new_classes": ["Room"]}]));
}
