//! ---
//! hatch_section: "07-deploy-pipeline"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Worker build, binding assembly and upload."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use reqwest::multipart::{Form, Part};

use crate::metadata::WorkerMetadata;
use crate::modules::{Module, ModuleContent};

/// Name of the part carrying the JSON metadata.
pub const METADATA_PART: &str = "metadata";

/// One part of the upload body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: String,
    pub content: ModuleContent,
}

/// Transport-independent multipart body.
///
/// Kept inspectable so the payload can be checked without an HTTP server;
/// converted to a `reqwest` form only at send time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadForm {
    parts: Vec<FormPart>,
}

impl UploadForm {
    /// Metadata part followed by the entry module and every additional module.
    pub fn build(
        metadata: &WorkerMetadata,
        entry: &Module,
        modules: &[Module],
    ) -> Result<Self, serde_json::Error> {
        let mut form = UploadForm::default();
        form.parts.push(FormPart {
            name: METADATA_PART.to_owned(),
            file_name: None,
            content_type: "application/json".to_owned(),
            content: ModuleContent::Text(serde_json::to_string(metadata)?),
        });
        for module in std::iter::once(entry).chain(modules) {
            form.parts.push(FormPart {
                name: module.name.clone(),
                file_name: Some(module.name.clone()),
                content_type: module.module_type.content_type().to_owned(),
                content: module.content.clone(),
            });
        }
        Ok(form)
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    pub fn part(&self, name: &str) -> Option<&FormPart> {
        self.parts.iter().find(|part| part.name == name)
    }

    /// Parsed metadata part.
    pub fn metadata(&self) -> Option<serde_json::Value> {
        let part = self.part(METADATA_PART)?;
        serde_json::from_slice(part.content.as_bytes()).ok()
    }

    pub fn into_multipart(self) -> Result<Form, reqwest::Error> {
        let mut form = Form::new();
        for part in self.parts {
            let body = match part.content {
                ModuleContent::Text(text) => Part::text(text),
                ModuleContent::Binary(bytes) => Part::bytes(bytes),
            };
            let body = match part.file_name {
                Some(file_name) => body.file_name(file_name),
                None => body,
            };
            form = form.part(part.name, body.mime_str(&part.content_type)?);
        }
        Ok(form)
    }
}
