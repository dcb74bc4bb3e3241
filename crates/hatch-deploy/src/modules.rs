//! ---
//! hatch_section: "07-deploy-pipeline"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Worker build, binding assembly and upload."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
//! Worker modules and the glob rules that classify them.
//!
//! In no-bundle mode every file next to the entry point that matches a rule
//! is uploaded as its own module, named by its path relative to the entry's
//! directory.

use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};
use hatch_common::config::ModuleRuleConfig;
use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::DeployError;

/// How the platform should load a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModuleType {
    #[serde(rename = "esm")]
    EsModule,
    #[serde(rename = "commonjs")]
    CommonJs,
    #[serde(rename = "compiled-wasm")]
    CompiledWasm,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "buffer")]
    Data,
    #[serde(rename = "source-map")]
    SourceMap,
}

impl ModuleType {
    /// MIME type used for the module's multipart part.
    pub fn content_type(self) -> &'static str {
        match self {
            ModuleType::EsModule => "application/javascript+module",
            ModuleType::CommonJs => "application/javascript",
            ModuleType::CompiledWasm => "application/wasm",
            ModuleType::Text => "text/plain",
            ModuleType::Data => "application/octet-stream",
            ModuleType::SourceMap => "application/source-map",
        }
    }

    /// Parse the `type` key of a `[[rules]]` entry.
    pub fn from_rule_name(name: &str) -> Option<Self> {
        match name {
            "ESModule" => Some(ModuleType::EsModule),
            "CommonJS" => Some(ModuleType::CommonJs),
            "CompiledWasm" => Some(ModuleType::CompiledWasm),
            "Text" => Some(ModuleType::Text),
            "Data" => Some(ModuleType::Data),
            _ => None,
        }
    }

    fn is_binary(self) -> bool {
        matches!(self, ModuleType::CompiledWasm | ModuleType::Data)
    }
}

/// Module payload. Text and binary content are measured differently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleContent {
    Text(String),
    Binary(Vec<u8>),
}

impl ModuleContent {
    /// Byte length: UTF-8 length for text, raw length for binary.
    pub fn len(&self) -> usize {
        match self {
            ModuleContent::Text(text) => text.len(),
            ModuleContent::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ModuleContent::Text(text) => text.as_bytes(),
            ModuleContent::Binary(bytes) => bytes,
        }
    }
}

/// One uploadable module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Name the entry point imports it by; always `/` separated.
    pub name: String,
    pub module_type: ModuleType,
    pub content: ModuleContent,
    /// Where the module was read from, when it came from disk.
    pub file_path: Option<PathBuf>,
}

impl Module {
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Compiled form of a module rule.
#[derive(Debug, Clone)]
pub struct ModuleRule {
    pub module_type: ModuleType,
    pub patterns: Vec<Pattern>,
    pub fallthrough: bool,
}

impl ModuleRule {
    fn new(module_type: ModuleType, globs: &[&str]) -> Self {
        Self {
            module_type,
            patterns: globs.iter().filter_map(|g| Pattern::new(g).ok()).collect(),
            fallthrough: false,
        }
    }

    fn matches(&self, relative: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_with(relative, options))
    }
}

/// Built-in rules applied after any user rules.
pub fn default_rules() -> Vec<ModuleRule> {
    vec![
        ModuleRule::new(ModuleType::EsModule, &["**/*.js", "**/*.mjs"]),
        ModuleRule::new(ModuleType::CommonJs, &["**/*.cjs"]),
        ModuleRule::new(ModuleType::CompiledWasm, &["**/*.wasm", "**/*.wasm?module"]),
        ModuleRule::new(ModuleType::Text, &["**/*.txt", "**/*.html"]),
        ModuleRule::new(ModuleType::Data, &["**/*.bin"]),
    ]
}

/// User rules first, then the defaults.
///
/// A user rule without `fallthrough = true` replaces the default rule of
/// the same type.
pub fn resolve_rules(user: &[ModuleRuleConfig]) -> Result<Vec<ModuleRule>, DeployError> {
    let mut rules = Vec::with_capacity(user.len() + 5);
    for rule in user {
        let module_type = ModuleType::from_rule_name(&rule.module_type).ok_or_else(|| {
            DeployError::InvalidRule(format!("unknown module type \"{}\"", rule.module_type))
        })?;
        let patterns = rule
            .globs
            .iter()
            .map(|glob| {
                Pattern::new(glob)
                    .map_err(|err| DeployError::InvalidRule(format!("glob \"{glob}\": {err}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        rules.push(ModuleRule {
            module_type,
            patterns,
            fallthrough: rule.fallthrough,
        });
    }

    let replaced: Vec<ModuleType> = rules
        .iter()
        .filter(|rule| !rule.fallthrough)
        .map(|rule| rule.module_type)
        .collect();
    rules.extend(
        default_rules()
            .into_iter()
            .filter(|rule| !replaced.contains(&rule.module_type)),
    );
    Ok(rules)
}

/// Type of the first rule matching `relative`, if any.
pub fn match_rule(rules: &[ModuleRule], relative: &str) -> Option<ModuleType> {
    rules
        .iter()
        .find(|rule| rule.matches(relative))
        .map(|rule| rule.module_type)
}

/// Read the entry point as a module, typed by the rules (ES module by default).
pub async fn load_entry(entry: &Path, rules: &[ModuleRule]) -> Result<Module, DeployError> {
    let name = entry
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or(DeployError::MissingEntry)?;
    let module_type = match match_rule(rules, &name) {
        Some(ModuleType::CommonJs) => ModuleType::CommonJs,
        _ => ModuleType::EsModule,
    };
    let content = read_content(entry, module_type).await?;
    Ok(Module {
        name,
        module_type,
        content,
        file_path: Some(entry.to_path_buf()),
    })
}

/// Every non-entry file under the entry's directory that a rule claims.
///
/// Hidden files, hidden directories, `node_modules` and every directory in
/// `excluded` (build output) are never walked. Results are sorted by module
/// name.
pub async fn collect_additional_modules(
    entry: &Path,
    rules: &[ModuleRule],
    excluded: &[&Path],
) -> Result<Vec<Module>, DeployError> {
    let base = match entry.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let entry_name = entry.file_name();
    // Compared canonically so relative and absolute spellings agree.
    let excluded: Vec<PathBuf> = excluded
        .iter()
        .filter_map(|dir| std::fs::canonicalize(dir).ok())
        .collect();
    let mut candidates = Vec::new();
    let walker = WalkDir::new(base)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            if is_ignored(e.file_name().to_string_lossy().as_ref()) {
                return false;
            }
            !(e.file_type().is_dir() && is_excluded(&excluded, e.path()))
        });
    for dir_entry in walker {
        let dir_entry = dir_entry.map_err(|err| {
            let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| base.to_path_buf());
            DeployError::Io {
                path,
                source: err.into(),
            }
        })?;
        if !dir_entry.file_type().is_file() {
            continue;
        }
        if dir_entry.depth() == 1 && Some(dir_entry.file_name()) == entry_name {
            continue;
        }
        let Some(relative) = module_name(base, dir_entry.path()) else {
            continue;
        };
        if let Some(module_type) = match_rule(rules, &relative) {
            candidates.push((relative, module_type, dir_entry.into_path()));
        }
    }
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    let mut modules = Vec::with_capacity(candidates.len());
    for (name, module_type, path) in candidates {
        let content = read_content(&path, module_type).await?;
        debug!(module = %name, ?module_type, bytes = content.len(), "collected module");
        modules.push(Module {
            name,
            module_type,
            content,
            file_path: Some(path),
        });
    }
    Ok(modules)
}

fn is_ignored(file_name: &str) -> bool {
    file_name.starts_with('.') || file_name == "node_modules"
}

fn is_excluded(excluded: &[PathBuf], dir: &Path) -> bool {
    !excluded.is_empty()
        && std::fs::canonicalize(dir).is_ok_and(|dir| excluded.iter().any(|skip| *skip == dir))
}

/// `/`-separated path of `path` relative to `base`.
fn module_name(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

async fn read_content(path: &Path, module_type: ModuleType) -> Result<ModuleContent, DeployError> {
    let bytes = tokio::fs::read(path).await.map_err(DeployError::io(path))?;
    if module_type.is_binary() {
        return Ok(ModuleContent::Binary(bytes));
    }
    Ok(match String::from_utf8(bytes) {
        Ok(text) => ModuleContent::Text(text),
        Err(err) => ModuleContent::Binary(err.into_bytes()),
    })
}
