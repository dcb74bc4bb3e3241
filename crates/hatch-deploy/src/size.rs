//! ---
//! hatch_section: "07-deploy-pipeline"
//! hatch_subsection: "module"
//! hatch_type: "source"
//! hatch_scope: "code"
//! hatch_description: "Worker build, binding assembly and upload."
//! hatch_version: "v0.0.0-prealpha"
//! hatch_owner: "tbd"
//! ---
use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use hatch_logging::SharedLogger;
use indexmap::IndexMap;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::bundle::DependencyInfo;
use crate::modules::Module;

/// Compressed upload size above which a warning is printed.
pub const SIZE_BUDGET_BYTES: usize = 1024 * 1024;

const LARGEST_DEPENDENCIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeReport {
    pub total_bytes: usize,
    pub gzip_bytes: usize,
    /// Biggest bundle inputs, largest first.
    pub largest_dependencies: Vec<(String, u64)>,
}

impl SizeReport {
    pub fn compute(
        modules: &[Module],
        dependencies: &IndexMap<String, DependencyInfo>,
    ) -> io::Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut total_bytes = 0;
        for module in modules {
            total_bytes += module.size();
            encoder.write_all(module.content.as_bytes())?;
        }
        let gzip_bytes = encoder.finish()?.len();

        let mut largest: Vec<(String, u64)> = dependencies
            .iter()
            .map(|(name, info)| (name.clone(), info.bytes_in_output))
            .collect();
        largest.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        largest.truncate(LARGEST_DEPENDENCIES);

        Ok(Self {
            total_bytes,
            gzip_bytes,
            largest_dependencies: largest,
        })
    }

    pub fn over_budget(&self) -> bool {
        self.gzip_bytes > SIZE_BUDGET_BYTES
    }

    pub fn summary(&self) -> String {
        format!(
            "Total Upload: {:.2} KiB / gzip: {:.2} KiB",
            kib(self.total_bytes as u64),
            kib(self.gzip_bytes as u64)
        )
    }

    fn emit(&self, logger: &SharedLogger) {
        logger.log(&self.summary());
        if !self.over_budget() {
            return;
        }
        let mut message = format!(
            "Your worker is {:.2} KiB after compression, above the {:.2} KiB budget.",
            kib(self.gzip_bytes as u64),
            kib(SIZE_BUDGET_BYTES as u64)
        );
        if !self.largest_dependencies.is_empty() {
            message.push_str(" Largest dependencies:");
            for (name, bytes) in &self.largest_dependencies {
                message.push_str(&format!("\n  - {name}: {:.2} KiB", kib(*bytes)));
            }
        }
        logger.warn(&message);
    }
}

fn kib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

/// Compute and print the size report on a detached blocking task.
///
/// The handle may be dropped; await it only when output ordering matters.
pub fn spawn_size_report(
    modules: Vec<Module>,
    dependencies: IndexMap<String, DependencyInfo>,
    logger: SharedLogger,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || match SizeReport::compute(&modules, &dependencies) {
        Ok(report) => report.emit(&logger),
        Err(err) => warn!(error = %err, "unable to compute upload size"),
    })
}
