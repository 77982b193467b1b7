//! Build agent: inventories generated module sources and their tests, and
//! records build readiness.
//!
//! Nothing is compiled; the log tells the user what is ready to hand to
//! their toolchain.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::agent::{Agent, AgentError, AgentResult};
use crate::artifact::{resource_dir, write_artifact};
use crate::authz::Resource;
use crate::context::RunContext;

use super::resources::{BUILD_LOG, MODULE_CODE, TESTS};
use super::{list_files, BUILD_AGENT};

pub const BUILD_LOG_FILE: &str = "build_log.json";

/// Message returned when there is nothing to inventory.
pub const BUILD_SKIPPED: &str = "No module code artifacts found; build skipped.";

const SOURCE_EXTENSIONS: &[&str] = &["h", "c", "ino"];
const TEST_EXTENSIONS: &[&str] = &["c", "md"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    pub name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildLog {
    pub build_type: &'static str,
    pub compilation_status: &'static str,
    pub modules: BTreeMap<String, Vec<SourceFile>>,
    pub tests: BTreeMap<String, Vec<SourceFile>>,
    pub total_modules: usize,
    pub notes: Vec<&'static str>,
}

impl BuildLog {
    fn source_only(
        modules: BTreeMap<String, Vec<SourceFile>>,
        tests: BTreeMap<String, Vec<SourceFile>>,
    ) -> Self {
        Self {
            build_type: "source_only",
            compilation_status: "skipped",
            total_modules: modules.len(),
            modules,
            tests,
            notes: vec![
                "Module code is in source form; no binary was produced",
                "Compile with the toolchain for the target profile",
                "Verify module dependencies before compiling",
            ],
        }
    }
}

#[derive(Debug, Default)]
pub struct BuildAgent;

impl BuildAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for BuildAgent {
    fn id(&self) -> &str {
        BUILD_AGENT
    }

    async fn execute(&self, ctx: &RunContext, _input: &Value) -> Result<AgentResult, AgentError> {
        let mut modules = BTreeMap::new();
        for module_id in &ctx.params().module_ids {
            let resource = Resource::instance(MODULE_CODE, module_id);
            ctx.authz()
                .check_read(self.id(), &resource.to_string(), None)?;

            let files = inventory(&resource_dir(ctx.output_dir(), &resource), SOURCE_EXTENSIONS)?;
            if !files.is_empty() {
                modules.insert(module_id.clone(), files);
            }
        }

        ctx.authz().check_read(self.id(), TESTS, None)?;
        let mut tests = BTreeMap::new();
        for module_id in modules.keys() {
            let dir = resource_dir(ctx.output_dir(), &Resource::instance(TESTS, module_id));
            let files = inventory(&dir, TEST_EXTENSIONS)?;
            if !files.is_empty() {
                tests.insert(module_id.clone(), files);
            }
        }

        if modules.is_empty() {
            return Ok(AgentResult::ok(BUILD_SKIPPED));
        }

        let log = BuildLog::source_only(modules, tests);
        let body = serde_json::to_vec_pretty(&log).context("encoding build log")?;
        let record = write_artifact(
            ctx,
            self.id(),
            &Resource::kind_only(BUILD_LOG),
            BUILD_LOG_FILE,
            &body,
            Some(json!({ "modules": log.total_modules, "compile_skipped": true })),
        )?;

        Ok(AgentResult::ok(format!(
            "Build ready: {} module(s) generated. Compile using your toolchain.",
            log.total_modules
        ))
        .with_artifact(&record.path)
        .with_metadata(serde_json::to_value(&log).context("encoding build log")?))
    }
}

/// Name and size of every matching file directly under `dir`.
fn inventory(dir: &Path, extensions: &[&str]) -> anyhow::Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    for path in list_files(dir, extensions)? {
        let size_bytes = std::fs::metadata(&path)
            .with_context(|| format!("inspecting {}", path.display()))?
            .len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        files.push(SourceFile { name, size_bytes });
    }
    Ok(files)
}
