//! The five standard agents and the stage list that wires them together.
//!
//! | Stage          | Agent id               | Kind                     |
//! |----------------|------------------------|--------------------------|
//! | `architecture` | `architecture_agent`   | single                   |
//! | `code`         | `code_agent:<module>`  | fan-out over `modules`   |
//! | `tests`        | `test_agent:<module>`  | fan-out over `modules`   |
//! | `quality`      | `quality_agent`        | single                   |
//! | `build`        | `build_agent`          | single                   |
//!
//! Code generation is skipped under the metadata-only flag, which also skips
//! everything after it.

pub mod architecture;
pub mod build;
pub mod code;
pub mod quality;

use std::path::Path;

use crate::agent::AgentError;
use crate::authz::instance_id;
use crate::collab::PromptFields;
use crate::context::{RunContext, RunFlag};
use crate::pipeline::StageDescriptor;

pub use architecture::ArchitectureAgent;
pub use build::BuildAgent;
pub use code::{extract_code, CodeAgent, CodeLayout, ExtractedCode, TargetFormat};
pub use quality::QualityAgent;
pub use tests::{split_test_output, TestAgent};

pub const ARCHITECTURE_AGENT: &str = "architecture_agent";
pub const CODE_AGENT: &str = "code_agent";
pub const TEST_AGENT: &str = "test_agent";
pub const QUALITY_AGENT: &str = "quality_agent";
pub const BUILD_AGENT: &str = "build_agent";

/// Fan-out collection the code and test stages iterate.
pub const MODULES_COLLECTION: &str = "modules";

/// Resource types the standard agents read and write.
pub mod resources {
    pub const REQUIREMENTS: &str = "requirements";
    pub const ARCHITECTURE: &str = "architecture";
    pub const MODULE_CODE: &str = "module_code";
    pub const TESTS: &str = "tests";
    pub const REPORTS: &str = "reports";
    pub const BUILD_LOG: &str = "build_log";
}

/// Snippets retrieved per query.
const CONTEXT_TOP_K: usize = 3;

pub fn architecture_stage() -> StageDescriptor {
    StageDescriptor::single("architecture", || Box::new(ArchitectureAgent::new()))
}

pub fn code_stage() -> StageDescriptor {
    StageDescriptor::fan_out("code", CODE_AGENT, MODULES_COLLECTION, |module_id| {
        Box::new(CodeAgent::new(module_id))
    })
    .skipped_when(RunFlag::MetadataOnly)
}

pub fn test_stage() -> StageDescriptor {
    StageDescriptor::fan_out("tests", TEST_AGENT, MODULES_COLLECTION, |module_id| {
        Box::new(TestAgent::new(module_id))
    })
}

pub fn quality_stage() -> StageDescriptor {
    StageDescriptor::single("quality", || Box::new(QualityAgent::new()))
}

pub fn build_stage() -> StageDescriptor {
    StageDescriptor::single("build", || Box::new(BuildAgent::new()))
}

/// architecture → code → tests → quality → build.
pub fn default_stages() -> Vec<StageDescriptor> {
    vec![
        architecture_stage(),
        code_stage(),
        test_stage(),
        quality_stage(),
        build_stage(),
    ]
}

pub(crate) fn item_agent_id(role: &str, module_id: &str) -> String {
    instance_id(role, module_id)
}

/// Retrieve context snippets as plain text, most relevant first.
pub(crate) fn retrieve(ctx: &RunContext, query: &str, hint: Option<&str>) -> Vec<String> {
    ctx.retriever()
        .query(query, CONTEXT_TOP_K, hint)
        .into_iter()
        .map(|s| s.content)
        .collect()
}

/// Compose the prompt for `stage` and hand it to the generator.
pub(crate) async fn generate(
    ctx: &RunContext,
    stage: &str,
    fields: &PromptFields,
) -> Result<String, AgentError> {
    let prompt = ctx.composer().compose(stage, fields)?;
    Ok(ctx.generator().generate(&prompt).await?)
}

/// Files directly under `dir` whose extension is in `extensions`, sorted by name.
pub(crate) fn list_files(dir: &Path, extensions: &[&str]) -> anyhow::Result<Vec<std::path::PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.contains(&e));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Human-readable target summary shared by several prompts.
pub(crate) fn target_summary(ctx: &RunContext) -> String {
    let params = ctx.params();
    format!(
        "Target: {}, Optimization: {}",
        params.target_profile.as_deref().unwrap_or("unspecified"),
        params.optimization_goal.as_deref().unwrap_or("balanced"),
    )
}
