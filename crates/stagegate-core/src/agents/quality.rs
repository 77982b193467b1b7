//! Quality agent: reviews generated code and tests, writes a quality report.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::{Agent, AgentError, AgentResult};
use crate::artifact::write_artifact;
use crate::authz::Resource;
use crate::collab::PromptFields;
use crate::context::RunContext;

use super::resources::{MODULE_CODE, REPORTS, TESTS};
use super::{generate, retrieve, QUALITY_AGENT};

pub const QUALITY_REPORT_FILE: &str = "quality_report.md";

#[derive(Debug, Default)]
pub struct QualityAgent;

impl QualityAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for QualityAgent {
    fn id(&self) -> &str {
        QUALITY_AGENT
    }

    async fn execute(&self, ctx: &RunContext, input: &Value) -> Result<AgentResult, AgentError> {
        ctx.authz().check_read(self.id(), MODULE_CODE, None)?;
        ctx.authz().check_read(self.id(), TESTS, None)?;

        let modules = ctx.params().module_ids.join(", ");
        let fields = PromptFields::new(self.id())
            .with_constraints(format!("Flag MISRA/CERT issues. Modules: {modules}."))
            .with_context(retrieve(ctx, "quality and static analysis rules", None))
            .with_module(input.clone());
        let report = generate(ctx, "quality", &fields).await?;

        let record = write_artifact(
            ctx,
            self.id(),
            &Resource::kind_only(REPORTS),
            QUALITY_REPORT_FILE,
            report.as_bytes(),
            Some(json!({ "modules": ctx.params().module_ids })),
        )?;
        Ok(AgentResult::ok("quality report generated").with_artifact(&record.path))
    }
}
