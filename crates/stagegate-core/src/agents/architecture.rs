//! Architecture agent: turns the run's requirements into an architecture document.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::{Agent, AgentError, AgentResult};
use crate::artifact::write_artifact;
use crate::authz::Resource;
use crate::collab::PromptFields;
use crate::context::RunContext;

use super::resources::{ARCHITECTURE, REQUIREMENTS};
use super::{generate, retrieve, target_summary, ARCHITECTURE_AGENT};

pub const ARCHITECTURE_FILE: &str = "architecture.md";

#[derive(Debug, Default)]
pub struct ArchitectureAgent;

impl ArchitectureAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for ArchitectureAgent {
    fn id(&self) -> &str {
        ARCHITECTURE_AGENT
    }

    async fn execute(&self, ctx: &RunContext, input: &Value) -> Result<AgentResult, AgentError> {
        ctx.authz().check_read(self.id(), REQUIREMENTS, None)?;

        let fields = PromptFields::new(self.id())
            .with_constraints(format!(
                "{}. Follow MISRA-like rules. Output Markdown.",
                target_summary(ctx)
            ))
            .with_context(retrieve(ctx, "architecture guidelines", None))
            .with_module(input.clone());
        let document = generate(ctx, "architecture", &fields).await?;

        let record = write_artifact(
            ctx,
            self.id(),
            &Resource::kind_only(ARCHITECTURE),
            ARCHITECTURE_FILE,
            document.as_bytes(),
            Some(json!({ "target_profile": ctx.params().target_profile })),
        )?;

        Ok(AgentResult::ok("architecture generated")
            .with_artifact(&record.path)
            .with_metadata(json!({ "sha256": record.sha256 })))
    }
}
