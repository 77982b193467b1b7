//! Where a run reads its configuration from and writes its output to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::authz::{JsonlAuditLog, PermissionTable};
use crate::collab::{DeterministicGenerator, KeywordRetriever, TemplateComposer};
use crate::context::Collaborators;
use crate::error::Result;
use crate::pipeline::Orchestrator;

/// File name of the audit log inside the output directory.
pub const DEFAULT_AUDIT_LOG: &str = "audit.jsonl";

/// Paths that configure a run. Everything except `output_dir` is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Root of all run output; each run writes under `runs/<run_id>/`.
    pub output_dir: PathBuf,
    /// Defaults to `<output_dir>/audit.jsonl`.
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
    /// JSON object of `role -> [grant, ...]`; the standard table when absent.
    #[serde(default)]
    pub permissions: Option<PathBuf>,
    /// Directory of `<stage>.md` prompt templates overriding the built-ins.
    #[serde(default)]
    pub templates: Option<PathBuf>,
    /// Directory of `*.md` documents for retrieval.
    #[serde(default)]
    pub docs: Option<PathBuf>,
}

impl GateConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            audit_log: None,
            permissions: None,
            templates: None,
            docs: None,
        }
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.audit_log
            .clone()
            .unwrap_or_else(|| self.output_dir.join(DEFAULT_AUDIT_LOG))
    }

    pub fn load_permissions(&self) -> Result<PermissionTable> {
        match &self.permissions {
            Some(path) => PermissionTable::load(path),
            None => Ok(PermissionTable::standard()),
        }
    }

    pub fn open_audit_log(&self) -> Result<JsonlAuditLog> {
        Ok(JsonlAuditLog::open(self.audit_log_path())?)
    }

    /// Offline collaborators, with templates and documents loaded when configured.
    pub fn collaborators(&self) -> anyhow::Result<Collaborators> {
        let composer = match &self.templates {
            Some(dir) => TemplateComposer::load_dir(dir)?,
            None => TemplateComposer::builtin(),
        };
        let retriever = match &self.docs {
            Some(dir) => KeywordRetriever::load_dir(dir)
                .with_context(|| format!("loading retrieval docs from {}", dir.display()))?,
            None => KeywordRetriever::default(),
        };
        Ok(Collaborators::new(
            Arc::new(DeterministicGenerator::new()),
            Arc::new(retriever),
            Arc::new(composer),
        ))
    }

    /// Assemble the standard pipeline from this configuration.
    pub fn build_orchestrator(&self) -> anyhow::Result<Orchestrator> {
        let permissions = self.load_permissions().with_context(|| {
            format!(
                "loading permissions from {}",
                display_opt(self.permissions.as_deref())
            )
        })?;
        let audit = self.open_audit_log().with_context(|| {
            format!("opening audit log {}", self.audit_log_path().display())
        })?;
        Ok(Orchestrator::standard(
            Arc::new(permissions),
            self.collaborators()?,
            Arc::new(audit),
            self.output_dir.clone(),
        )?)
    }
}

fn display_opt(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "<standard>".to_string())
}
