//! Sequential, fail-fast pipeline orchestration.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn, Instrument};

use crate::agent::{Agent, AgentResult};
use crate::artifact::is_path_safe_id;
use crate::agents::default_stages;
use crate::authz::{
    instance_id, AuditSink, AuthorizationService, AuthorizationViolation, PermissionTable,
    RoleResolver,
};
use crate::context::{Collaborators, RunContext, RunFlag, RunFlags, RunId, RunInput};
use crate::error::{GateError, Result};
use crate::metrics::METRICS;
use crate::obs;

use super::stage::{StageDescriptor, StageKind, StageReport, StageState};

/// Message of a run in which every stage succeeded or was skipped.
pub const SUCCESS_MESSAGE: &str = "All stages executed";

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    /// A guard refused an agent.
    Violation(AuthorizationViolation),
    /// An agent returned `success = false`.
    AgentFailed { agent_id: String, message: String },
    /// Anything else: agent errors, panics, malformed input.
    Error { message: String },
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::Violation(v) => write!(f, "{v}"),
            RunFailure::AgentFailed { agent_id, message } => {
                write!(f, "{agent_id} failed: {message}")
            }
            RunFailure::Error { message } => f.write_str(message),
        }
    }
}

impl RunFailure {
    fn error(message: impl Into<String>) -> Self {
        RunFailure::Error {
            message: message.into(),
        }
    }
}

/// Aggregated outcome of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub run_id: String,
    pub success: bool,
    pub message: String,
    /// Result of every agent that returned one, keyed by agent id. Partial on abort.
    pub results: BTreeMap<String, AgentResult>,
    pub stages: Vec<StageReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    /// Authorization requests evaluated during the run.
    pub authorizations: u64,
    pub output_dir: PathBuf,
    pub duration_ms: u64,
}

impl OrchestrationResult {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// Runs an ordered list of stages against a fixed permission table.
pub struct Orchestrator {
    stages: Vec<StageDescriptor>,
    permissions: Arc<PermissionTable>,
    resolver: RoleResolver,
    collaborators: Collaborators,
    audit: Arc<dyn AuditSink>,
    output_root: PathBuf,
}

impl Orchestrator {
    /// Validate `stages` and assemble an orchestrator.
    ///
    /// Stage names must be unique and the list non-empty. Fan-out roles become
    /// the resolver's base roles.
    pub fn new(
        stages: Vec<StageDescriptor>,
        permissions: Arc<PermissionTable>,
        collaborators: Collaborators,
        audit: Arc<dyn AuditSink>,
        output_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        if stages.is_empty() {
            return Err(GateError::InvalidPipeline("no stages".to_string()));
        }
        let mut seen = BTreeSet::new();
        for stage in &stages {
            if !seen.insert(stage.name()) {
                return Err(GateError::InvalidPipeline(format!(
                    "duplicate stage name '{}'",
                    stage.name()
                )));
            }
        }
        permissions.validate()?;

        let resolver = RoleResolver::new(stages.iter().filter_map(|s| s.fan_out_role()));
        for role in resolver.fan_out_roles() {
            if permissions.grants_for(role).is_none() {
                warn!(role = %role, "fan-out role has no permission entry; its agents will be denied");
            }
        }

        Ok(Self {
            stages,
            permissions,
            resolver,
            collaborators,
            audit,
            output_root: output_root.into(),
        })
    }

    /// The five standard stages: architecture, code, tests, quality, build.
    pub fn standard(
        permissions: Arc<PermissionTable>,
        collaborators: Collaborators,
        audit: Arc<dyn AuditSink>,
        output_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        Self::new(
            default_stages(),
            permissions,
            collaborators,
            audit,
            output_root,
        )
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }

    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Execute every stage in order and report the outcome.
    ///
    /// Never returns an error: every failure becomes a non-success result
    /// carrying a message and whatever results were collected.
    pub async fn run(&self, input: RunInput) -> OrchestrationResult {
        let run_id = RunId::generate();
        let span = obs::run_span(run_id.as_str());
        self.run_with_id(run_id, input).instrument(span).await
    }

    async fn run_with_id(&self, run_id: RunId, input: RunInput) -> OrchestrationResult {
        let start = Instant::now();
        obs::emit_run_started(run_id.as_str(), &input.project_name, self.stages.len());

        let authz = Arc::new(
            AuthorizationService::new(
                Arc::clone(&self.permissions),
                self.resolver.clone(),
                Arc::clone(&self.audit),
            )
            .for_run(run_id.as_str()),
        );
        let ctx = RunContext::new(
            run_id.clone(),
            &self.output_root,
            &input,
            Arc::clone(&authz),
            self.collaborators.clone(),
        );

        let mut results = BTreeMap::new();
        let mut stages: Vec<StageReport> = self
            .stages
            .iter()
            .map(|s| StageReport::pending(s.name()))
            .collect();

        let outcome = match input.to_payload() {
            Ok(payload) => {
                self.execute_stages(&ctx, &payload, input.flags(), &mut stages, &mut results)
                    .await
            }
            Err(e) => Err(RunFailure::error(e.to_string())),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let (success, message, failure) = match outcome {
            Ok(()) => (true, SUCCESS_MESSAGE.to_string(), None),
            Err(failure) => (false, failure.to_string(), Some(failure)),
        };
        obs::emit_run_finished(run_id.as_str(), duration_ms, results.len(), success);
        METRICS.flush();

        OrchestrationResult {
            run_id: run_id.to_string(),
            success,
            message,
            results,
            stages,
            failure,
            authorizations: authz.evaluations(),
            output_dir: ctx.output_dir().to_path_buf(),
            duration_ms,
        }
    }

    async fn execute_stages(
        &self,
        ctx: &RunContext,
        payload: &Value,
        flags: RunFlags,
        reports: &mut [StageReport],
        results: &mut BTreeMap<String, AgentResult>,
    ) -> std::result::Result<(), RunFailure> {
        let mut skip_cause: Option<RunFlag> = None;

        for (stage, report) in self.stages.iter().zip(reports.iter_mut()) {
            if skip_cause.is_none() {
                skip_cause = stage.skip_cause(flags);
            }
            if let Some(flag) = skip_cause {
                report.state = StageState::Skipped;
                obs::emit_stage_skipped(stage.name(), flag.as_str());
                continue;
            }

            report.state = StageState::Running;
            obs::emit_stage_started(stage.name());
            let outcome = self
                .execute_stage(stage, ctx, payload, results, &mut report.invocations)
                .await;
            report.state = match outcome {
                Ok(()) => StageState::Succeeded,
                Err(_) => StageState::Failed,
            };
            obs::emit_stage_finished(stage.name(), report.state.as_str());
            outcome?;
        }
        Ok(())
    }

    async fn execute_stage(
        &self,
        stage: &StageDescriptor,
        ctx: &RunContext,
        payload: &Value,
        results: &mut BTreeMap<String, AgentResult>,
        invocations: &mut Vec<String>,
    ) -> std::result::Result<(), RunFailure> {
        match stage.kind() {
            StageKind::Single(factory) => {
                let label = format!("stage '{}' agent factory", stage.name());
                let agent = build_agent(&label, || factory())?;
                let agent_id = agent.id().to_string();
                invocations.push(agent_id.clone());
                invoke(agent.as_ref(), &agent_id, ctx, payload, results).await
            }
            StageKind::FanOut {
                role,
                collection,
                item_key,
                factory,
            } => {
                let items = match payload.get(collection) {
                    None | Some(Value::Null) => {
                        info!(stage = %stage.name(), collection = %collection, "fan-out collection absent; nothing to do");
                        return Ok(());
                    }
                    Some(Value::Array(items)) => items,
                    Some(_) => {
                        return Err(RunFailure::error(format!(
                            "fan-out collection '{collection}' is not a list"
                        )));
                    }
                };

                let mut seen = BTreeSet::new();
                for (index, item) in items.iter().enumerate() {
                    let Some(item_id) = item
                        .get(item_key)
                        .and_then(Value::as_str)
                        .filter(|id| !id.is_empty())
                    else {
                        warn!(
                            stage = %stage.name(),
                            index,
                            key = %item_key,
                            "fan-out item missing its key; skipping"
                        );
                        METRICS.inc_fan_out_items_skipped();
                        continue;
                    };
                    if !is_path_safe_id(item_id) {
                        warn!(
                            stage = %stage.name(),
                            index,
                            item_id = %item_id,
                            "fan-out item id is not a plain path component; skipping"
                        );
                        METRICS.inc_fan_out_items_skipped();
                        continue;
                    }
                    if !seen.insert(item_id) {
                        warn!(
                            stage = %stage.name(),
                            index,
                            item_id = %item_id,
                            "duplicate fan-out item id; skipping"
                        );
                        METRICS.inc_fan_out_items_skipped();
                        continue;
                    }

                    let agent_id = instance_id(role, item_id);
                    let agent = build_agent(&agent_id, || factory(item_id))?;
                    if agent.id() != agent_id {
                        return Err(RunFailure::error(format!(
                            "agent id '{}' does not match fan-out instance '{agent_id}'",
                            agent.id()
                        )));
                    }
                    invocations.push(agent_id.clone());
                    invoke(agent.as_ref(), &agent_id, ctx, item, results).await?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stages", &self.stages)
            .field("resolver", &self.resolver)
            .field("output_root", &self.output_root)
            .finish_non_exhaustive()
    }
}

/// Run-check, invoke, and classify one agent.
async fn invoke(
    agent: &dyn Agent,
    agent_id: &str,
    ctx: &RunContext,
    input: &Value,
    results: &mut BTreeMap<String, AgentResult>,
) -> std::result::Result<(), RunFailure> {
    ctx.authz()
        .check_run(agent_id)
        .map_err(RunFailure::Violation)?;
    METRICS.inc_agent_invocations();

    let outcome = AssertUnwindSafe(agent.execute(ctx, input))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(result)) => {
            let failure = (!result.success).then(|| RunFailure::AgentFailed {
                agent_id: agent_id.to_string(),
                message: result.message.clone(),
            });
            results.insert(agent_id.to_string(), result);
            match failure {
                Some(failure) => {
                    obs::emit_agent_failed(agent_id, &failure.to_string());
                    Err(failure)
                }
                None => Ok(()),
            }
        }
        Ok(Err(err)) => {
            if let Some(violation) = err.violation() {
                return Err(RunFailure::Violation(violation.clone()));
            }
            error!(agent_id = %agent_id, error = ?err, "agent raised an unclassified error");
            Err(RunFailure::error(format!("{err:#}")))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(agent_id = %agent_id, panic = %message, "agent panicked");
            Err(RunFailure::error(format!("{agent_id} panicked: {message}")))
        }
    }
}

/// Construct an agent, turning a panicking factory into a run failure.
fn build_agent<F>(label: &str, build: F) -> std::result::Result<Box<dyn Agent>, RunFailure>
where
    F: FnOnce() -> Box<dyn Agent>,
{
    std::panic::catch_unwind(AssertUnwindSafe(build)).map_err(|panic| {
        let message = panic_message(panic.as_ref());
        error!(agent = %label, panic = %message, "agent factory panicked");
        RunFailure::error(format!("{label} panicked: {message}"))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::{Action, MemoryAuditLog};

    #[test]
    fn test_failure_messages() {
        let v = RunFailure::Violation(AuthorizationViolation {
            agent_id: "code_agent:m".into(),
            action: Action::Write,
            resource: "architecture".into(),
        });
        assert_eq!(v.to_string(), "Agent code_agent:m not allowed to write architecture");

        let f = RunFailure::AgentFailed {
            agent_id: "quality_agent".into(),
            message: "lint crashed".into(),
        };
        assert_eq!(f.to_string(), "quality_agent failed: lint crashed");
    }

    #[test]
    fn test_new_rejects_empty_and_duplicate_stages() {
        let table = Arc::new(PermissionTable::standard());
        let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditLog::new());

        let empty = Orchestrator::new(
            Vec::new(),
            Arc::clone(&table),
            Collaborators::offline(),
            Arc::clone(&audit),
            "/tmp",
        );
        assert!(matches!(empty, Err(GateError::InvalidPipeline(_))));

        let mut stages = default_stages();
        stages.push(default_stages().remove(0));
        let dup = Orchestrator::new(stages, table, Collaborators::offline(), audit, "/tmp");
        assert!(matches!(dup, Err(GateError::InvalidPipeline(m)) if m.contains("duplicate")));
    }

    #[test]
    fn test_standard_registers_fan_out_roles() {
        let orch = Orchestrator::standard(
            Arc::new(PermissionTable::standard()),
            Collaborators::offline(),
            Arc::new(MemoryAuditLog::new()),
            "/tmp",
        )
        .unwrap();
        let roles: Vec<&str> = orch.resolver().fan_out_roles().collect();
        assert_eq!(roles, vec!["code_agent", "test_agent"]);
        assert_eq!(orch.stages().len(), 5);
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"boom".to_string()), "boom");
        assert_eq!(panic_message(&42u8), "unknown panic payload");
    }
}
