//! Per-run immutable context handed to every agent.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::artifact::is_path_safe_id;
use crate::authz::AuthorizationService;
use crate::collab::{
    DeterministicGenerator, Generator, KeywordRetriever, PromptComposer, Retriever,
    TemplateComposer,
};
use crate::error::{GateError, Result};

/// Unique identifier of one pipeline run: `<UTC timestamp>-<8 hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{stamp}-{}", &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload a run is started with.
///
/// Known keys are typed; anything else is kept in `extra` and passed through
/// to agents untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    #[serde(default)]
    pub project_name: String,
    #[serde(default, alias = "target_mcu", skip_serializing_if = "Option::is_none")]
    pub target_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization_goal: Option<String>,
    /// Module descriptors; each is expected to carry an `"id"` key.
    #[serde(default)]
    pub modules: Vec<Value>,
    #[serde(default)]
    pub metadata_only: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunInput {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// The whole input as a JSON object, as handed to single-invocation agents.
    pub fn to_payload(&self) -> Result<Value> {
        match serde_json::to_value(self)? {
            obj @ Value::Object(_) => Ok(obj),
            other => Err(GateError::InvalidInput(format!(
                "run input must serialize to an object, got {other}"
            ))),
        }
    }

    pub fn flags(&self) -> RunFlags {
        RunFlags {
            metadata_only: self.metadata_only,
        }
    }
}

/// Run-level flags a stage may be skipped under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunFlag {
    /// Produce design metadata only; skip stages that generate code.
    MetadataOnly,
}

impl RunFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            RunFlag::MetadataOnly => "metadata_only",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    pub metadata_only: bool,
}

impl RunFlags {
    pub fn is_set(&self, flag: RunFlag) -> bool {
        match flag {
            RunFlag::MetadataOnly => self.metadata_only,
        }
    }
}

/// Run-level parameters agents may read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParameters {
    pub project_name: String,
    pub target_profile: Option<String>,
    pub optimization_goal: Option<String>,
    /// Non-empty module ids, in input order.
    pub module_ids: Vec<String>,
}

impl From<&RunInput> for RunParameters {
    fn from(input: &RunInput) -> Self {
        Self {
            project_name: input.project_name.clone(),
            target_profile: input.target_profile.clone(),
            optimization_goal: input.optimization_goal.clone(),
            module_ids: module_ids(&input.modules),
        }
    }
}

/// Distinct, path-safe module ids in input order; the same items the fan-out
/// stages invoke agents for.
fn module_ids(modules: &[Value]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    modules
        .iter()
        .filter_map(|m| m.get("id").and_then(Value::as_str))
        .filter(|id| is_path_safe_id(id) && seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// The three opaque capabilities agents are given.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn Generator>,
    pub retriever: Arc<dyn Retriever>,
    pub composer: Arc<dyn PromptComposer>,
}

impl Collaborators {
    pub fn new(
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retriever>,
        composer: Arc<dyn PromptComposer>,
    ) -> Self {
        Self {
            generator,
            retriever,
            composer,
        }
    }

    /// Deterministic generator, empty retriever, built-in templates.
    pub fn offline() -> Self {
        Self::new(
            Arc::new(DeterministicGenerator::new()),
            Arc::new(KeywordRetriever::default()),
            Arc::new(TemplateComposer::builtin()),
        )
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Everything an agent may see about the current run. Read-only once built.
#[derive(Debug)]
pub struct RunContext {
    run_id: RunId,
    output_dir: PathBuf,
    params: RunParameters,
    flags: RunFlags,
    authz: Arc<AuthorizationService>,
    collaborators: Collaborators,
}

impl RunContext {
    /// Build the context for `run_id`; artifacts go under `<output_root>/runs/<run_id>`.
    pub fn new(
        run_id: RunId,
        output_root: &Path,
        input: &RunInput,
        authz: Arc<AuthorizationService>,
        collaborators: Collaborators,
    ) -> Self {
        let output_dir = output_root.join("runs").join(run_id.as_str());
        Self {
            run_id,
            output_dir,
            params: RunParameters::from(input),
            flags: input.flags(),
            authz,
            collaborators,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Root of this run's output namespace.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn params(&self) -> &RunParameters {
        &self.params
    }

    pub fn flags(&self) -> RunFlags {
        self.flags
    }

    pub fn authz(&self) -> &AuthorizationService {
        &self.authz
    }

    pub fn generator(&self) -> &dyn Generator {
        self.collaborators.generator.as_ref()
    }

    pub fn retriever(&self) -> &dyn Retriever {
        self.collaborators.retriever.as_ref()
    }

    pub fn composer(&self) -> &dyn PromptComposer {
        self.collaborators.composer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::{MemoryAuditLog, PermissionTable, RoleResolver};

    #[test]
    fn test_run_input_accepts_target_mcu_alias_and_keeps_extras() {
        let input = RunInput::from_json_str(
            r#"{"project_name":"weather","target_mcu":"esp32","modules":[{"id":"bme280"}],"board_rev":3}"#,
        )
        .unwrap();
        assert_eq!(input.target_profile.as_deref(), Some("esp32"));
        assert_eq!(input.extra.get("board_rev"), Some(&serde_json::json!(3)));

        let payload = input.to_payload().unwrap();
        assert_eq!(payload["board_rev"], 3);
        assert_eq!(payload["modules"][0]["id"], "bme280");
    }

    #[test]
    fn test_parameters_skip_modules_without_id() {
        let input = RunInput {
            modules: vec![
                serde_json::json!({"id": "a"}),
                serde_json::json!({"name": "nameless"}),
                serde_json::json!({"id": ""}),
                serde_json::json!({"id": "b"}),
            ],
            ..RunInput::default()
        };
        assert_eq!(RunParameters::from(&input).module_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_parameters_drop_unsafe_and_duplicate_ids() {
        let input = RunInput {
            modules: vec![
                serde_json::json!({"id": "a"}),
                serde_json::json!({"id": ".."}),
                serde_json::json!({"id": "nested/dir"}),
                serde_json::json!({"id": "a"}),
                serde_json::json!({"id": "b"}),
            ],
            ..RunInput::default()
        };
        assert_eq!(RunParameters::from(&input).module_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_run_id_shape() {
        let id = RunId::generate();
        let (stamp, suffix) = id.as_str().rsplit_once('-').unwrap();
        assert!(stamp.ends_with('Z'));
        assert_eq!(suffix.len(), 8);
    }

    #[test]
    fn test_context_namespaces_output_by_run() {
        let authz = Arc::new(AuthorizationService::new(
            Arc::new(PermissionTable::standard()),
            RoleResolver::default(),
            Arc::new(MemoryAuditLog::new()),
        ));
        let run_id = RunId::generate();
        let ctx = RunContext::new(
            run_id.clone(),
            Path::new("/tmp/out"),
            &RunInput::default(),
            authz,
            Collaborators::offline(),
        );
        assert_eq!(
            ctx.output_dir(),
            Path::new("/tmp/out").join("runs").join(run_id.as_str())
        );
        assert!(!ctx.flags().is_set(RunFlag::MetadataOnly));
    }
}
