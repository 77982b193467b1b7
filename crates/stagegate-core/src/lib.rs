//! stagegate: capability-scoped agent pipeline orchestration.
//!
//! A fixed, ordered list of stages runs agents one at a time. Before an agent
//! runs, and whenever it reads or writes a named resource, the
//! [`authz::AuthorizationService`] checks its role's grants and appends one
//! entry to the audit trail. The first failure or denial stops the run.
//!
//! ```ignore
//! let orchestrator = Orchestrator::standard(
//!     Arc::new(PermissionTable::standard()),
//!     Collaborators::offline(),
//!     Arc::new(JsonlAuditLog::open("out/audit.jsonl")?),
//!     "out",
//! )?;
//! let result = orchestrator.run(RunInput::load("project.json")?).await;
//! ```

pub mod agent;
pub mod agents;
pub mod artifact;
pub mod authz;
pub mod collab;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod telemetry;

pub use agent::{Agent, AgentError, AgentResult};
pub use agents::default_stages;
pub use artifact::{write_artifact, ArtifactRecord};
pub use authz::{
    Action, AuditEntry, AuditSink, AuthorizationService, AuthorizationViolation, JsonlAuditLog,
    MemoryAuditLog, PermissionTable, Resource, RoleResolver,
};
pub use collab::{
    DeterministicGenerator, Generator, KeywordRetriever, PromptComposer, PromptFields, Retriever,
    Snippet, TemplateComposer,
};
pub use config::GateConfig;
pub use context::{Collaborators, RunContext, RunFlag, RunId, RunInput, RunParameters};
pub use error::{GateError, Result};
pub use pipeline::{
    OrchestrationResult, Orchestrator, RunFailure, StageDescriptor, StageReport, StageState,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
