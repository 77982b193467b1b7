//! Capability-scoped authorization.
//!
//! Roles hold sets of capability strings of the form `"<action>:<type>"` or
//! `"<action>:<type>:<id>"`. A request `(agent, action, resource)` is allowed
//! when the agent's role holds an exact grant, a parent grant covering every
//! instance of the resource type, or (for `run` only) the universal
//! `"run:agent"` grant. Every evaluation is appended to an audit sink.

pub mod audit;
pub mod capability;
pub mod permissions;
pub mod role;
pub mod service;

pub use audit::{
    read_audit_log, AuditEntry, AuditError, AuditResult, AuditSink, JsonlAuditLog, MemoryAuditLog,
};
pub use capability::{capability_string, validate_grant, Action, Resource, RUN_AGENT_GRANT};
pub use permissions::PermissionTable;
pub use role::{instance_id, RoleResolver, INSTANCE_SEPARATOR};
pub use service::{AuthorizationService, AuthorizationViolation, Decision, GrantMatch};
