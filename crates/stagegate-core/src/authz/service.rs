//! The authorization service: grant evaluation, audit recording, and guards.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::metrics::METRICS;
use crate::obs::emit_authorization_denied;

use super::audit::{AuditEntry, AuditSink};
use super::capability::{capability_string, Action, Resource, RUN_AGENT_GRANT};
use super::permissions::PermissionTable;
use super::role::RoleResolver;

/// Raised by a guard when the requested action is not covered by the role's grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Agent {agent_id} not allowed to {action} {resource}")]
pub struct AuthorizationViolation {
    pub agent_id: String,
    pub action: Action,
    pub resource: String,
}

/// Which test satisfied an allowed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantMatch {
    /// `"<action>:<resource>"` is granted verbatim.
    Exact,
    /// The resource is `"<type>:<id>"` and `"<action>:<type>"` is granted.
    Parent,
    /// `action == run` and the role holds `"run:agent"`.
    UniversalRun,
}

/// Outcome of evaluating one request against the permission table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub role: String,
    pub matched: Option<GrantMatch>,
    known_role: bool,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.matched.is_some()
    }

    fn denial_reason(&self) -> Option<String> {
        match (self.matched, self.known_role) {
            (Some(_), _) => None,
            (None, false) => Some(format!("unknown role '{}' has no capabilities", self.role)),
            (None, true) => Some("permission denied".to_string()),
        }
    }
}

/// Evaluates `(agent, action, resource)` requests and records each one.
///
/// The permission table is immutable and shared; the only mutable state is the
/// audit sequence counter, whose lock also serializes appends to the sink.
pub struct AuthorizationService {
    table: Arc<PermissionTable>,
    resolver: RoleResolver,
    sink: Arc<dyn AuditSink>,
    run_id: Option<String>,
    seq: Mutex<u64>,
}

impl AuthorizationService {
    pub fn new(
        table: Arc<PermissionTable>,
        resolver: RoleResolver,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            table,
            resolver,
            sink,
            run_id: None,
            seq: Mutex::new(0),
        }
    }

    /// Tag every audit entry written by this service with `run_id`.
    pub fn for_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn permissions(&self) -> &PermissionTable {
        &self.table
    }

    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    /// Number of requests evaluated (and therefore audit entries attempted) so far.
    pub fn evaluations(&self) -> u64 {
        *self.seq.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Evaluate a request without recording it.
    ///
    /// `allowed = exact || parent || universal_run`; the same inputs always
    /// produce the same decision.
    pub fn decide(&self, agent_id: &str, action: Action, resource: &str) -> Decision {
        let role = self.resolver.resolve(agent_id);
        let grants = self.table.grants_for(role);
        let has = |grant: &str| grants.is_some_and(|g| g.contains(grant));

        let parsed = Resource::parse(resource);
        let matched = if has(&capability_string(action, resource)) {
            Some(GrantMatch::Exact)
        } else if parsed.is_compound() && has(&capability_string(action, parsed.kind())) {
            Some(GrantMatch::Parent)
        } else if action == Action::Run && has(RUN_AGENT_GRANT) {
            Some(GrantMatch::UniversalRun)
        } else {
            None
        };

        Decision {
            role: role.to_string(),
            matched,
            known_role: grants.is_some(),
        }
    }

    /// Evaluate a request, append exactly one audit entry, and return the outcome.
    ///
    /// If the entry cannot be recorded the request is refused: nothing is
    /// allowed without leaving a trace.
    pub fn authorize(
        &self,
        agent_id: &str,
        action: Action,
        resource: &str,
        metadata: Option<serde_json::Value>,
    ) -> bool {
        let decision = self.decide(agent_id, action, resource);
        let allowed = decision.is_allowed();
        METRICS.inc_authorizations();

        let recorded = {
            let mut seq = self.seq.lock().unwrap_or_else(|p| p.into_inner());
            *seq += 1;
            let entry = AuditEntry {
                seq: *seq,
                timestamp: Utc::now(),
                run_id: self.run_id.clone(),
                agent_id: agent_id.to_string(),
                action,
                resource: resource.to_string(),
                allowed,
                reason: decision.denial_reason(),
                metadata,
            };
            self.sink.append(&entry)
        };

        debug!(
            agent_id = %agent_id,
            role = %decision.role,
            action = %action,
            resource = %resource,
            allowed,
            "authorization evaluated"
        );

        match recorded {
            Ok(()) => {
                if !allowed {
                    METRICS.inc_denials();
                }
                allowed
            }
            Err(e) => {
                error!(agent_id = %agent_id, action = %action, resource = %resource, error = %e,
                    "audit append failed; refusing request");
                METRICS.inc_denials();
                false
            }
        }
    }

    fn guard(
        &self,
        agent_id: &str,
        action: Action,
        resource: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), AuthorizationViolation> {
        if self.authorize(agent_id, action, resource, metadata) {
            return Ok(());
        }
        emit_authorization_denied(agent_id, action.as_str(), resource);
        Err(AuthorizationViolation {
            agent_id: agent_id.to_string(),
            action,
            resource: resource.to_string(),
        })
    }

    /// Require `write` access to `resource`.
    pub fn check_write(
        &self,
        agent_id: &str,
        resource: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), AuthorizationViolation> {
        self.guard(agent_id, Action::Write, resource, metadata)
    }

    /// Require `read` access to `resource`.
    pub fn check_read(
        &self,
        agent_id: &str,
        resource: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), AuthorizationViolation> {
        self.guard(agent_id, Action::Read, resource, metadata)
    }

    /// Require permission for `agent_id` to run at all. The resource is the agent itself.
    pub fn check_run(&self, agent_id: &str) -> Result<(), AuthorizationViolation> {
        self.guard(agent_id, Action::Run, agent_id, None)
    }
}

impl std::fmt::Debug for AuthorizationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationService")
            .field("resolver", &self.resolver)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::audit::{AuditResult, MemoryAuditLog};

    fn service(table: PermissionTable) -> (Arc<MemoryAuditLog>, AuthorizationService) {
        let log = Arc::new(MemoryAuditLog::new());
        let svc = AuthorizationService::new(
            Arc::new(table),
            RoleResolver::new(["code_agent", "test_agent"]),
            log.clone(),
        );
        (log, svc)
    }

    #[test]
    fn test_exact_grant_allows() {
        let (_, svc) = service(PermissionTable::standard());
        let d = svc.decide("architecture_agent", Action::Write, "architecture");
        assert_eq!(d.matched, Some(GrantMatch::Exact));
    }

    #[test]
    fn test_parent_grant_covers_every_instance() {
        let (_, svc) = service(PermissionTable::standard());
        let d = svc.decide("code_agent:mod1", Action::Write, "module_code:mod1");
        assert_eq!(d.matched, Some(GrantMatch::Parent));
    }

    #[test]
    fn test_specific_id_grant_does_not_cover_siblings() {
        let table = PermissionTable::empty().with_grant("code_agent", "write:module_code:mod2");
        let (_, svc) = service(table);
        assert!(svc.decide("code_agent:mod2", Action::Write, "module_code:mod2").is_allowed());
        assert!(!svc.decide("code_agent:mod1", Action::Write, "module_code:mod1").is_allowed());
    }

    #[test]
    fn test_instance_grant_does_not_cover_bare_type() {
        let table = PermissionTable::empty().with_grant("code_agent", "write:module_code:mod2");
        let (_, svc) = service(table);
        assert!(!svc.decide("code_agent:mod2", Action::Write, "module_code").is_allowed());
    }

    #[test]
    fn test_universal_run_grant_only_applies_to_run() {
        let table = PermissionTable::empty().with_grant("quality_agent", RUN_AGENT_GRANT);
        let (_, svc) = service(table);
        assert_eq!(
            svc.decide("quality_agent", Action::Run, "anything:at_all").matched,
            Some(GrantMatch::UniversalRun)
        );
        assert!(!svc.decide("quality_agent", Action::Read, "agent").is_allowed());
    }

    #[test]
    fn test_unknown_role_is_denied_with_reason() {
        let (log, svc) = service(PermissionTable::standard());
        assert!(!svc.authorize("deploy_agent", Action::Run, "deploy_agent", None));
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].reason.as_deref().unwrap().contains("unknown role"));
    }

    #[test]
    fn test_authorize_appends_exactly_one_entry_per_call() {
        let (log, svc) = service(PermissionTable::standard());
        svc.authorize("code_agent:a", Action::Write, "module_code:a", None);
        svc.authorize("code_agent:a", Action::Write, "architecture", None);
        svc.authorize("test_agent:a", Action::Read, "module_code:a", None);

        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(
            entries.iter().map(|e| e.allowed).collect::<Vec<_>>(),
            vec![true, false, true]
        );
    }

    #[test]
    fn test_for_run_tags_entries() {
        let log = Arc::new(MemoryAuditLog::new());
        let svc = AuthorizationService::new(
            Arc::new(PermissionTable::standard()),
            RoleResolver::default(),
            log.clone(),
        )
        .for_run("run-42");
        svc.check_run("build_agent").unwrap();
        assert_eq!(log.entries()[0].run_id.as_deref(), Some("run-42"));
    }

    #[test]
    fn test_check_write_violation_message() {
        let (_, svc) = service(PermissionTable::standard());
        let err = svc.check_write("code_agent:mod1", "architecture", None).unwrap_err();
        assert_eq!(err.to_string(), "Agent code_agent:mod1 not allowed to write architecture");
    }

    #[test]
    fn test_check_read_and_run() {
        let (log, svc) = service(PermissionTable::standard());
        assert!(svc.check_read("test_agent:m", "module_code:m", None).is_ok());
        assert!(svc.check_run("test_agent:m").is_ok());
        let err = svc.check_read("test_agent:m", "reports", None).unwrap_err();
        assert_eq!(err.action, Action::Read);
        assert_eq!(log.len(), 3);
        assert_eq!(svc.evaluations(), 3);
    }

    #[test]
    fn test_metadata_is_recorded() {
        let (log, svc) = service(PermissionTable::standard());
        svc.check_write(
            "architecture_agent",
            "architecture",
            Some(serde_json::json!({"prompt_version": "v1"})),
        )
        .unwrap();
        assert_eq!(
            log.entries()[0].metadata,
            Some(serde_json::json!({"prompt_version": "v1"}))
        );
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn append(&self, _entry: &AuditEntry) -> AuditResult<()> {
            Err(crate::authz::audit::AuditError::Poisoned)
        }
    }

    #[test]
    fn test_unrecordable_request_is_refused() {
        let svc = AuthorizationService::new(
            Arc::new(PermissionTable::standard()),
            RoleResolver::default(),
            Arc::new(FailingSink),
        );
        assert!(!svc.authorize("architecture_agent", Action::Write, "architecture", None));
        // The pure decision is unaffected.
        assert!(svc
            .decide("architecture_agent", Action::Write, "architecture")
            .is_allowed());
    }
}
