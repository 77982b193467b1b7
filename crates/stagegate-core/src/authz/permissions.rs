//! Role → capability grant tables.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

use super::capability::{validate_grant, RUN_AGENT_GRANT};

/// Immutable mapping from role to the capability strings granted to it.
///
/// Built once (via the builder methods or [`PermissionTable::load`]) and then
/// shared behind an `Arc` for the lifetime of a run; there are no mutators
/// that take `&mut self`. Roles absent from the table have no capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionTable {
    roles: BTreeMap<String, BTreeSet<String>>,
}

impl PermissionTable {
    /// A table with no roles (every request denied).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a single grant to `role` and return `self` (builder pattern).
    pub fn with_grant(mut self, role: impl Into<String>, grant: impl Into<String>) -> Self {
        self.roles
            .entry(role.into())
            .or_default()
            .insert(grant.into());
        self
    }

    /// Replace the grants of `role` wholesale and return `self`.
    pub fn with_role<I, S>(mut self, role: impl Into<String>, grants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles
            .insert(role.into(), grants.into_iter().map(Into::into).collect());
        self
    }

    /// The standard table for the five-stage firmware pipeline.
    ///
    /// | Role               | Grants                                                        |
    /// |--------------------|---------------------------------------------------------------|
    /// | architecture_agent | read:requirements, write:architecture, run:agent              |
    /// | code_agent         | run:agent, write:module_code, read:architecture               |
    /// | test_agent         | run:agent, read:module_code, write:tests                      |
    /// | quality_agent      | run:agent, read:module_code, read:tests, write:reports        |
    /// | build_agent        | run:agent, read:module_code, read:tests, write:artifacts, write:build_log |
    pub fn standard() -> Self {
        Self::empty()
            .with_role(
                "architecture_agent",
                ["read:requirements", "write:architecture", RUN_AGENT_GRANT],
            )
            .with_role(
                "code_agent",
                [RUN_AGENT_GRANT, "write:module_code", "read:architecture"],
            )
            .with_role(
                "test_agent",
                [RUN_AGENT_GRANT, "read:module_code", "write:tests"],
            )
            .with_role(
                "quality_agent",
                [
                    RUN_AGENT_GRANT,
                    "read:module_code",
                    "read:tests",
                    "write:reports",
                ],
            )
            .with_role(
                "build_agent",
                [
                    RUN_AGENT_GRANT,
                    "read:module_code",
                    "read:tests",
                    "write:artifacts",
                    "write:build_log",
                ],
            )
    }

    /// Parse and validate a JSON object of `role -> [grant, ...]`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let table: Self = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    /// Load and validate a permission table from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Check every grant has the shape `<read|write|run>:<type>[:<id>]`.
    pub fn validate(&self) -> Result<()> {
        for (role, grants) in &self.roles {
            for grant in grants {
                validate_grant(grant).map_err(|reason| GateError::InvalidGrant {
                    role: role.clone(),
                    grant: grant.clone(),
                    reason,
                })?;
            }
        }
        Ok(())
    }

    /// Grants held by `role`, or `None` when the role is unknown.
    pub fn grants_for(&self, role: &str) -> Option<&BTreeSet<String>> {
        self.roles.get(role)
    }

    /// Whether `role` holds exactly `grant`.
    pub fn has_grant(&self, role: &str, grant: &str) -> bool {
        self.roles
            .get(role)
            .is_some_and(|grants| grants.contains(grant))
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_has_five_roles() {
        let table = PermissionTable::standard();
        let roles: Vec<&str> = table.roles().collect();
        assert_eq!(
            roles,
            vec![
                "architecture_agent",
                "build_agent",
                "code_agent",
                "quality_agent",
                "test_agent"
            ]
        );
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_every_standard_role_may_run() {
        let table = PermissionTable::standard();
        for role in table.roles() {
            assert!(table.has_grant(role, RUN_AGENT_GRANT), "{role} cannot run");
        }
    }

    #[test]
    fn test_unknown_role_has_no_grants() {
        let table = PermissionTable::standard();
        assert!(table.grants_for("deploy_agent").is_none());
        assert!(!table.has_grant("deploy_agent", RUN_AGENT_GRANT));
    }

    #[test]
    fn test_with_grant_accumulates() {
        let table = PermissionTable::empty()
            .with_grant("code_agent", "run:agent")
            .with_grant("code_agent", "write:module_code:mod2");
        assert_eq!(table.grants_for("code_agent").map(|g| g.len()), Some(2));
    }

    #[test]
    fn test_from_json_str_validates_grants() {
        let ok = PermissionTable::from_json_str(r#"{"code_agent": ["run:agent", "write:module_code"]}"#)
            .unwrap();
        assert!(ok.has_grant("code_agent", "write:module_code"));

        let err = PermissionTable::from_json_str(r#"{"code_agent": ["erase:module_code"]}"#)
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidGrant { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.json");
        let json = serde_json::to_string_pretty(&PermissionTable::standard()).unwrap();
        std::fs::write(&path, json).unwrap();

        let loaded = PermissionTable::load(&path).unwrap();
        assert_eq!(loaded, PermissionTable::standard());
    }
}
