//! Actions, resources, and capability grant strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Universal grant that lets a role pass any `run` check regardless of resource.
pub const RUN_AGENT_GRANT: &str = "run:agent";

/// What an agent wants to do with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Run,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Run => "run",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Action::Read),
            "write" => Ok(Action::Write),
            "run" => Ok(Action::Run),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

/// A named resource, optionally scoped to one instance: `"<type>"` or `"<type>:<id>"`.
///
/// Only the first `:` separates type from id, so ids may themselves contain colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    kind: String,
    id: Option<String>,
}

impl Resource {
    /// Parse a resource string. An empty id (`"tests:"`) is treated as a bare type.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((kind, id)) if !id.is_empty() => Self {
                kind: kind.to_string(),
                id: Some(id.to_string()),
            },
            Some((kind, _)) => Self {
                kind: kind.to_string(),
                id: None,
            },
            None => Self {
                kind: raw.to_string(),
                id: None,
            },
        }
    }

    /// A bare resource type with no instance id.
    pub fn kind_only(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
        }
    }

    /// A resource scoped to one instance of `kind`.
    pub fn instance(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(id.into()),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_compound(&self) -> bool {
        self.id.is_some()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => f.write_str(&self.kind),
        }
    }
}

/// Render the capability string an exact grant for `(action, resource)` must match.
pub fn capability_string(action: Action, resource: &str) -> String {
    format!("{action}:{resource}")
}

/// Check that `grant` has the shape `<read|write|run>:<type>[:<id>]`.
pub fn validate_grant(grant: &str) -> Result<(), String> {
    let (action, resource) = grant
        .split_once(':')
        .ok_or_else(|| "expected '<action>:<resource>'".to_string())?;
    action.parse::<Action>()?;
    if resource.is_empty() || resource.starts_with(':') {
        return Err("resource type must not be empty".to_string());
    }
    Ok(())
}
