//! The agent contract.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authz::AuthorizationViolation;
use crate::context::RunContext;

/// Outcome of one agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<PathBuf>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AgentResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            artifact_location: None,
            message: message.into(),
            metadata: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            artifact_location: None,
            message: message.into(),
            metadata: None,
        }
    }

    pub fn with_artifact(mut self, location: impl Into<PathBuf>) -> Self {
        self.artifact_location = Some(location.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Ways an invocation can end other than with an [`AgentResult`].
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A guard refused the agent. Always fatal to the run.
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationViolation),

    /// Anything else the agent could not handle.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// The violation behind this error, if any, including one wrapped in `Other`.
    pub fn violation(&self) -> Option<&AuthorizationViolation> {
        match self {
            AgentError::Unauthorized(v) => Some(v),
            AgentError::Other(e) => e.downcast_ref::<AuthorizationViolation>(),
        }
    }
}

/// A unit of work in the pipeline.
///
/// Agents gate their own reads and writes through the guards on
/// [`RunContext::authz`]; the orchestrator performs the `run` check before
/// calling [`Agent::execute`].
#[async_trait]
pub trait Agent: Send + Sync {
    /// Identifier used for authorization and result keys, e.g. `"code_agent:imu"`.
    fn id(&self) -> &str;

    async fn execute(&self, ctx: &RunContext, input: &Value) -> Result<AgentResult, AgentError>;
}
