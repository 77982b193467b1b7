//! Crate-level error taxonomy for stagegate.
//!
//! Authorization denials and agent failures have their own types
//! ([`crate::authz::AuthorizationViolation`], [`crate::agent::AgentError`]);
//! `GateError` covers configuration and I/O problems that prevent a run from
//! being assembled at all.

/// Errors produced while loading configuration or assembling a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("invalid grant '{grant}' for role {role}: {reason}")]
    InvalidGrant {
        role: String,
        grant: String,
        reason: String,
    },

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("invalid run input: {0}")]
    InvalidInput(String),

    #[error("audit error: {0}")]
    Audit(#[from] crate::authz::AuditError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for stagegate configuration and assembly operations.
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_grant_display_names_role_and_grant() {
        let err = GateError::InvalidGrant {
            role: "code_agent".to_string(),
            grant: "delete:module_code".to_string(),
            reason: "unknown action".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("code_agent"));
        assert!(msg.contains("delete:module_code"));
        assert!(msg.contains("unknown action"));
    }

    #[test]
    fn test_invalid_pipeline_display() {
        let err = GateError::InvalidPipeline("no stages".to_string());
        assert_eq!(err.to_string(), "invalid pipeline: no stages");
    }
}
