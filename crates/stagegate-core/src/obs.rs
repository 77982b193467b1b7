//! Structured observability hooks for pipeline run lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via [`run_span`]
//! - Emission functions for run, stage, and authorization events
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`); denials and
//! failures use `warn!`.

use tracing::{info, warn};

/// Span carrying `run_id`, attached to a run's future with `Instrument`.
///
/// An entered-span guard cannot be held across `.await` in a `Send` future,
/// so the orchestrator instruments the whole run instead.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("stagegate.run", run_id = %run_id)
}

/// Emit event: run started for a project.
pub fn emit_run_started(run_id: &str, project_name: &str, stage_count: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        project = %project_name,
        stages = stage_count,
    );
}

/// Emit event: run finished with duration, audit volume, and outcome.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, invocations: usize, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        invocations = invocations,
        success = success,
    );
}

pub fn emit_stage_started(stage: &str) {
    info!(event = "stage.started", stage = %stage);
}

pub fn emit_stage_finished(stage: &str, state: &str) {
    info!(event = "stage.finished", stage = %stage, state = %state);
}

pub fn emit_stage_skipped(stage: &str, flag: &str) {
    info!(event = "stage.skipped", stage = %stage, flag = %flag);
}

/// Emit event: a guard refused an agent request (warning level).
pub fn emit_authorization_denied(agent_id: &str, action: &str, resource: &str) {
    warn!(
        event = "authz.denied",
        agent_id = %agent_id,
        action = %action,
        resource = %resource,
    );
}

/// Emit event: an agent invocation ended unsuccessfully (warning level).
pub fn emit_agent_failed(agent_id: &str, message: &str) {
    warn!(event = "agent.failed", agent_id = %agent_id, message = %message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _entered = run_span("test-run-id").entered();
        emit_stage_started("architecture");
        emit_stage_finished("architecture", "succeeded");
    }
}
