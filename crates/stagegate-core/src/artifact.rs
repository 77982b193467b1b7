//! Guarded, atomic artifact persistence inside a run's output namespace.
//!
//! Layout: `<run dir>/<resource type>/[<resource id>/]<file name>`, with a
//! `<file name>.meta.json` sidecar next to every artifact.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::agent::AgentError;
use crate::authz::Resource;
use crate::context::RunContext;

/// Sidecar record describing one persisted artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub artifact_id: String,
    pub agent_id: String,
    pub resource: String,
    pub path: PathBuf,
    /// Hex-encoded SHA-256 of the content.
    pub sha256: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Whether `id` can name an item directory: exactly one normal path
/// component, so `.`, `..`, and anything with a separator are rejected.
pub fn is_path_safe_id(id: &str) -> bool {
    let mut components = Path::new(id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(c)), None) if c == std::ffi::OsStr::new(id)
    )
}

/// Directory holding artifacts for `resource` under `run_dir`.
pub fn resource_dir(run_dir: &Path, resource: &Resource) -> PathBuf {
    let dir = run_dir.join(resource.kind());
    match resource.id() {
        Some(id) => dir.join(id),
        None => dir,
    }
}

/// Check `write` access for `agent_id` on `resource`, then persist `content`.
///
/// Nothing touches the filesystem when the guard refuses.
pub fn write_artifact(
    ctx: &RunContext,
    agent_id: &str,
    resource: &Resource,
    file_name: &str,
    content: &[u8],
    metadata: Option<serde_json::Value>,
) -> Result<ArtifactRecord, AgentError> {
    let resource_str = resource.to_string();
    ctx.authz()
        .check_write(agent_id, &resource_str, metadata.clone())?;

    ensure_plain_file_name(file_name)?;
    let dir = resource_dir(ctx.output_dir(), resource);
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let path = dir.join(file_name);
    write_atomic(&dir, &path, content)?;

    let record = ArtifactRecord {
        artifact_id: uuid::Uuid::new_v4().to_string(),
        agent_id: agent_id.to_string(),
        resource: resource_str,
        path: path.clone(),
        sha256: sha256_hex(content),
        size_bytes: content.len() as u64,
        created_at: Utc::now(),
        metadata,
    };
    let sidecar = dir.join(format!("{file_name}.meta.json"));
    let sidecar_body = serde_json::to_vec_pretty(&record).context("encoding artifact sidecar")?;
    write_atomic(&dir, &sidecar, &sidecar_body)?;

    tracing::debug!(
        agent_id = %agent_id,
        resource = %record.resource,
        path = %path.display(),
        size_bytes = record.size_bytes,
        "artifact written"
    );
    Ok(record)
}

fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> anyhow::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn ensure_plain_file_name(file_name: &str) -> anyhow::Result<()> {
    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(anyhow!("artifact file name '{file_name}' must be a single path component")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::authz::{AuthorizationService, MemoryAuditLog, PermissionTable, RoleResolver};
    use crate::context::{Collaborators, RunId, RunInput};

    fn ctx(root: &Path) -> (Arc<MemoryAuditLog>, RunContext) {
        let log = Arc::new(MemoryAuditLog::new());
        let authz = AuthorizationService::new(
            Arc::new(PermissionTable::standard()),
            RoleResolver::new(["code_agent", "test_agent"]),
            log.clone(),
        );
        let ctx = RunContext::new(
            RunId::generate(),
            root,
            &RunInput::default(),
            Arc::new(authz),
            Collaborators::offline(),
        );
        (log, ctx)
    }

    #[test]
    fn test_writes_content_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let (log, ctx) = ctx(dir.path());
        let resource = Resource::instance("module_code", "imu");

        let record =
            write_artifact(&ctx, "code_agent:imu", &resource, "imu.c", b"int x;", None).unwrap();

        assert_eq!(record.path, ctx.output_dir().join("module_code").join("imu").join("imu.c"));
        assert_eq!(fs::read(&record.path).unwrap(), b"int x;");
        assert_eq!(record.sha256, sha256_hex(b"int x;"));

        let sidecar = record.path.with_file_name("imu.c.meta.json");
        let back: ArtifactRecord = serde_json::from_slice(&fs::read(sidecar).unwrap()).unwrap();
        assert_eq!(back, record);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_denied_write_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let (log, ctx) = ctx(dir.path());

        let err = write_artifact(
            &ctx,
            "code_agent:imu",
            &Resource::kind_only("architecture"),
            "architecture.md",
            b"x",
            None,
        )
        .unwrap_err();

        assert!(err.violation().is_some());
        assert!(!ctx.output_dir().exists());
        assert!(!log.entries()[0].allowed);
    }

    #[test]
    fn test_path_safe_ids() {
        for ok in ["mod1", "dht22", "bus:i2c", "sensor.v2"] {
            assert!(is_path_safe_id(ok), "{ok}");
        }
        for bad in ["", ".", "..", "a/b", "../x", "/abs", "a/"] {
            assert!(!is_path_safe_id(bad), "{bad}");
        }
    }

    #[test]
    fn test_rejects_nested_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let (_, ctx) = ctx(dir.path());
        let resource = Resource::kind_only("architecture");
        for bad in ["../escape.md", "a/b.md", ""] {
            assert!(
                write_artifact(&ctx, "architecture_agent", &resource, bad, b"x", None).is_err(),
                "{bad:?} accepted"
            );
        }
    }
}
