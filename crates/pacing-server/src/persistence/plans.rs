//! Atomic JSON plan file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pacing_core::{PacingPlan, PlanSummary};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRecord {
    pub session_id: String,
    pub route: String,
    pub committed_at: DateTime<Utc>,
    pub summary: PlanSummary,
    #[serde(flatten)]
    pub plan: PacingPlan,
}

/// Sibling of `path` unique to this write, so concurrent writers never
/// share a temp file.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "plan.json".into());
    name.push(format!(".{}.tmp", uuid::Uuid::new_v4()));
    path.with_file_name(name)
}

/// Replace `path` with `record`. Readers never observe a partial file.
pub async fn write_plan(path: &Path, record: &PlanRecord) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let body = serde_json::to_vec_pretty(record)?;
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, &body)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(err).with_context(|| format!("renaming {} -> {}", tmp.display(), path.display()));
    }
    tracing::debug!(path = %path.display(), session_id = %record.session_id, "plan persisted");
    Ok(())
}
