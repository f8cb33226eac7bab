//! Thin wrapper around `git worktree`. The kernel only records the mapping
//! and consumes the resulting workdir paths; version control stays external.

use crate::error::Result;
use crate::paths::Layout;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub module_id: String,
    pub path: String,
    pub branch: String,
    pub created: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// Create `.csk/worktrees/<mission_id>/<module_id>` on a dedicated branch.
/// Failure is not fatal: the caller records a `worktree.failed` event plus a
/// `worktree_create_failed` incident and the mission continues against the
/// module path itself.
pub fn create_module_worktree(
    layout: &Layout,
    mission_id: &str,
    module_id: &str,
) -> Result<WorktreeInfo> {
    let target: PathBuf = layout.worktree_dir(mission_id, module_id);
    let branch = format!("csk/{mission_id}/{module_id}");

    if target.exists() {
        return Ok(WorktreeInfo {
            module_id: module_id.to_string(),
            path: target.display().to_string(),
            branch,
            created: true,
            fallback_reason: None,
        });
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let output = Command::new("git")
        .arg("-C")
        .arg(layout.root())
        .args(["worktree", "add", "-b", &branch])
        .arg(&target)
        .output();

    match output {
        Ok(out) if out.status.success() => Ok(WorktreeInfo {
            module_id: module_id.to_string(),
            path: target.display().to_string(),
            branch,
            created: true,
            fallback_reason: None,
        }),
        Ok(out) => {
            let reason = String::from_utf8_lossy(&out.stderr).trim().to_string();
            tracing::warn!(module_id, %reason, "git worktree add failed");
            Ok(WorktreeInfo {
                module_id: module_id.to_string(),
                path: target.display().to_string(),
                branch,
                created: false,
                fallback_reason: Some(reason),
            })
        }
        Err(e) => Ok(WorktreeInfo {
            module_id: module_id.to_string(),
            path: target.display().to_string(),
            branch,
            created: false,
            fallback_reason: Some(format!("git unavailable: {e}")),
        }),
    }
}
