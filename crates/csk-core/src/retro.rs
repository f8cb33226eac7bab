//! Retro stage: cluster the task's incidents, write `retro.md` and at least
//! one patch proposal under the local overlay, then close out the task.

use crate::error::{CskError, Result};
use crate::event::{EventFilter, EventLog, EventScope, EventType};
use crate::incident::{self, Incident, IncidentKind};
use crate::io;
use crate::paths::Layout;
use crate::task::{self, TaskPaths};
use crate::types::TaskStatus;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const CLUSTERS: [(&str, &[IncidentKind]); 5] = [
    ("environment", &[IncidentKind::CommandNotFound, IncidentKind::WorktreeCreateFailed]),
    (
        "toolchain",
        &[IncidentKind::VerifyFail, IncidentKind::E2eFail, IncidentKind::ImplementFail],
    ),
    (
        "plan",
        &[
            IncidentKind::ScopeViolation,
            IncidentKind::ScopeConfigMissing,
            IncidentKind::VerifyConfigMissing,
            IncidentKind::E2eMissing,
        ],
    ),
    ("process", &[IncidentKind::TokenWaste, IncidentKind::ReviewFail, IncidentKind::CommandDenied]),
    (
        "integrity",
        &[
            IncidentKind::SchemaViolation,
            IncidentKind::ReplayInvariantViolation,
            IncidentKind::ReadyPrerequisitesMissing,
            IncidentKind::RetroPreconditionMissing,
        ],
    ),
];

fn cluster_for(kind: IncidentKind) -> &'static str {
    CLUSTERS
        .iter()
        .find(|(_, kinds)| kinds.contains(&kind))
        .map(|(name, _)| *name)
        .unwrap_or("process")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetroOutcome {
    pub task_id: String,
    pub incident_count: usize,
    pub retro_path: String,
    pub patch_path: String,
}

/// Run the retro for a task in `ready_approved` or `blocked`. Reads the
/// per-task incident stream plus the task's event tail, writes `retro.md`
/// with a cluster table and one patch proposal (a no-op proposal is valid),
/// transitions to `retro_done` and emits `retro.completed`.
pub fn retro_run(
    layout: &Layout,
    log: &EventLog,
    paths: &TaskPaths,
    feedback: Option<&str>,
) -> Result<RetroOutcome> {
    let mut state = task::read_state(paths)?;
    if !matches!(state.status, TaskStatus::ReadyApproved | TaskStatus::Blocked) {
        return Err(CskError::RetroPreconditionMissing {
            task_id: state.task_id.clone(),
            status: state.status.to_string(),
        });
    }

    let incidents = incident::task_incidents(paths)?;
    let mut clusters: BTreeMap<&'static str, Vec<&Incident>> = BTreeMap::new();
    for row in &incidents {
        clusters.entry(cluster_for(row.kind)).or_default().push(row);
    }

    let tail = log.tail(
        &EventFilter {
            task_id: Some(state.task_id.clone()),
            ..Default::default()
        },
        50,
    )?;

    // retro.md
    let mut lines = vec![format!("# Retro for {}", state.task_id), String::new()];
    lines.push("## Incident clusters".to_string());
    lines.push(String::new());
    lines.push("| cluster | count | kinds |".to_string());
    lines.push("| --- | --- | --- |".to_string());
    for (name, _) in &CLUSTERS {
        let items = clusters.get(name).map(Vec::as_slice).unwrap_or_default();
        let mut kinds: Vec<String> = items.iter().map(|i| i.kind.to_string()).collect();
        kinds.sort();
        kinds.dedup();
        lines.push(format!("| {name} | {} | {} |", items.len(), kinds.join(", ")));
    }
    lines.push(String::new());
    lines.push("## Incidents".to_string());
    if incidents.is_empty() {
        lines.push("- none recorded".to_string());
    }
    for row in &incidents {
        lines.push(format!(
            "- [{}] {}: {} (hint: {})",
            row.id, row.kind, row.details, row.remediation_hint
        ));
    }
    lines.push(String::new());
    lines.push(format!("## Event tail ({} events)", tail.len()));
    for event in tail.iter().rev().take(10) {
        lines.push(format!("- {} {}", event.ts.to_rfc3339(), event.event_type));
    }
    lines.push(String::new());
    lines.push("## User feedback".to_string());
    lines.push(format!("- {}", feedback.unwrap_or("none")));
    io::atomic_write(&paths.retro(), (lines.join("\n") + "\n").as_bytes())?;

    // Patch proposal under the local overlay, stamped per task
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let patch_path = layout
        .local_patches()
        .join(format!("{}-{stamp}.md", state.task_id));
    let mut patch = vec![
        format!("# Patch proposal for {}", state.task_id),
        String::new(),
    ];
    if incidents.is_empty() {
        patch.push("No incidents were recorded; no changes proposed.".to_string());
    } else {
        for (name, _) in &CLUSTERS {
            let items = clusters.get(name).map(Vec::as_slice).unwrap_or_default();
            if items.is_empty() {
                continue;
            }
            patch.push(format!("## {name}"));
            for row in items {
                patch.push(format!("- {}: {}", row.kind, row.remediation_hint));
            }
            patch.push(String::new());
        }
    }
    io::atomic_write(&patch_path, (patch.join("\n") + "\n").as_bytes())?;

    let refs = vec![
        paths.retro().display().to_string(),
        patch_path.display().to_string(),
    ];
    task::set_status(paths, &mut state, TaskStatus::RetroDone)?;
    log.append(
        EventType::RetroCompleted,
        "engine",
        EventScope::task(&state.module_id, &state.task_id),
        serde_json::json!({
            "task_id": state.task_id,
            "incidents": incidents.len(),
            "retro_file": paths.retro().display().to_string(),
            "patch_file": patch_path.display().to_string(),
        }),
        refs,
    )?;

    Ok(RetroOutcome {
        task_id: state.task_id.clone(),
        incident_count: incidents.len(),
        retro_path: paths.retro().display().to_string(),
        patch_path: patch_path.display().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
