//! Replay checker: re-walk the event log in insertion order, maintain a
//! projected state per task, and enforce the cross-artifact invariants.
//! Every violation names a concrete recovery operation.

use crate::error::Result;
use crate::event::{Event, EventLog, EventScope, EventType};
use crate::io;
use crate::paths::Layout;
use crate::registry::Registry;
use crate::task::TaskPaths;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// Violation / ReplayReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub kind: String,
    pub refs: Vec<String>,
    /// Concrete recovery operation.
    pub next: String,
    pub event_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub events_checked: usize,
    pub violations: Vec<Violation>,
}

impl ReplayReport {
    pub fn ok(&self) -> bool {
        self.violations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Projected per-task state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TaskTrace {
    frozen: bool,
    plan_approved: bool,
    ready_validated: bool,
    ready_approved: bool,
    blocked: bool,
    packs_by_slice: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// replay_check
// ---------------------------------------------------------------------------

pub fn replay_check(layout: &Layout, log: &EventLog) -> Result<ReplayReport> {
    let events = log.iter_chronological()?;
    let registry = Registry::load(layout).ok();
    let module_paths: BTreeMap<String, String> = registry
        .map(|r| {
            r.modules
                .iter()
                .map(|m| (m.module_id.clone(), m.path.clone()))
                .collect()
        })
        .unwrap_or_default();

    let mut traces: BTreeMap<String, TaskTrace> = BTreeMap::new();
    let mut violations: Vec<Violation> = Vec::new();

    for event in &events {
        let Some(task_id) = event.task_id.clone() else {
            continue;
        };
        let module_id = event.module_id.clone().unwrap_or_default();
        let task_paths = module_paths
            .get(&module_id)
            .map(|path| TaskPaths::new(layout, path, &task_id));
        let trace = traces.entry(task_id.clone()).or_default();

        match event.event_type {
            EventType::TaskFrozen => {
                trace.frozen = true;
                if let Some(paths) = &task_paths {
                    let freeze_path = paths.freeze();
                    if !freeze_path.exists() {
                        violations.push(violation(
                            event,
                            "freeze_missing",
                            vec![freeze_path.display().to_string()],
                            format!("csk task freeze --module-id {module_id} --task-id {task_id}"),
                        ));
                    } else if let Ok((ok, reason)) = crate::task::freeze_valid(paths) {
                        if !ok {
                            violations.push(violation(
                                event,
                                "freeze_drift",
                                vec![freeze_path.display().to_string()],
                                format!(
                                    "csk task critic --module-id {module_id} --task-id {task_id} ({reason})"
                                ),
                            ));
                        }
                    }
                }
            }
            EventType::TaskPlanApproved => {
                if !trace.frozen {
                    violations.push(violation(
                        event,
                        "plan_approved_without_freeze",
                        vec![],
                        format!("csk task freeze --module-id {module_id} --task-id {task_id}"),
                    ));
                }
                trace.plan_approved = true;
                if let Some(paths) = &task_paths {
                    require_file(
                        event,
                        &paths.plan_approval(),
                        "plan_approval_missing",
                        format!(
                            "csk task approve --module-id {module_id} --task-id {task_id} --approved-by <name>"
                        ),
                        &mut violations,
                    );
                }
            }
            EventType::ProofPackWritten => {
                let manifest_ref = event
                    .artifact_refs
                    .first()
                    .cloned()
                    .unwrap_or_default();
                let manifest_path = Path::new(&manifest_ref);
                if !manifest_path.exists() {
                    violations.push(violation(
                        event,
                        "proof_manifest_missing",
                        vec![manifest_ref.clone()],
                        slice_rerun_hint(&module_id, &task_id, event),
                    ));
                } else {
                    match io::read_json::<crate::executor::ProofManifest>(manifest_path) {
                        Ok(manifest) => {
                            for proof_ref in &manifest.proofs {
                                let proof_path = Path::new(proof_ref);
                                let passed = proof_path.exists()
                                    && io::read_json::<serde_json::Value>(proof_path)
                                        .map(|v| v["passed"].as_bool().unwrap_or(false))
                                        .unwrap_or(false);
                                if !passed {
                                    violations.push(violation(
                                        event,
                                        "proof_not_passed",
                                        vec![proof_ref.clone()],
                                        slice_rerun_hint(&module_id, &task_id, event),
                                    ));
                                }
                            }
                        }
                        Err(_) => violations.push(violation(
                            event,
                            "proof_manifest_unreadable",
                            vec![manifest_ref.clone()],
                            slice_rerun_hint(&module_id, &task_id, event),
                        )),
                    }
                }
                if let Some(slice_id) = &event.slice_id {
                    trace.packs_by_slice.insert(slice_id.clone());
                }
            }
            EventType::SliceCompleted => {
                let slice_id = event.slice_id.clone().unwrap_or_default();
                let has_pack = trace.packs_by_slice.contains(&slice_id);
                let carries_manifest = event
                    .artifact_refs
                    .first()
                    .map(|r| Path::new(r).exists())
                    .unwrap_or(false);
                if !has_pack && !carries_manifest {
                    violations.push(violation(
                        event,
                        "slice_completed_without_pack",
                        event.artifact_refs.clone(),
                        slice_rerun_hint(&module_id, &task_id, event),
                    ));
                }
            }
            EventType::ReadyValidated => {
                trace.ready_validated = true;
                if let Some(paths) = &task_paths {
                    require_file(
                        event,
                        &paths.ready_proof(),
                        "ready_proof_missing",
                        format!("csk gate validate-ready --module-id {module_id} --task-id {task_id}"),
                        &mut violations,
                    );
                    require_file(
                        event,
                        &paths.handoff(),
                        "handoff_missing",
                        format!("csk gate validate-ready --module-id {module_id} --task-id {task_id}"),
                        &mut violations,
                    );
                }
            }
            EventType::ReadyApproved => {
                if !trace.ready_validated {
                    violations.push(violation(
                        event,
                        "ready_approved_without_validation",
                        vec![],
                        format!("csk gate validate-ready --module-id {module_id} --task-id {task_id}"),
                    ));
                }
                trace.ready_approved = true;
                if let Some(paths) = &task_paths {
                    require_file(
                        event,
                        &paths.ready_approval(),
                        "ready_approval_missing",
                        format!(
                            "csk gate approve-ready --module-id {module_id} --task-id {task_id} --approved-by <name>"
                        ),
                        &mut violations,
                    );
                }
            }
            EventType::RetroCompleted => {
                let was_blocked = trace.blocked
                    || task_paths
                        .as_ref()
                        .map(|p| blocked_recorded(p))
                        .unwrap_or(false);
                if !trace.ready_approved && !was_blocked {
                    violations.push(violation(
                        event,
                        "retro_without_precondition",
                        vec![],
                        format!(
                            "csk gate approve-ready --module-id {module_id} --task-id {task_id} --approved-by <name>"
                        ),
                    ));
                }
                if let Some(paths) = &task_paths {
                    require_file(
                        event,
                        &paths.retro(),
                        "retro_file_missing",
                        format!("csk retro run --module-id {module_id} --task-id {task_id}"),
                        &mut violations,
                    );
                }
                let patch_exists = event
                    .artifact_refs
                    .iter()
                    .skip(1)
                    .any(|r| Path::new(r).exists())
                    || layout
                        .local_patches()
                        .read_dir()
                        .map(|mut entries| entries.any(|e| {
                            e.map(|e| {
                                e.file_name()
                                    .to_string_lossy()
                                    .starts_with(task_id.as_str())
                            })
                            .unwrap_or(false)
                        }))
                        .unwrap_or(false);
                if !patch_exists {
                    violations.push(violation(
                        event,
                        "patch_proposal_missing",
                        vec![layout.local_patches().display().to_string()],
                        format!("csk retro run --module-id {module_id} --task-id {task_id}"),
                    ));
                }
            }
            EventType::IncidentLogged => {
                if event.payload["kind"] == "token_waste" {
                    trace.blocked = true;
                }
            }
            _ => {}
        }
    }

    let report = ReplayReport {
        events_checked: events.len(),
        violations,
    };
    log.append(
        EventType::ReplayChecked,
        "engine",
        EventScope::default(),
        serde_json::json!({
            "events_checked": report.events_checked,
            "violations": report.violations.len(),
        }),
        vec![],
    )?;
    Ok(report)
}

fn violation(event: &Event, kind: &str, refs: Vec<String>, next: String) -> Violation {
    Violation {
        kind: kind.to_string(),
        refs,
        next,
        event_id: event.id.clone(),
    }
}

fn require_file(
    event: &Event,
    path: &Path,
    kind: &str,
    next: String,
    violations: &mut Vec<Violation>,
) {
    if !path.exists() {
        violations.push(violation(event, kind, vec![path.display().to_string()], next));
    }
}

fn slice_rerun_hint(module_id: &str, task_id: &str, event: &Event) -> String {
    match &event.slice_id {
        Some(slice_id) => format!(
            "csk slice run --module-id {module_id} --task-id {task_id} --slice-id {slice_id}"
        ),
        None => format!("csk gate validate-ready --module-id {module_id} --task-id {task_id}"),
    }
}

/// Whether the durable task state ever recorded a block.
fn blocked_recorded(paths: &TaskPaths) -> bool {
    crate::task::read_state(paths)
        .map(|s| {
            s.blocked_reason.is_some()
                || s.status == crate::types::TaskStatus::Blocked
                || s.status == crate::types::TaskStatus::RetroDone
        })
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Layout, EventLog) {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        Registry::new().save(&layout).unwrap();
        crate::registry::module_add(&layout, "api", ".").unwrap();
        let log = EventLog::open(&layout).unwrap();
        (dir, layout, log)
    }

    #[test]
    fn empty_log_replays_clean() {
        let (_dir, layout, log) = setup();
        let report = replay_check(&layout, &log).unwrap();
        assert!(report.ok());
        assert_eq!(report.events_checked, 0);
    }

    #[test]
    fn ready_approved_without_validated_is_violation() {
        let (_dir, layout, log) = setup();
        log.append(
            EventType::ReadyApproved,
            "alice",
            EventScope::task("api", "T-0001"),
            serde_json::json!({}),
            vec![],
        )
        .unwrap();
        let report = replay_check(&layout, &log).unwrap();
        assert!(!report.ok());
        assert!(report
            .violations
            .iter()
            .any(|v| v.kind == "ready_approved_without_validation"));
        assert!(report.violations[0].next.contains("validate-ready"));
    }

    #[test]
    fn missing_manifest_is_violation_with_rerun_hint() {
        let (_dir, layout, log) = setup();
        log.append(
            EventType::ProofPackWritten,
            "engine",
            EventScope::slice("api", "T-0001", "S-0001"),
            serde_json::json!({}),
            vec!["/nonexistent/manifest.json".to_string()],
        )
        .unwrap();
        let report = replay_check(&layout, &log).unwrap();
        assert!(report
            .violations
            .iter()
            .any(|v| v.kind == "proof_manifest_missing"));
        assert!(report.violations[0].next.contains("slice run"));
    }

    #[test]
    fn replay_is_idempotent_over_same_log() {
        let (_dir, layout, log) = setup();
        log.append(
            EventType::ReadyApproved,
            "alice",
            EventScope::task("api", "T-0001"),
            serde_json::json!({}),
            vec![],
        )
        .unwrap();
        let first = replay_check(&layout, &log).unwrap();
        let second = replay_check(&layout, &log).unwrap();
        // The second run sees one extra replay.checked event but derives the
        // same violations.
        assert_eq!(
            first
                .violations
                .iter()
                .map(|v| (&v.kind, &v.next))
                .collect::<Vec<_>>(),
            second
                .violations
                .iter()
                .map(|v| (&v.kind, &v.next))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn slice_completed_with_existing_manifest_ref_is_ok() {
        let (dir, layout, log) = setup();
        let manifest = dir.path().join("manifest.json");
        io::write_json(
            &manifest,
            &serde_json::json!({"task_id": "T-0001", "slice_id": "S-0001", "proofs": [], "created_at": chrono::Utc::now()}),
        )
        .unwrap();
        log.append(
            EventType::SliceCompleted,
            "engine",
            EventScope::slice("api", "T-0001", "S-0001"),
            serde_json::json!({}),
            vec![manifest.display().to_string()],
        )
        .unwrap();
        let report = replay_check(&layout, &log).unwrap();
        assert!(report.ok(), "violations: {:?}", report.violations);
    }
}
