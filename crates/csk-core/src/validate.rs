//! Structural validator, independent of the event log: schema-checks every
//! JSON artifact and cross-checks task status against the artifacts that
//! status implies. Strict mode promotes warnings to failures.

use crate::error::Result;
use crate::io;
use crate::mission;
use crate::paths::Layout;
use crate::profile;
use crate::registry::Registry;
use crate::slices::SlicesDoc;
use crate::task::{self, TaskPaths, TaskState};
use crate::types::{GateKind, SliceStatus, TaskStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub strict: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn validate_all(layout: &Layout, strict: bool) -> Result<ValidationReport> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    if !layout.csk().exists() {
        errors.push("missing .csk directory".to_string());
        return finish(strict, errors, warnings);
    }

    let registry = match Registry::load(layout) {
        Ok(registry) => registry,
        Err(e) => {
            errors.push(format!("registry unreadable: {e}"));
            return finish(strict, errors, warnings);
        }
    };

    let module_ids: Vec<String> = registry.modules.iter().map(|m| m.module_id.clone()).collect();
    for module in &registry.modules {
        if module.initialized && !layout.module_tasks(&module.path).exists() {
            errors.push(format!(
                "initialized module {} missing tasks root",
                module.module_id
            ));
        }
    }

    for mission_id in mission::list_mission_ids(layout)? {
        match mission::mission_load(layout, &mission_id) {
            Ok((mission_doc, milestones, _)) => {
                for module_id in &mission_doc.routing {
                    if !module_ids.contains(module_id) {
                        errors.push(format!(
                            "mission {mission_id} routes to unknown module {module_id}"
                        ));
                    }
                }
                for milestone in &milestones.milestones {
                    for module_id in &milestone.modules {
                        if !module_ids.contains(module_id) {
                            errors.push(format!(
                                "milestone {} of {mission_id} references unknown module {module_id}",
                                milestone.id
                            ));
                        }
                    }
                }
            }
            Err(e) => errors.push(format!("mission {mission_id} unreadable: {e}")),
        }
    }

    for module in &registry.modules {
        for task_id in task::list_task_ids(layout, &module.path)? {
            let paths = TaskPaths::new(layout, &module.path, &task_id);
            validate_task(layout, &paths, &task_id, strict, &mut errors, &mut warnings);
        }
    }

    finish(strict, errors, warnings)
}

fn finish(
    strict: bool,
    mut errors: Vec<String>,
    warnings: Vec<String>,
) -> Result<ValidationReport> {
    if strict {
        errors.extend(warnings.iter().cloned());
    }
    Ok(ValidationReport {
        strict,
        errors,
        warnings: if strict { Vec::new() } else { warnings },
    })
}

fn validate_task(
    layout: &Layout,
    paths: &TaskPaths,
    task_id: &str,
    strict: bool,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let state: TaskState = match io::read_json(&paths.state()) {
        Ok(state) => state,
        Err(e) => {
            errors.push(format!("task {task_id}: unreadable state: {e}"));
            return;
        }
    };
    let status = state.status;

    if !paths.plan().exists() {
        errors.push(format!("task {task_id}: missing plan.md"));
    }
    let slices = match SlicesDoc::load(&paths.slices()) {
        Ok(doc) => doc,
        Err(e) => {
            errors.push(format!("task {task_id}: {e}"));
            return;
        }
    };

    // Slice state must mirror the slice document
    let doc_ids: std::collections::BTreeSet<&str> =
        slices.slices.iter().map(|s| s.slice_id.as_str()).collect();
    let state_ids: std::collections::BTreeSet<&str> =
        state.slices.keys().map(String::as_str).collect();
    if doc_ids != state_ids {
        errors.push(format!(
            "task {task_id}: slice state does not match slices.json"
        ));
    }
    for (slice_id, slice_state) in &state.slices {
        if slice_state.attempts > slice_state.max_attempts {
            errors.push(format!(
                "task {task_id}:{slice_id}: attempts exceed the ceiling"
            ));
        }
    }

    // Artifacts implied by lifecycle position
    let past = |target: TaskStatus| status_rank(status) >= status_rank(target);

    if past(TaskStatus::CriticPassed) && status != TaskStatus::Draft {
        if !paths.critic_report().exists() {
            errors.push(format!("task {task_id}: missing critic_report.json"));
        }
    }
    if past(TaskStatus::Frozen) && status != TaskStatus::Blocked {
        if !paths.freeze().exists() {
            errors.push(format!("task {task_id}: missing freeze.json"));
        } else if let Ok((ok, reason)) = task::freeze_valid(paths) {
            if !ok {
                warnings.push(format!("task {task_id}: freeze invalid ({reason})"));
            }
        }
    }
    if past(TaskStatus::PlanApproved) && status != TaskStatus::Blocked {
        if !paths.plan_approval().exists() {
            errors.push(format!("task {task_id}: missing approvals/plan.json"));
        }
    }
    if past(TaskStatus::ReadyValidated) && status != TaskStatus::Blocked {
        if !paths.ready_proof().exists() {
            errors.push(format!("task {task_id}: missing proofs/ready.json"));
        }
        if !paths.handoff().exists() {
            errors.push(format!("task {task_id}: missing READY/handoff.md"));
        }
        for (slice_id, slice_state) in &state.slices {
            if slice_state.status != SliceStatus::Done {
                errors.push(format!(
                    "task {task_id}:{slice_id}: not done although task is {status}"
                ));
            }
        }
    }
    if past(TaskStatus::ReadyApproved) && status != TaskStatus::Blocked {
        if !paths.ready_approval().exists() {
            errors.push(format!("task {task_id}: missing approvals/ready.json"));
        }
    }
    if past(TaskStatus::RetroDone) && !paths.retro().exists() {
        errors.push(format!("task {task_id}: missing retro.md"));
    }
    if status == TaskStatus::Blocked && state.blocked_reason.is_none() {
        errors.push(format!("task {task_id}: blocked without blocked_reason"));
    }

    // Per-slice proof checks for completed slices
    if strict {
        let merged_profile =
            profile::load_profile(layout, &state.profile_name).unwrap_or_default();
        for slice in &slices.slices {
            let done = state
                .slices
                .get(&slice.slice_id)
                .map(|s| s.status == SliceStatus::Done)
                .unwrap_or(false);
            if !done {
                continue;
            }
            let proof_dir = paths.slice_proofs(&slice.slice_id);
            for gate in &slice.required_gates {
                let proof = proof_dir.join(gate.proof_filename());
                if !proof.exists() {
                    errors.push(format!(
                        "task {task_id}:{}: missing {} proof",
                        slice.slice_id, gate
                    ));
                } else if !proof_passed(&proof) {
                    errors.push(format!(
                        "task {task_id}:{}: {} proof did not pass",
                        slice.slice_id, gate
                    ));
                }
            }
            let needs_e2e = slice.e2e_required
                || slice.requires(GateKind::E2e)
                || merged_profile.e2e_required_default;
            if needs_e2e && !proof_passed(&proof_dir.join("e2e.json")) {
                errors.push(format!(
                    "task {task_id}:{}: e2e required but proof missing or failed",
                    slice.slice_id
                ));
            }
        }
    }
}

fn proof_passed(path: &std::path::Path) -> bool {
    path.exists()
        && io::read_json::<serde_json::Value>(path)
            .map(|v| v["passed"].as_bool().unwrap_or(false))
            .unwrap_or(false)
}

/// Position on the main lifecycle line, for "status implies artifact"
/// checks. Side states map onto the closest main-line position.
fn status_rank(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Draft => 0,
        TaskStatus::CriticPassed => 1,
        TaskStatus::Frozen => 2,
        TaskStatus::PlanApproved => 3,
        TaskStatus::Executing => 4,
        TaskStatus::Blocked => 4,
        TaskStatus::ReadyValidated => 5,
        TaskStatus::ReadyApproved => 6,
        TaskStatus::RetroDone => 7,
        TaskStatus::Closed => 8,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventLog;
    use crate::registry::{module_add, module_init};
    use tempfile::TempDir;

    fn setup_with_task() -> (TempDir, Layout) {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        io::ensure_dir(&layout.csk()).unwrap();
        Registry::new().save(&layout).unwrap();
        module_add(&layout, "api", ".").unwrap();
        module_init(&layout, "api").unwrap();
        let log = EventLog::open(&layout).unwrap();
        task::task_new(&layout, &log, "api", 1, None, "default").unwrap();
        (dir, layout)
    }

    #[test]
    fn fresh_task_validates_clean() {
        let (_dir, layout) = setup_with_task();
        let report = validate_all(&layout, false).unwrap();
        assert!(report.ok(), "errors: {:?}", report.errors);
    }

    #[test]
    fn missing_csk_fails() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        let report = validate_all(&layout, false).unwrap();
        assert!(!report.ok());
    }

    #[test]
    fn status_implies_artifacts() {
        let (_dir, layout) = setup_with_task();
        let paths = TaskPaths::new(&layout, ".", "T-0001");
        let mut state = task::read_state(&paths).unwrap();
        // Claim frozen without a freeze file
        state.status = TaskStatus::Frozen;
        task::write_state(&paths, &mut state).unwrap();

        let report = validate_all(&layout, false).unwrap();
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("missing freeze.json")));
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("missing critic_report.json")));
    }

    #[test]
    fn blocked_without_reason_fails() {
        let (_dir, layout) = setup_with_task();
        let paths = TaskPaths::new(&layout, ".", "T-0001");
        let mut state = task::read_state(&paths).unwrap();
        state.status = TaskStatus::Blocked;
        state.blocked_reason = None;
        // Bypass set_status which clears/validates; write directly
        io::write_json(&paths.state(), &state).unwrap();

        let report = validate_all(&layout, false).unwrap();
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("blocked without blocked_reason")));
    }

    #[test]
    fn strict_promotes_warnings() {
        let (_dir, layout) = setup_with_task();
        let paths = TaskPaths::new(&layout, ".", "T-0001");
        // Forge a frozen state with a stale freeze record
        io::write_json(
            &paths.freeze(),
            &serde_json::json!({
                "task_id": "T-0001",
                "plan_sha256": "0000",
                "slices_sha256": "0000",
                "frozen_at": chrono::Utc::now(),
                "engine_version": "0",
            }),
        )
        .unwrap();
        io::write_json(&paths.critic_report(), &serde_json::json!({"task_id": "T-0001", "p0": 0, "p1": 0, "p2": 0, "p3": 0, "passed": true, "findings": [], "reviewed_at": chrono::Utc::now()})).unwrap();
        let mut state = task::read_state(&paths).unwrap();
        state.status = TaskStatus::Frozen;
        task::write_state(&paths, &mut state).unwrap();

        let lax = validate_all(&layout, false).unwrap();
        assert!(lax.ok());
        assert!(!lax.warnings.is_empty());

        let strict = validate_all(&layout, true).unwrap();
        assert!(!strict.ok());
    }

    #[test]
    fn mission_with_unknown_module_fails() {
        let (_dir, layout) = setup_with_task();
        let mission_dir = layout.mission_dir("M-0001");
        io::write_json(
            &mission_dir.join("mission.json"),
            &serde_json::json!({
                "mission_id": "M-0001",
                "title": "x",
                "routing": ["ghost"],
                "created_at": chrono::Utc::now(),
                "updated_at": chrono::Utc::now(),
            }),
        )
        .unwrap();
        io::write_json(
            &mission_dir.join("milestones.json"),
            &serde_json::json!({"mission_id": "M-0001", "milestones": [], "updated_at": chrono::Utc::now()}),
        )
        .unwrap();
        io::write_json(
            &mission_dir.join("worktrees.json"),
            &serde_json::json!({"mission_id": "M-0001", "module_worktrees": {}, "updated_at": chrono::Utc::now()}),
        )
        .unwrap();

        let report = validate_all(&layout, false).unwrap();
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("unknown module ghost")));
    }
}
