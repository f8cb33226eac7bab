use crate::error::{CskError, Result};
use crate::event::{EventLog, EventScope, EventType};
use crate::gate::scope::ScopeProof;
use crate::gate::verify::VerifyProof;
use crate::io;
use crate::profile::Profile;
use crate::slices::SlicesDoc;
use crate::task::{self, Approval, ApprovalKind, TaskPaths};
use crate::types::{GateKind, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// ReadyProof
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyProof {
    pub task_id: String,
    pub passed: bool,
    pub checks: Vec<ReadyCheck>,
    pub checked_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// validate_ready
// ---------------------------------------------------------------------------

/// Validate the READY prerequisites in fixed order, write `ready.json`, and
/// on success write the human handoff and transition to `ready_validated`.
///
/// Failures return `ready_prerequisites_missing` with every unmet item; the
/// proof still records the full check list for audit, and no
/// `ready.validated` event is emitted.
pub fn validate_ready(
    log: &EventLog,
    paths: &TaskPaths,
    profile: &Profile,
) -> Result<ReadyProof> {
    let mut state = task::read_state(paths)?;
    let slices = SlicesDoc::load(&paths.slices())?;

    let mut checks: Vec<ReadyCheck> = Vec::new();
    let mut missing: Vec<String> = Vec::new();

    // 1. freeze exists and matches current content
    let (freeze_ok, freeze_reason) = task::freeze_valid(paths)?;
    checks.push(ReadyCheck {
        name: "freeze_valid".to_string(),
        passed: freeze_ok,
        detail: Some(freeze_reason.clone()),
    });
    if !freeze_ok {
        missing.push(format!("freeze: {freeze_reason}"));
    }

    // 2. plan approval
    let plan_approved = paths.plan_approval().exists();
    checks.push(ReadyCheck {
        name: "plan_approval_exists".to_string(),
        passed: plan_approved,
        detail: None,
    });
    if !plan_approved {
        missing.push("approvals/plan.json".to_string());
    }

    // 3. per-slice proofs for every required gate
    // 4. verify coverage across the task
    let mut verify_executed_total = 0usize;
    for slice in &slices.slices {
        let proof_dir = paths.slice_proofs(&slice.slice_id);
        let mut slice_ok = true;
        for gate in &slice.required_gates {
            let proof_path = proof_dir.join(gate.proof_filename());
            let passed = proof_passed(&proof_path);
            if !passed {
                slice_ok = false;
            }
            if *gate == GateKind::Verify {
                if let Ok(verify) = io::read_json::<VerifyProof>(&proof_path) {
                    verify_executed_total += verify.executed_count;
                }
            }
        }
        checks.push(ReadyCheck {
            name: format!("slice_proofs:{}", slice.slice_id),
            passed: slice_ok,
            detail: None,
        });
        if !slice_ok {
            missing.push(slice.slice_id.clone());
        }
    }

    let coverage_ok = verify_executed_total > 0;
    checks.push(ReadyCheck {
        name: "verify_coverage".to_string(),
        passed: coverage_ok,
        detail: Some(format!("executed_count={verify_executed_total}")),
    });
    if !coverage_ok {
        missing.push("verify coverage (no commands executed)".to_string());
    }

    // 5. user check, when the profile demands one
    if profile.user_check_required {
        let user_check_ok = paths.user_check_approval().exists();
        checks.push(ReadyCheck {
            name: "user_check_recorded".to_string(),
            passed: user_check_ok,
            detail: None,
        });
        if !user_check_ok {
            missing.push("approvals/user_check.json".to_string());
        }
    }

    // 6. e2e proof for every slice that required it
    for slice in &slices.slices {
        let needs_e2e = slice.e2e_required
            || slice.requires(GateKind::E2e)
            || profile.e2e_required_default;
        if !needs_e2e {
            continue;
        }
        let proof_path = paths.slice_proofs(&slice.slice_id).join("e2e.json");
        let passed = proof_passed(&proof_path);
        checks.push(ReadyCheck {
            name: format!("e2e:{}", slice.slice_id),
            passed,
            detail: None,
        });
        if !passed {
            missing.push(format!("e2e proof for {}", slice.slice_id));
        }
    }

    let proof = ReadyProof {
        task_id: state.task_id.clone(),
        passed: missing.is_empty(),
        checks,
        checked_at: Utc::now(),
    };
    io::write_json(&paths.ready_proof(), &proof)?;

    if !proof.passed {
        return Err(CskError::ReadyPrerequisitesMissing {
            task_id: state.task_id.clone(),
            missing,
        });
    }

    write_handoff(paths, &slices)?;
    log.append(
        EventType::ReadyValidated,
        "engine",
        EventScope::task(&state.module_id, &state.task_id),
        serde_json::json!({"task_id": state.task_id, "passed": true}),
        vec![
            paths.ready_proof().display().to_string(),
            paths.handoff().display().to_string(),
        ],
    )?;
    task::set_status(paths, &mut state, TaskStatus::ReadyValidated)?;
    Ok(proof)
}

fn proof_passed(path: &std::path::Path) -> bool {
    if !path.exists() {
        return false;
    }
    io::read_json::<serde_json::Value>(path)
        .map(|v| v["passed"].as_bool().unwrap_or(false))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Handoff
// ---------------------------------------------------------------------------

/// `READY/handoff.md`: changed files deduplicated across slices, verify
/// commands that actually ran, and smoke steps derived from plan headings.
fn write_handoff(paths: &TaskPaths, slices: &SlicesDoc) -> Result<()> {
    let mut changed: BTreeSet<String> = BTreeSet::new();
    let mut commands: BTreeSet<String> = BTreeSet::new();
    for slice in &slices.slices {
        let proof_dir = paths.slice_proofs(&slice.slice_id);
        if let Ok(scope) = io::read_json::<ScopeProof>(&proof_dir.join("scope.json")) {
            changed.extend(scope.changed_files);
        }
        if let Ok(verify) = io::read_json::<VerifyProof>(&proof_dir.join("verify.json")) {
            for command in verify.commands {
                commands.insert(command.argv.join(" "));
            }
        }
    }

    let plan = std::fs::read_to_string(paths.plan()).unwrap_or_default();
    let smoke_steps: Vec<String> = plan
        .lines()
        .filter(|line| line.trim_start().starts_with("##"))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|h| !h.is_empty())
        .map(|h| format!("Walk through '{h}' and confirm the described behavior."))
        .collect();

    let task_id = paths
        .dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut lines = vec![format!("# READY handoff for {task_id}"), String::new()];
    lines.push("## Changed files".to_string());
    if changed.is_empty() {
        lines.push("- (none recorded)".to_string());
    }
    for path in &changed {
        lines.push(format!("- {path}"));
    }
    lines.push(String::new());
    lines.push("## Verify commands that ran".to_string());
    if commands.is_empty() {
        lines.push("- (none)".to_string());
    }
    for command in &commands {
        lines.push(format!("- `{command}`"));
    }
    lines.push(String::new());
    lines.push("## Smoke checks".to_string());
    if smoke_steps.is_empty() {
        lines.push("- Run the primary user flow described in the plan.".to_string());
    }
    for step in &smoke_steps {
        lines.push(format!("- {step}"));
    }
    lines.push(String::new());
    lines.push(format!("Generated at: {}", Utc::now().to_rfc3339()));

    io::atomic_write(&paths.handoff(), (lines.join("\n") + "\n").as_bytes())
}

// ---------------------------------------------------------------------------
// approve_ready
// ---------------------------------------------------------------------------

/// Record the ready approval. Requires `ready_validated`.
pub fn approve_ready(log: &EventLog, paths: &TaskPaths, approved_by: &str) -> Result<Approval> {
    let mut state = task::read_state(paths)?;
    if state.status != TaskStatus::ReadyValidated {
        return Err(CskError::InvalidTransition {
            from: state.status.to_string(),
            to: TaskStatus::ReadyApproved.to_string(),
        });
    }

    let approval = Approval {
        kind: ApprovalKind::Ready,
        approved_by: approved_by.to_string(),
        approved_at: Utc::now(),
    };
    io::write_json(&paths.ready_approval(), &approval)?;
    log.append(
        EventType::ReadyApproved,
        approved_by,
        EventScope::task(&state.module_id, &state.task_id),
        serde_json::to_value(&approval)?,
        vec![
            paths.ready_approval().display().to_string(),
            paths.ready_proof().display().to_string(),
        ],
    )?;
    task::set_status(paths, &mut state, TaskStatus::ReadyApproved)?;
    Ok(approval)
}
