use crate::critic::{self, CriticReport};
use crate::error::{CskError, Result};
use crate::event::{EventLog, EventScope, EventType};
use crate::io;
use crate::paths::Layout;
use crate::profile;
use crate::registry::Registry;
use crate::slices::SlicesDoc;
use crate::types::{next_dense_id, SliceStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

// ---------------------------------------------------------------------------
// TaskState / SliceState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceState {
    pub status: SliceStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_id: Option<String>,
    pub module_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    pub profile_name: String,
    pub max_attempts: u32,
    pub slices: BTreeMap<String, SliceState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TaskPaths
// ---------------------------------------------------------------------------

/// All durable locations of one task, resolved once.
#[derive(Debug, Clone)]
pub struct TaskPaths {
    pub dir: PathBuf,
    pub run_dir: PathBuf,
}

impl TaskPaths {
    pub fn new(layout: &Layout, module_path: &str, task_id: &str) -> Self {
        Self {
            dir: layout.task_dir(module_path, task_id),
            run_dir: layout.task_run_dir(module_path, task_id),
        }
    }

    pub fn state(&self) -> PathBuf {
        self.dir.join("task.json")
    }

    pub fn plan(&self) -> PathBuf {
        self.dir.join("plan.md")
    }

    pub fn slices(&self) -> PathBuf {
        self.dir.join("slices.json")
    }

    pub fn freeze(&self) -> PathBuf {
        self.dir.join("freeze.json")
    }

    pub fn critic_report(&self) -> PathBuf {
        self.dir.join("critic_report.json")
    }

    pub fn plan_approval(&self) -> PathBuf {
        self.dir.join("approvals").join("plan.json")
    }

    pub fn ready_approval(&self) -> PathBuf {
        self.dir.join("approvals").join("ready.json")
    }

    pub fn user_check_approval(&self) -> PathBuf {
        self.dir.join("approvals").join("user_check.json")
    }

    pub fn incidents(&self) -> PathBuf {
        self.dir.join("incidents.jsonl")
    }

    pub fn decisions(&self) -> PathBuf {
        self.dir.join("decisions.jsonl")
    }

    pub fn retro(&self) -> PathBuf {
        self.dir.join("retro.md")
    }

    pub fn proofs(&self) -> PathBuf {
        self.run_dir.join("proofs")
    }

    pub fn slice_proofs(&self, slice_id: &str) -> PathBuf {
        self.proofs().join(slice_id)
    }

    pub fn ready_proof(&self) -> PathBuf {
        self.proofs().join("ready.json")
    }

    pub fn handoff(&self) -> PathBuf {
        self.proofs().join("READY").join("handoff.md")
    }
}

// ---------------------------------------------------------------------------
// Freeze / Approval records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Freeze {
    pub task_id: String,
    pub plan_sha256: String,
    pub slices_sha256: String,
    pub frozen_at: DateTime<Utc>,
    pub engine_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Plan,
    Ready,
    UserCheck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Approval {
    pub kind: ApprovalKind,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// State persistence
// ---------------------------------------------------------------------------

pub fn read_state(paths: &TaskPaths) -> Result<TaskState> {
    let path = paths.state();
    if !path.exists() {
        return Err(CskError::TaskNotFound(
            paths
                .dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ));
    }
    io::read_json(&path)
}

pub fn write_state(paths: &TaskPaths, state: &mut TaskState) -> Result<()> {
    state.updated_at = Utc::now();
    io::write_json(&paths.state(), state)
}

/// Transition the task to `to` after checking the lifecycle graph.
pub fn set_status(paths: &TaskPaths, state: &mut TaskState, to: TaskStatus) -> Result<()> {
    if !state.status.can_transition_to(to) {
        return Err(CskError::InvalidTransition {
            from: state.status.to_string(),
            to: to.to_string(),
        });
    }
    state.status = to;
    if to != TaskStatus::Blocked {
        state.blocked_reason = None;
    }
    write_state(paths, state)
}

pub fn mark_blocked(paths: &TaskPaths, state: &mut TaskState, reason: &str) -> Result<()> {
    if !state.status.can_transition_to(TaskStatus::Blocked) {
        return Err(CskError::InvalidTransition {
            from: state.status.to_string(),
            to: TaskStatus::Blocked.to_string(),
        });
    }
    state.status = TaskStatus::Blocked;
    state.blocked_reason = Some(reason.to_string());
    write_state(paths, state)
}

// ---------------------------------------------------------------------------
// Freeze hashing
// ---------------------------------------------------------------------------

/// Current content hashes of `plan.md` (byte-exact) and `slices.json`
/// (canonical JSON form, so formatting-only edits do not count as drift).
pub fn plan_hashes(paths: &TaskPaths) -> Result<(String, String)> {
    let plan_bytes = std::fs::read(paths.plan())?;
    let plan_hash = io::sha256_hex(&plan_bytes);

    let slices_value: serde_json::Value = io::read_json(&paths.slices())?;
    let canonical = io::canonical_json(&slices_value)?;
    let slices_hash = io::sha256_hex(canonical.as_bytes());

    Ok((plan_hash, slices_hash))
}

/// Check the freeze record against the current plan/slices content.
pub fn freeze_valid(paths: &TaskPaths) -> Result<(bool, String)> {
    let freeze_path = paths.freeze();
    if !freeze_path.exists() {
        return Ok((false, "missing freeze".to_string()));
    }
    let freeze: Freeze = io::read_json(&freeze_path)?;
    let (plan_hash, slices_hash) = plan_hashes(paths)?;
    if freeze.plan_sha256 != plan_hash {
        return Ok((false, "plan drift".to_string()));
    }
    if freeze.slices_sha256 != slices_hash {
        return Ok((false, "slices drift".to_string()));
    }
    Ok((true, "ok".to_string()))
}

/// Drift guard used before any slice operation. On mismatch the task rolls
/// back to `critic_passed`, forcing re-freeze and re-approval.
pub fn ensure_no_drift(paths: &TaskPaths, state: &mut TaskState) -> Result<()> {
    let (ok, reason) = freeze_valid(paths)?;
    if ok {
        return Ok(());
    }
    if state.status.can_transition_to(TaskStatus::CriticPassed) {
        set_status(paths, state, TaskStatus::CriticPassed)?;
    }
    Err(CskError::PlanDrift {
        task_id: state.task_id.clone(),
        reason,
    })
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

pub struct TaskNewOutcome {
    pub task_id: String,
    pub module_path: String,
    pub paths: TaskPaths,
}

const PLAN_TEMPLATE: &str = "## Goal\n- TODO\n\n## Non-goals\n- TODO\n\n## Acceptance\n- TODO\n\n## Slices\n";

/// Create a task with `slice_count` stub slices in `draft`.
/// Emits `task.created` plus one `slice.created` per slice.
pub fn task_new(
    layout: &Layout,
    log: &EventLog,
    module_id: &str,
    slice_count: usize,
    mission_id: Option<&str>,
    profile_name: &str,
) -> Result<TaskNewOutcome> {
    if slice_count == 0 {
        return Err(CskError::SchemaViolation {
            path: "slice_count".to_string(),
            reason: "must be > 0".to_string(),
        });
    }
    let registry = Registry::load(layout)?;
    let module = registry.module(module_id)?.clone();

    let tasks_dir = layout.module_tasks(&module.path);
    io::ensure_dir(&tasks_dir)?;
    let task_id = next_dense_id('T', &tasks_dir);
    let paths = TaskPaths::new(layout, &module.path, &task_id);

    io::ensure_dir(&paths.dir.join("approvals"))?;
    io::ensure_dir(&paths.proofs())?;
    io::ensure_dir(&paths.run_dir.join("logs"))?;
    io::write_if_missing(&paths.incidents(), b"")?;
    io::write_if_missing(&paths.decisions(), b"")?;

    let mut plan = format!("# Plan for {task_id}\n\n{PLAN_TEMPLATE}");
    let doc = SlicesDoc::stub(slice_count);
    for slice in &doc.slices {
        plan.push_str(&format!("- {}\n", slice.slice_id));
    }
    io::atomic_write(&paths.plan(), plan.as_bytes())?;
    doc.save(&paths.slices())?;

    let now = Utc::now();
    let mut state = TaskState {
        task_id: task_id.clone(),
        mission_id: mission_id.map(|s| s.to_string()),
        module_id: module_id.to_string(),
        status: TaskStatus::Draft,
        blocked_reason: None,
        profile_name: profile_name.to_string(),
        max_attempts: DEFAULT_MAX_ATTEMPTS,
        slices: doc
            .slices
            .iter()
            .map(|s| {
                (
                    s.slice_id.clone(),
                    SliceState {
                        status: SliceStatus::Pending,
                        attempts: 0,
                        max_attempts: DEFAULT_MAX_ATTEMPTS,
                        last_error: None,
                    },
                )
            })
            .collect(),
        created_at: now,
        updated_at: now,
    };
    write_state(&paths, &mut state)?;

    log.append(
        EventType::TaskCreated,
        "engine",
        EventScope::task(module_id, &task_id),
        serde_json::json!({"task_id": task_id, "module_id": module_id, "module_path": module.path}),
        vec![
            paths.plan().display().to_string(),
            paths.slices().display().to_string(),
        ],
    )?;
    for slice in &doc.slices {
        log.append(
            EventType::SliceCreated,
            "engine",
            EventScope::slice(module_id, &task_id, &slice.slice_id),
            serde_json::json!({
                "slice_id": slice.slice_id,
                "required_gates": slice.required_gates,
            }),
            vec![paths.slices().display().to_string()],
        )?;
    }

    Ok(TaskNewOutcome {
        task_id,
        module_path: module.path,
        paths,
    })
}

/// Run the structural critic, persist `critic_report.json`, and transition
/// to `critic_passed` when no P0/P1 findings remain.
pub fn task_critic(layout: &Layout, log: &EventLog, paths: &TaskPaths) -> Result<CriticReport> {
    let mut state = read_state(paths)?;
    let plan = std::fs::read_to_string(paths.plan())?;
    let slices = SlicesDoc::load_lenient(&paths.slices())?;
    let merged_profile = profile::load_profile(layout, &state.profile_name)?;

    let report = critic::run_critic(&state.task_id, &plan, &slices, &merged_profile);
    io::write_json(&paths.critic_report(), &report)?;

    let event_type = if report.passed {
        EventType::TaskCriticPassed
    } else {
        EventType::TaskCriticFailed
    };
    log.append(
        event_type,
        "engine",
        EventScope::task(&state.module_id, &state.task_id),
        serde_json::json!({
            "p0": report.p0, "p1": report.p1, "p2": report.p2, "p3": report.p3,
            "passed": report.passed,
        }),
        vec![paths.critic_report().display().to_string()],
    )?;

    if report.passed {
        set_status(paths, &mut state, TaskStatus::CriticPassed)?;
    }
    Ok(report)
}

/// Pin the approved plan content. Requires `critic_passed`.
pub fn task_freeze(layout: &Layout, log: &EventLog, paths: &TaskPaths) -> Result<Freeze> {
    let mut state = read_state(paths)?;
    if state.status != TaskStatus::CriticPassed {
        return Err(CskError::CriticNotPassed(state.task_id.clone()));
    }

    let (plan_sha256, slices_sha256) = plan_hashes(paths)?;
    let engine_version = std::fs::read_to_string(layout.engine_version_file())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let freeze = Freeze {
        task_id: state.task_id.clone(),
        plan_sha256,
        slices_sha256,
        frozen_at: Utc::now(),
        engine_version,
    };
    io::write_json(&paths.freeze(), &freeze)?;

    log.append(
        EventType::TaskFrozen,
        "engine",
        EventScope::task(&state.module_id, &state.task_id),
        serde_json::to_value(&freeze)?,
        vec![paths.freeze().display().to_string()],
    )?;
    set_status(paths, &mut state, TaskStatus::Frozen)?;
    Ok(freeze)
}

/// Record the plan approval. Requires `frozen` and an intact freeze.
pub fn task_approve_plan(
    log: &EventLog,
    paths: &TaskPaths,
    approved_by: &str,
) -> Result<Approval> {
    let mut state = read_state(paths)?;
    if state.status != TaskStatus::Frozen {
        return Err(CskError::InvalidTransition {
            from: state.status.to_string(),
            to: TaskStatus::PlanApproved.to_string(),
        });
    }
    let (ok, reason) = freeze_valid(paths)?;
    if !ok {
        return Err(CskError::PlanDrift {
            task_id: state.task_id.clone(),
            reason,
        });
    }

    let approval = Approval {
        kind: ApprovalKind::Plan,
        approved_by: approved_by.to_string(),
        approved_at: Utc::now(),
    };
    io::write_json(&paths.plan_approval(), &approval)?;
    log.append(
        EventType::TaskPlanApproved,
        approved_by,
        EventScope::task(&state.module_id, &state.task_id),
        serde_json::to_value(&approval)?,
        vec![paths.plan_approval().display().to_string()],
    )?;
    set_status(paths, &mut state, TaskStatus::PlanApproved)?;
    Ok(approval)
}

/// Record a user-check approval; consumed by the READY gate when the
/// profile demands it. Valid any time before `ready.validated`.
pub fn task_approve_user_check(paths: &TaskPaths, approved_by: &str) -> Result<Approval> {
    let _ = read_state(paths)?;
    let approval = Approval {
        kind: ApprovalKind::UserCheck,
        approved_by: approved_by.to_string(),
        approved_at: Utc::now(),
    };
    io::write_json(&paths.user_check_approval(), &approval)?;
    Ok(approval)
}

/// Append a decision row to the task's decision journal.
pub fn add_decision(
    paths: &TaskPaths,
    decision: &str,
    rationale: &str,
    decided_by: &str,
) -> Result<()> {
    io::append_jsonl(
        &paths.decisions(),
        &serde_json::json!({
            "decision": decision,
            "rationale": rationale,
            "decided_by": decided_by,
            "decided_at": Utc::now(),
        }),
    )
}

/// List all task ids of a module, oldest first.
pub fn list_task_ids(layout: &Layout, module_path: &str) -> Result<Vec<String>> {
    let tasks_dir = layout.module_tasks(module_path);
    if !tasks_dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids: Vec<String> = std::fs::read_dir(&tasks_dir)?
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("T-"))
        .collect();
    ids.sort();
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
