//! Status projection: a pure function from disk state + event log to the
//! current view and a single deterministic `next` action.

use crate::envelope::NextAction;
use crate::error::Result;
use crate::event::{Event, EventFilter, EventLog};
use crate::paths::Layout;
use crate::registry::Registry;
use crate::skills::{self, SkillsSync};
use crate::slices::{self, SlicesDoc};
use crate::task::{self, TaskPaths, TaskState};
use crate::types::{ModulePhase, ProjectPhase, SliceStatus, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Projection records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleProjection {
    pub module_id: String,
    pub path: String,
    pub initialized: bool,
    pub phase: ModulePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task_status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task_updated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_slice_id: Option<String>,
    pub slices_done: usize,
    pub slices_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counters {
    pub tasks_by_status: BTreeMap<String, usize>,
    pub proofs_total: usize,
    pub retro_total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusProjection {
    pub project_phase: ProjectPhase,
    pub bootstrapped: bool,
    pub skills: SkillsSync,
    pub modules: Vec<ModuleProjection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_module_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_slice_id: Option<String>,
    pub counters: Counters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_event: Option<Event>,
    pub next: NextAction,
}

// ---------------------------------------------------------------------------
// Building blocks
// ---------------------------------------------------------------------------

pub fn bootstrapped(layout: &Layout) -> bool {
    layout.engine().exists() && layout.local().exists() && layout.registry().exists()
}

fn collect_task_states(layout: &Layout, module_path: &str) -> Vec<TaskState> {
    let Ok(ids) = task::list_task_ids(layout, module_path) else {
        return Vec::new();
    };
    let mut states: Vec<TaskState> = ids
        .iter()
        .filter_map(|task_id| {
            let paths = TaskPaths::new(layout, module_path, task_id);
            task::read_state(&paths).ok()
        })
        .collect();
    // Most recently updated first
    states.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.task_id.cmp(&a.task_id)));
    states
}

/// The module's active task: the most recent task that is still open, else
/// none at all.
fn active_task(states: &[TaskState]) -> Option<&TaskState> {
    states
        .iter()
        .find(|s| !matches!(s.status, TaskStatus::Closed | TaskStatus::RetroDone))
}

fn project_module(layout: &Layout, module_id: &str, path: &str, initialized: bool) -> ModuleProjection {
    let states = collect_task_states(layout, path);
    let active = active_task(&states);

    let (phase, active_task_id, active_task_status, updated_at, blocked_reason) = match active {
        Some(state) => (
            ModulePhase::from_task_status(state.status),
            Some(state.task_id.clone()),
            Some(state.status),
            Some(state.updated_at),
            state.blocked_reason.clone(),
        ),
        None => (ModulePhase::Idle, None, None, None, None),
    };

    let (active_slice_id, slices_done, slices_total) = match active {
        Some(state) => {
            let statuses: BTreeMap<String, SliceStatus> = state
                .slices
                .iter()
                .map(|(id, s)| (id.clone(), s.status))
                .collect();
            let done = statuses
                .values()
                .filter(|s| **s == SliceStatus::Done)
                .count();
            let total = statuses.len();
            let paths = TaskPaths::new(layout, path, &state.task_id);
            let active_slice = SlicesDoc::load_lenient(&paths.slices())
                .ok()
                .and_then(|doc| {
                    slices::active_slice(&doc, &statuses).map(|s| s.slice_id.clone())
                });
            (active_slice, done, total)
        }
        None => (None, 0, 0),
    };

    ModuleProjection {
        module_id: module_id.to_string(),
        path: path.to_string(),
        initialized,
        phase,
        active_task_id,
        active_task_status,
        active_task_updated_at: updated_at,
        active_slice_id,
        slices_done,
        slices_total,
        blocked_reason,
    }
}

/// Deterministic active-module choice: highest phase priority, most recent
/// `updated_at`, then lexical module id.
fn choose_active_module<'a>(modules: &'a [ModuleProjection]) -> Option<&'a ModuleProjection> {
    modules
        .iter()
        .filter(|m| m.phase != ModulePhase::Idle && m.phase != ModulePhase::Closed)
        .min_by(|a, b| {
            a.phase
                .priority()
                .cmp(&b.phase.priority())
                .then_with(|| b.active_task_updated_at.cmp(&a.active_task_updated_at))
                .then_with(|| a.module_id.cmp(&b.module_id))
        })
}

fn count_proofs(layout: &Layout, registry: &Registry) -> usize {
    let mut total = 0;
    for module in &registry.modules {
        let run_root = layout.module_run(&module.path).join("tasks");
        total += count_files_named(&run_root, "manifest.json");
    }
    total
}

fn count_files_named(root: &std::path::Path, name: &str) -> usize {
    let mut count = 0;
    let Ok(entries) = std::fs::read_dir(root) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            count += count_files_named(&path, name);
        } else if entry.file_name().to_string_lossy() == name {
            count += 1;
        }
    }
    count
}

fn count_retros(layout: &Layout, registry: &Registry) -> usize {
    let mut total = 0;
    for module in &registry.modules {
        for task_id in task::list_task_ids(layout, &module.path).unwrap_or_default() {
            if TaskPaths::new(layout, &module.path, &task_id).retro().exists() {
                total += 1;
            }
        }
    }
    total
}

fn project_phase(active: Option<&ModuleProjection>) -> ProjectPhase {
    match active.map(|m| m.phase) {
        None => ProjectPhase::Idle,
        Some(ModulePhase::Blocked) => ProjectPhase::Blocked,
        Some(ModulePhase::ReadyValidated) => ProjectPhase::ReadyValidated,
        Some(ModulePhase::RetroRequired) => ProjectPhase::RetroRequired,
        Some(ModulePhase::Executing) => ProjectPhase::Executing,
        Some(ModulePhase::PlanFrozen) | Some(ModulePhase::Planning) => ProjectPhase::Planning,
        Some(ModulePhase::Idle) | Some(ModulePhase::RetroDone) | Some(ModulePhase::Closed) => {
            ProjectPhase::Idle
        }
    }
}

// ---------------------------------------------------------------------------
// Next routing
// ---------------------------------------------------------------------------

/// Top match wins. Categories in spec order: bootstrap, skills, plan
/// approval, ready approval, retro, run.
fn route_next(
    is_bootstrapped: bool,
    skills_sync: &SkillsSync,
    modules: &[ModuleProjection],
) -> NextAction {
    if !is_bootstrapped {
        return NextAction::new("csk bootstrap").with_alternatives(["csk status --json"]);
    }
    if !skills_sync.in_sync {
        return NextAction::new("csk skills generate").with_alternatives(["csk status --json"]);
    }

    let find = |phases: &[ModulePhase]| {
        modules
            .iter()
            .filter(|m| phases.contains(&m.phase) && m.active_task_id.is_some())
            .min_by(|a, b| {
                a.phase
                    .priority()
                    .cmp(&b.phase.priority())
                    .then_with(|| b.active_task_updated_at.cmp(&a.active_task_updated_at))
                    .then_with(|| a.module_id.cmp(&b.module_id))
            })
    };

    if let Some(m) = find(&[ModulePhase::PlanFrozen]) {
        let task_id = m.active_task_id.as_deref().unwrap_or_default();
        return NextAction::new(format!(
            "csk task approve --module-id {} --task-id {task_id} --approved-by <name>",
            m.module_id
        ))
        .with_alternatives([format!("csk task status --module-id {} --task-id {task_id}", m.module_id)]);
    }
    if let Some(m) = find(&[ModulePhase::ReadyValidated]) {
        let task_id = m.active_task_id.as_deref().unwrap_or_default();
        return NextAction::new(format!(
            "csk gate approve-ready --module-id {} --task-id {task_id} --approved-by <name>",
            m.module_id
        ))
        .with_alternatives(["csk status --json".to_string()]);
    }
    if let Some(m) = find(&[ModulePhase::RetroRequired, ModulePhase::Blocked]) {
        let task_id = m.active_task_id.as_deref().unwrap_or_default();
        return NextAction::new(format!(
            "csk retro run --module-id {} --task-id {task_id}",
            m.module_id
        ))
        .with_alternatives(["csk status --json".to_string()]);
    }
    if let Some(m) = find(&[ModulePhase::Executing]) {
        let task_id = m.active_task_id.as_deref().unwrap_or_default();
        if let Some(slice_id) = &m.active_slice_id {
            return NextAction::new(format!(
                "csk slice run --module-id {} --task-id {task_id} --slice-id {slice_id}",
                m.module_id
            ))
            .with_alternatives([format!(
                "csk gate validate-ready --module-id {} --task-id {task_id}",
                m.module_id
            )]);
        }
        return NextAction::new(format!(
            "csk gate validate-ready --module-id {} --task-id {task_id}",
            m.module_id
        ))
        .with_alternatives(["csk status --json".to_string()]);
    }
    if let Some(m) = find(&[ModulePhase::Planning]) {
        let task_id = m.active_task_id.as_deref().unwrap_or_default();
        let recommended = match m.active_task_status {
            Some(TaskStatus::CriticPassed) => format!(
                "csk task freeze --module-id {} --task-id {task_id}",
                m.module_id
            ),
            _ => format!(
                "csk task critic --module-id {} --task-id {task_id}",
                m.module_id
            ),
        };
        return NextAction::new(recommended).with_alternatives(["csk status --json".to_string()]);
    }

    NextAction::new("csk task new --module-id <id> --slices 1")
        .with_alternatives(["csk module add <id> <path>", "csk status --json"])
}

// ---------------------------------------------------------------------------
// project_status
// ---------------------------------------------------------------------------

pub fn project_status(layout: &Layout, log: Option<&EventLog>) -> Result<StatusProjection> {
    let is_bootstrapped = bootstrapped(layout);
    if !is_bootstrapped {
        return Ok(StatusProjection {
            project_phase: ProjectPhase::NotBootstrapped,
            bootstrapped: false,
            skills: SkillsSync {
                in_sync: false,
                reason: Some("not bootstrapped".to_string()),
            },
            modules: Vec::new(),
            active_module_id: None,
            active_task_id: None,
            active_slice_id: None,
            counters: Counters {
                tasks_by_status: BTreeMap::new(),
                proofs_total: 0,
                retro_total: 0,
            },
            latest_event: None,
            next: NextAction::new("csk bootstrap").with_alternatives(["csk status --json"]),
        });
    }

    let registry = Registry::load(layout)?;
    let skills_sync = skills::check_sync(layout)?;
    let modules: Vec<ModuleProjection> = registry
        .modules
        .iter()
        .map(|m| project_module(layout, &m.module_id, &m.path, m.initialized))
        .collect();

    let mut tasks_by_status: BTreeMap<String, usize> = BTreeMap::new();
    for module in &registry.modules {
        for state in collect_task_states(layout, &module.path) {
            *tasks_by_status.entry(state.status.to_string()).or_insert(0) += 1;
        }
    }

    let active = choose_active_module(&modules);
    let phase = project_phase(active);
    let next = route_next(true, &skills_sync, &modules);

    let latest_event = match log {
        Some(log) => log.tail(&EventFilter::default(), 1)?.into_iter().next(),
        None => None,
    };

    Ok(StatusProjection {
        project_phase: phase,
        bootstrapped: true,
        skills: skills_sync,
        active_module_id: active.map(|m| m.module_id.clone()),
        active_task_id: active.and_then(|m| m.active_task_id.clone()),
        active_slice_id: active.and_then(|m| m.active_slice_id.clone()),
        counters: Counters {
            tasks_by_status,
            proofs_total: count_proofs(layout, &registry),
            retro_total: count_retros(layout, &registry),
        },
        modules,
        latest_event,
        next,
    })
}

/// Convenience: proof manifest count used by tests and reports.
pub fn proofs_total(layout: &Layout) -> Result<usize> {
    let registry = Registry::load(layout)?;
    Ok(count_proofs(layout, &registry))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io;
    use crate::registry::{module_add, module_init};
    use tempfile::TempDir;

    fn bootstrap_min(layout: &Layout) {
        io::atomic_write(&layout.engine_version_file(), b"0.4.0\n").unwrap();
        io::ensure_dir(&layout.local()).unwrap();
        Registry::new().save(layout).unwrap();
        skills::generate(layout).unwrap();
    }

    #[test]
    fn not_bootstrapped_routes_to_bootstrap() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        let projection = project_status(&layout, None).unwrap();
        assert_eq!(projection.project_phase, ProjectPhase::NotBootstrapped);
        assert_eq!(projection.next.recommended, "csk bootstrap");
    }

    #[test]
    fn skills_drift_routes_to_generate() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        bootstrap_min(&layout);
        io::atomic_write(&layout.engine_version_file(), b"9.9.9\n").unwrap();
        let projection = project_status(&layout, None).unwrap();
        assert_eq!(projection.next.recommended, "csk skills generate");
    }

    #[test]
    fn idle_project_routes_to_task_new() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        bootstrap_min(&layout);
        module_add(&layout, "api", ".").unwrap();
        let projection = project_status(&layout, None).unwrap();
        assert_eq!(projection.project_phase, ProjectPhase::Idle);
        assert!(projection.next.recommended.starts_with("csk task new"));
    }

    #[test]
    fn planning_task_routes_to_critic_then_freeze() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        bootstrap_min(&layout);
        module_add(&layout, "api", ".").unwrap();
        module_init(&layout, "api").unwrap();
        let log = EventLog::open(&layout).unwrap();
        task::task_new(&layout, &log, "api", 1, None, "default").unwrap();

        let projection = project_status(&layout, Some(&log)).unwrap();
        assert_eq!(projection.project_phase, ProjectPhase::Planning);
        assert_eq!(projection.active_task_id.as_deref(), Some("T-0001"));
        assert!(projection.next.recommended.contains("task critic"));
        assert_eq!(projection.active_slice_id.as_deref(), Some("S-0001"));
        assert_eq!(projection.counters.tasks_by_status["draft"], 1);
    }

    #[test]
    fn frozen_task_routes_to_plan_approval() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        bootstrap_min(&layout);
        module_add(&layout, "api", ".").unwrap();
        module_init(&layout, "api").unwrap();
        let log = EventLog::open(&layout).unwrap();
        let outcome = task::task_new(&layout, &log, "api", 1, None, "default").unwrap();
        let mut state = task::read_state(&outcome.paths).unwrap();
        state.status = TaskStatus::Frozen;
        task::write_state(&outcome.paths, &mut state).unwrap();

        let projection = project_status(&layout, Some(&log)).unwrap();
        assert!(projection.next.recommended.contains("task approve"));
    }

    #[test]
    fn blocked_beats_executing_for_active_module() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        bootstrap_min(&layout);
        module_add(&layout, "api", "api").unwrap();
        module_init(&layout, "api").unwrap();
        module_add(&layout, "web", "web").unwrap();
        module_init(&layout, "web").unwrap();
        let log = EventLog::open(&layout).unwrap();

        task::task_new(&layout, &log, "api", 1, None, "default").unwrap();
        let web_task = task::task_new(&layout, &log, "web", 1, None, "default").unwrap();
        let mut state = task::read_state(&web_task.paths).unwrap();
        state.status = TaskStatus::Blocked;
        state.blocked_reason = Some("max attempts exceeded".to_string());
        task::write_state(&web_task.paths, &mut state).unwrap();

        let projection = project_status(&layout, Some(&log)).unwrap();
        assert_eq!(projection.project_phase, ProjectPhase::Blocked);
        assert_eq!(projection.active_module_id.as_deref(), Some("web"));
        assert!(projection.next.recommended.contains("retro run"));
    }
}
