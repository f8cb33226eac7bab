//! Slice execution pipeline: implement → scope → verify → review → e2e →
//! proof pack. Gates run in that fixed order; the first non-pass stops the
//! pipeline, records an incident, and leaves the slice unadvanced. The
//! manifest is written last, and only after every required gate passed.

use crate::error::{CskError, Result};
use crate::event::{EventLog, EventScope, EventType};
use crate::gate;
use crate::incident::{record_incident, Incident, IncidentKind};
use crate::io;
use crate::paths::Layout;
use crate::profile::{self, CommandCwd, Profile};
use crate::registry::Registry;
use crate::runner;
use crate::slices::{SliceSpec, SlicesDoc};
use crate::snapshot;
use crate::task::{self, SliceState, TaskPaths, TaskState};
use crate::types::{GateKind, SliceStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const IMPLEMENT_TIMEOUT_SEC: u64 = 1800;
const DEFAULT_VERIFY_TIMEOUT_SEC: u64 = 300;

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofManifest {
    pub task_id: String,
    pub slice_id: String,
    /// Absolute paths of the sibling proofs, one per gate that ran.
    pub proofs: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// SliceRunOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceRunOutcome {
    pub task_id: String,
    pub slice_id: String,
    pub status: SliceStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_gate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_kind: Option<IncidentKind>,
}

impl SliceRunOutcome {
    pub fn completed(&self) -> bool {
        self.status == SliceStatus::Done
    }
}

// ---------------------------------------------------------------------------
// Review input
// ---------------------------------------------------------------------------

/// Counters recorded by the executor for the review gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewInput {
    pub p0: u32,
    pub p1: u32,
    pub p2: u32,
    pub p3: u32,
}

// ---------------------------------------------------------------------------
// slice_run
// ---------------------------------------------------------------------------

pub struct SliceRunRequest<'a> {
    pub module_id: &'a str,
    pub task_id: &'a str,
    pub slice_id: &'a str,
    pub implement_argv: Option<Vec<String>>,
    pub review: ReviewInput,
    pub review_summary: &'a str,
    pub reviewer: &'a str,
    /// Overrides the module root as the slice workdir (mission worktrees).
    pub workdir: Option<PathBuf>,
}

pub fn slice_run(
    layout: &Layout,
    log: &EventLog,
    request: &SliceRunRequest<'_>,
) -> Result<SliceRunOutcome> {
    let registry = Registry::load(layout)?;
    let module = registry.module(request.module_id)?.clone();
    let paths = TaskPaths::new(layout, &module.path, request.task_id);
    let mut state = task::read_state(&paths)?;

    // Lifecycle preconditions
    if !matches!(
        state.status,
        TaskStatus::PlanApproved | TaskStatus::Executing
    ) {
        return Err(CskError::InvalidTransition {
            from: state.status.to_string(),
            to: TaskStatus::Executing.to_string(),
        });
    }
    if !paths.plan_approval().exists() {
        return Err(CskError::ReadyPrerequisitesMissing {
            task_id: state.task_id.clone(),
            missing: vec!["approvals/plan.json".to_string()],
        });
    }
    task::ensure_no_drift(&paths, &mut state)?;

    let slices = SlicesDoc::load(&paths.slices())?;
    let slice = slices.slice(request.slice_id)?.clone();

    // Dependencies must be done
    for dep in &slice.deps {
        let dep_done = state
            .slices
            .get(dep)
            .map(|s| s.status == SliceStatus::Done)
            .unwrap_or(false);
        if !dep_done {
            return Err(CskError::InvalidTransition {
                from: format!("{}:{} waiting on {dep}", state.task_id, slice.slice_id),
                to: SliceStatus::Running.to_string(),
            });
        }
    }

    let merged_profile = profile::load_profile(layout, &state.profile_name)?;
    let max_attempts = state.max_attempts.max(1);
    let attempts_so_far = state
        .slices
        .get(request.slice_id)
        .map(|s| s.attempts)
        .unwrap_or(0);

    if state.status == TaskStatus::PlanApproved {
        task::set_status(&paths, &mut state, TaskStatus::Executing)?;
    }

    // Retry budget: the attempt that would exceed the ceiling blocks the task.
    if attempts_so_far >= max_attempts {
        return block_for_attempts(layout, log, &paths, &mut state, request, attempts_so_far);
    }
    let attempts = attempts_so_far + 1;

    update_slice(
        &paths,
        &mut state,
        request.slice_id,
        SliceStatus::Running,
        attempts,
        None,
    )?;

    let workdir = request
        .workdir
        .clone()
        .unwrap_or_else(|| layout.module_root(&module.path));
    let pipeline = Pipeline {
        layout,
        log,
        paths: &paths,
        profile: &merged_profile,
        module_id: request.module_id,
        task_id: request.task_id,
        slice: &slice,
        workdir: &workdir,
        attempts,
        max_attempts,
    };
    pipeline.run(&mut state, request)
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

struct Pipeline<'a> {
    layout: &'a Layout,
    log: &'a EventLog,
    paths: &'a TaskPaths,
    profile: &'a Profile,
    module_id: &'a str,
    task_id: &'a str,
    slice: &'a SliceSpec,
    workdir: &'a Path,
    attempts: u32,
    max_attempts: u32,
}

impl Pipeline<'_> {
    fn run(
        &self,
        state: &mut TaskState,
        request: &SliceRunRequest<'_>,
    ) -> Result<SliceRunOutcome> {
        let slice_id = &self.slice.slice_id;
        let proof_dir = self.paths.slice_proofs(slice_id);

        // Snapshot before implement so the scope gate has a fallback when
        // the version-control wrapper is unavailable.
        let before = snapshot::take_snapshot(self.workdir)?;

        if let Some(implement_argv) = &request.implement_argv {
            runner::check_argv(implement_argv)?;
            let log_path = runner::slice_log_path(&self.paths.run_dir, slice_id, "implement");
            let outcome = runner::run_command(
                implement_argv,
                self.workdir,
                Duration::from_secs(IMPLEMENT_TIMEOUT_SEC),
                &log_path,
            )?;
            if !outcome.passed() {
                return self.fail(
                    state,
                    "implement",
                    IncidentKind::ImplementFail,
                    SliceStatus::GateFailed,
                    &format!("implement command exited {}", outcome.exit_code),
                    "Fix the implement command or environment and retry.",
                    false,
                );
            }
        }

        let changed = match snapshot::changed_files_via_git(self.workdir) {
            Some(files) => files,
            None => {
                let after = snapshot::take_snapshot(self.workdir)?;
                snapshot::changed_files(&before, &after)
            }
        };

        // Scope
        let scope_required = self.slice.requires(GateKind::Scope);
        if scope_required && self.slice.allowed_paths.is_empty() {
            return self.fail(
                state,
                "scope",
                IncidentKind::ScopeConfigMissing,
                SliceStatus::GateFailed,
                &format!("scope gate requires allowed_paths for {slice_id}"),
                "Set non-empty allowed_paths in slices.json, then re-run critic, freeze and approval.",
                false,
            );
        }
        let (scope_proof, scope_outcome) = gate::scope::check_scope(
            self.task_id,
            slice_id,
            &proof_dir,
            &changed,
            &self.slice.allowed_paths,
            &self.slice.forbidden_paths,
        )?;
        if scope_required && !scope_outcome.passed {
            return self.fail(
                state,
                "scope",
                IncidentKind::ScopeViolation,
                SliceStatus::Blocked,
                &format!(
                    "out-of-scope changes in {slice_id}: {}",
                    scope_proof.violations.join(", ")
                ),
                "Revert the out-of-scope files or revise the plan and re-freeze.",
                true,
            );
        }

        // Verify: slice-level commands win wholesale, else the profile list
        // with its per-command cwd and timeout.
        let verify_required = self.slice.requires(GateKind::Verify);
        let verify_plans: Vec<gate::verify::CommandPlan> = match &self.slice.verify_commands {
            Some(cmds) if !cmds.is_empty() => cmds
                .iter()
                .map(|argv| gate::verify::CommandPlan {
                    argv: argv.clone(),
                    cwd: self.workdir.to_path_buf(),
                    timeout: Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SEC),
                })
                .collect(),
            _ => self
                .profile
                .verify_commands
                .iter()
                .map(|c| gate::verify::CommandPlan {
                    argv: c.argv.clone(),
                    cwd: match c.cwd {
                        CommandCwd::Worktree => self.workdir.to_path_buf(),
                        CommandCwd::Repo => self.layout.root().to_path_buf(),
                    },
                    timeout: Duration::from_secs(c.timeout_sec),
                })
                .collect(),
        };
        if verify_required && verify_plans.is_empty() {
            return self.fail(
                state,
                "verify",
                IncidentKind::VerifyConfigMissing,
                SliceStatus::GateFailed,
                &format!("verify gate requires commands for {slice_id}"),
                "Provide verify commands in slices.json or the profile.",
                false,
            );
        }
        let plans_to_run: &[gate::verify::CommandPlan] =
            if verify_required { &verify_plans } else { &[] };
        let (_, verify_outcome) = gate::verify::run_verify(
            self.task_id,
            slice_id,
            &proof_dir,
            &self.paths.run_dir,
            plans_to_run,
            verify_required,
            self.profile,
        )?;
        if verify_required && !verify_outcome.passed {
            let exhausted = self.attempts >= self.max_attempts;
            if exhausted {
                // Ceiling reached on a failed attempt: the block is recorded
                // as wasted effort on top of the gate incident.
                let incident = Incident::new(
                    IncidentKind::TokenWaste,
                    "execution",
                    &format!(
                        "slice {slice_id} exhausted its retry budget ({} attempts)",
                        self.attempts
                    ),
                    "Revise the plan, profile or environment before another attempt.",
                )
                .for_slice(self.module_id, self.task_id, slice_id);
                record_incident(self.layout, self.log, &incident, Some(self.paths))?;
            }
            return self.fail(
                state,
                "verify",
                IncidentKind::VerifyFail,
                if exhausted {
                    SliceStatus::Blocked
                } else {
                    SliceStatus::GateFailed
                },
                &format!("verify failed in {slice_id}"),
                "Fix the failing checks and retry.",
                exhausted,
            );
        }

        // Review
        let review_required = self.slice.requires(GateKind::Review);
        let (_, review_outcome) = gate::review::record_review(
            self.task_id,
            slice_id,
            &proof_dir,
            request.reviewer,
            request.review.p0,
            request.review.p1,
            request.review.p2,
            request.review.p3,
            request.review_summary,
        )?;
        if review_required && !review_outcome.passed {
            return self.fail(
                state,
                "review",
                IncidentKind::ReviewFail,
                SliceStatus::GateFailed,
                &format!("review found P0/P1 issues in {slice_id}"),
                "Address the review findings and retry.",
                false,
            );
        }

        // E2E (optional)
        let needs_e2e = self.slice.e2e_required
            || self.slice.requires(GateKind::E2e)
            || self.profile.e2e_required_default;
        let mut e2e_proof_path: Option<PathBuf> = None;
        if needs_e2e {
            let e2e_commands: Vec<Vec<String>> = self
                .profile
                .e2e_commands
                .iter()
                .map(|c| c.argv.clone())
                .collect();
            if e2e_commands.is_empty() {
                return self.fail(
                    state,
                    "e2e",
                    IncidentKind::E2eMissing,
                    SliceStatus::Blocked,
                    &format!("e2e required but no commands configured for {slice_id}"),
                    "Add e2e commands to the profile.",
                    true,
                );
            }
            let e2e_timeout = self
                .profile
                .e2e_commands
                .first()
                .map(|c| c.timeout_sec)
                .unwrap_or(DEFAULT_VERIFY_TIMEOUT_SEC);
            let (_, e2e_outcome) = gate::e2e::run_e2e(
                self.task_id,
                slice_id,
                &proof_dir,
                &self.paths.run_dir,
                self.workdir,
                &e2e_commands,
                self.profile,
                e2e_timeout,
            )?;
            if !e2e_outcome.passed {
                return self.fail(
                    state,
                    "e2e",
                    IncidentKind::E2eFail,
                    SliceStatus::GateFailed,
                    &format!("e2e failed in {slice_id}"),
                    "Fix the e2e failures and retry.",
                    false,
                );
            }
            e2e_proof_path = Some(e2e_outcome.proof_path);
        }

        // Proof pack: manifest written last, then events, then slice done.
        let mut proofs = vec![
            scope_outcome.proof_path.display().to_string(),
            verify_outcome.proof_path.display().to_string(),
            review_outcome.proof_path.display().to_string(),
        ];
        if let Some(path) = &e2e_proof_path {
            proofs.push(path.display().to_string());
        }
        let manifest = ProofManifest {
            task_id: self.task_id.to_string(),
            slice_id: slice_id.clone(),
            proofs,
            created_at: Utc::now(),
        };
        let manifest_path = proof_dir.join("manifest.json");
        io::write_json(&manifest_path, &manifest)?;

        let refs = vec![manifest_path.display().to_string()];
        self.log.append(
            EventType::ProofPackWritten,
            "engine",
            EventScope::slice(self.module_id, self.task_id, slice_id),
            serde_json::json!({"manifest_path": manifest_path.display().to_string()}),
            refs.clone(),
        )?;
        update_slice(
            self.paths,
            state,
            slice_id,
            SliceStatus::Done,
            self.attempts,
            None,
        )?;
        self.log.append(
            EventType::SliceCompleted,
            "engine",
            EventScope::slice(self.module_id, self.task_id, slice_id),
            serde_json::json!({"attempts": self.attempts}),
            refs,
        )?;

        Ok(SliceRunOutcome {
            task_id: self.task_id.to_string(),
            slice_id: slice_id.clone(),
            status: SliceStatus::Done,
            attempts: self.attempts,
            failed_gate: None,
            manifest_path: Some(manifest_path.display().to_string()),
            incident_kind: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn fail(
        &self,
        state: &mut TaskState,
        gate: &str,
        kind: IncidentKind,
        slice_status: SliceStatus,
        details: &str,
        remediation: &str,
        block_task: bool,
    ) -> Result<SliceRunOutcome> {
        let slice_id = &self.slice.slice_id;
        let incident = Incident::new(kind, "execution", details, remediation).for_slice(
            self.module_id,
            self.task_id,
            slice_id,
        );
        record_incident(self.layout, self.log, &incident, Some(self.paths))?;

        update_slice(
            self.paths,
            state,
            slice_id,
            slice_status,
            self.attempts,
            Some(details.to_string()),
        )?;
        if block_task {
            task::mark_blocked(self.paths, state, details)?;
        }

        Ok(SliceRunOutcome {
            task_id: self.task_id.to_string(),
            slice_id: slice_id.clone(),
            status: slice_status,
            attempts: self.attempts,
            failed_gate: Some(gate.to_string()),
            manifest_path: None,
            incident_kind: Some(kind),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn update_slice(
    paths: &TaskPaths,
    state: &mut TaskState,
    slice_id: &str,
    status: SliceStatus,
    attempts: u32,
    last_error: Option<String>,
) -> Result<()> {
    let max_attempts = state.max_attempts;
    let entry = state
        .slices
        .entry(slice_id.to_string())
        .or_insert_with(|| SliceState {
            status: SliceStatus::Pending,
            attempts: 0,
            max_attempts,
            last_error: None,
        });
    entry.status = status;
    entry.attempts = attempts;
    entry.last_error = last_error;
    task::write_state(paths, state)
}

fn block_for_attempts(
    layout: &Layout,
    log: &EventLog,
    paths: &TaskPaths,
    state: &mut TaskState,
    request: &SliceRunRequest<'_>,
    attempts: u32,
) -> Result<SliceRunOutcome> {
    let details = format!(
        "slice {} exhausted its retry budget ({attempts} attempts)",
        request.slice_id
    );
    let incident = Incident::new(
        IncidentKind::TokenWaste,
        "execution",
        &details,
        "Revise the plan, profile or environment before another attempt.",
    )
    .for_slice(request.module_id, request.task_id, request.slice_id);
    record_incident(layout, log, &incident, Some(paths))?;

    update_slice(
        paths,
        state,
        request.slice_id,
        SliceStatus::Blocked,
        attempts,
        Some("max attempts exceeded".to_string()),
    )?;
    task::mark_blocked(paths, state, "max attempts exceeded")?;

    Ok(SliceRunOutcome {
        task_id: request.task_id.to_string(),
        slice_id: request.slice_id.to_string(),
        status: SliceStatus::Blocked,
        attempts,
        failed_gate: Some("attempts".to_string()),
        manifest_path: None,
        incident_kind: Some(IncidentKind::TokenWaste),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{module_add, module_init};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Layout, EventLog, TaskPaths) {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        Registry::new().save(&layout).unwrap();
        module_add(&layout, "api", ".").unwrap();
        module_init(&layout, "api").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let log = EventLog::open(&layout).unwrap();

        let outcome = task::task_new(&layout, &log, "api", 2, None, "default").unwrap();
        let paths = outcome.paths;

        // Make the plan pass the critic and approve it
        let plan = "# Plan for T-0001\n\n## Goal\n- ship\n\n## Non-goals\n- none\n\n## Acceptance\n- verify passes\n";
        io::atomic_write(&paths.plan(), plan.as_bytes()).unwrap();
        let mut doc = SlicesDoc::load(&paths.slices()).unwrap();
        for slice in &mut doc.slices {
            slice.title = format!("work {}", slice.slice_id);
            slice.allowed_paths = vec!["src/**".to_string()];
            slice.verify_commands = Some(vec![vec![
                "python3".to_string(),
                "-c".to_string(),
                "print('ok')".to_string(),
            ]]);
        }
        doc.slices[1].deps = vec!["S-0001".to_string()];
        doc.save(&paths.slices()).unwrap();

        task::task_critic(&layout, &log, &paths).unwrap();
        task::task_freeze(&layout, &log, &paths).unwrap();
        task::task_approve_plan(&log, &paths, "alice").unwrap();
        (dir, layout, log, paths)
    }

    fn request<'a>(slice_id: &'a str, implement: Option<Vec<String>>) -> SliceRunRequest<'a> {
        SliceRunRequest {
            module_id: "api",
            task_id: "T-0001",
            slice_id,
            implement_argv: implement,
            review: ReviewInput::default(),
            review_summary: "clean",
            reviewer: "engine",
            workdir: None,
        }
    }

    fn touch_src(dir: &TempDir, name: &str) -> Vec<String> {
        vec![
            "python3".to_string(),
            "-c".to_string(),
            format!(
                "open({:?}, 'w').write('x')",
                dir.path().join("src").join(name).display().to_string()
            ),
        ]
    }

    #[test]
    fn happy_slice_completes_with_manifest() {
        let (dir, layout, log, paths) = setup();
        let outcome = slice_run(&layout, &log, &request("S-0001", Some(touch_src(&dir, "a.py")))).unwrap();
        assert!(outcome.completed());
        assert_eq!(outcome.attempts, 1);

        let manifest_path = paths.slice_proofs("S-0001").join("manifest.json");
        assert!(manifest_path.exists());
        let manifest: ProofManifest = io::read_json(&manifest_path).unwrap();
        assert_eq!(manifest.proofs.len(), 3);
        for proof in &manifest.proofs {
            assert!(Path::new(proof).exists(), "missing {proof}");
        }

        let state = task::read_state(&paths).unwrap();
        assert_eq!(state.status, TaskStatus::Executing);
        assert_eq!(state.slices["S-0001"].status, SliceStatus::Done);

        let types: Vec<EventType> = log
            .iter_chronological()
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect();
        let pack_pos = types
            .iter()
            .position(|t| *t == EventType::ProofPackWritten)
            .unwrap();
        let done_pos = types
            .iter()
            .position(|t| *t == EventType::SliceCompleted)
            .unwrap();
        assert!(pack_pos < done_pos);
    }

    #[test]
    fn dependency_order_enforced() {
        let (_dir, layout, log, _paths) = setup();
        let err = slice_run(&layout, &log, &request("S-0002", None)).unwrap_err();
        assert_eq!(err.kind(), "InvalidTransition");
    }

    #[test]
    fn scope_violation_blocks_task() {
        let (dir, layout, log, paths) = setup();
        // Write outside src/
        let implement = vec![
            "python3".to_string(),
            "-c".to_string(),
            format!(
                "open({:?}, 'w').write('x')",
                dir.path().join("outside.txt").display().to_string()
            ),
        ];
        let outcome = slice_run(&layout, &log, &request("S-0001", Some(implement))).unwrap();
        assert!(!outcome.completed());
        assert_eq!(outcome.failed_gate.as_deref(), Some("scope"));
        assert_eq!(outcome.incident_kind, Some(IncidentKind::ScopeViolation));

        let state = task::read_state(&paths).unwrap();
        assert_eq!(state.status, TaskStatus::Blocked);

        // Scope proof written even on failure
        let proof: serde_json::Value =
            io::read_json(&paths.slice_proofs("S-0001").join("scope.json")).unwrap();
        assert_eq!(proof["passed"], false);
        // No manifest on failure
        assert!(!paths.slice_proofs("S-0001").join("manifest.json").exists());
    }

    #[test]
    fn verify_failure_exhausts_retry_budget_into_blocked() {
        let (_dir, layout, log, paths) = setup();
        // Break the verify command
        let mut doc = SlicesDoc::load(&paths.slices()).unwrap();
        for slice in &mut doc.slices {
            slice.verify_commands = Some(vec![vec![
                "python3".to_string(),
                "-c".to_string(),
                "raise SystemExit(1)".to_string(),
            ]]);
        }
        doc.save(&paths.slices()).unwrap();
        // Content changed: re-critic, re-freeze, re-approve
        task::task_critic(&layout, &log, &paths).unwrap();
        task::task_freeze(&layout, &log, &paths).unwrap();
        task::task_approve_plan(&log, &paths, "alice").unwrap();

        let first = slice_run(&layout, &log, &request("S-0001", None)).unwrap();
        assert_eq!(first.status, SliceStatus::GateFailed);
        assert_eq!(first.attempts, 1);

        // Second (final) failed attempt blocks the task
        let second = slice_run(&layout, &log, &request("S-0001", None)).unwrap();
        assert_eq!(second.status, SliceStatus::Blocked);
        assert_eq!(task::read_state(&paths).unwrap().status, TaskStatus::Blocked);
        assert_eq!(second.incident_kind, Some(IncidentKind::VerifyFail));
    }

    #[test]
    fn retry_ceiling_emits_token_waste() {
        let (_dir, layout, log, paths) = setup();
        // Pre-exhaust the budget by hand
        let mut state = task::read_state(&paths).unwrap();
        state.slices.get_mut("S-0001").unwrap().attempts = 2;
        task::write_state(&paths, &mut state).unwrap();

        let outcome = slice_run(&layout, &log, &request("S-0001", None)).unwrap();
        assert_eq!(outcome.incident_kind, Some(IncidentKind::TokenWaste));
        assert_eq!(task::read_state(&paths).unwrap().status, TaskStatus::Blocked);
    }

    #[test]
    fn drift_fails_slice_run() {
        let (_dir, layout, log, paths) = setup();
        let mut plan = std::fs::read_to_string(paths.plan()).unwrap();
        plan.push('!');
        io::atomic_write(&paths.plan(), plan.as_bytes()).unwrap();

        let err = slice_run(&layout, &log, &request("S-0001", None)).unwrap_err();
        assert_eq!(err.kind(), "PlanDrift");
        assert_eq!(
            task::read_state(&paths).unwrap().status,
            TaskStatus::CriticPassed
        );
    }

    #[test]
    fn scope_config_missing_is_not_a_silent_pass() {
        let (_dir, layout, log, paths) = setup();
        let mut doc = SlicesDoc::load(&paths.slices()).unwrap();
        doc.slices[0].allowed_paths.clear();
        doc.save(&paths.slices()).unwrap();
        // The critic would reject this plan; bypass it by re-freezing the
        // edited content directly to prove the gate itself refuses to pass.
        let mut state = task::read_state(&paths).unwrap();
        state.status = TaskStatus::CriticPassed;
        task::write_state(&paths, &mut state).unwrap();
        task::task_freeze(&layout, &log, &paths).unwrap();
        task::task_approve_plan(&log, &paths, "alice").unwrap();

        let outcome = slice_run(&layout, &log, &request("S-0001", None)).unwrap();
        assert_eq!(outcome.incident_kind, Some(IncidentKind::ScopeConfigMissing));
        assert!(!outcome.completed());
    }
}
