use crate::error::CskError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    CriticPassed,
    Frozen,
    PlanApproved,
    Executing,
    ReadyValidated,
    ReadyApproved,
    Blocked,
    RetroDone,
    Closed,
}

impl TaskStatus {
    pub fn all() -> &'static [TaskStatus] {
        &[
            TaskStatus::Draft,
            TaskStatus::CriticPassed,
            TaskStatus::Frozen,
            TaskStatus::PlanApproved,
            TaskStatus::Executing,
            TaskStatus::ReadyValidated,
            TaskStatus::ReadyApproved,
            TaskStatus::Blocked,
            TaskStatus::RetroDone,
            TaskStatus::Closed,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Draft => "draft",
            TaskStatus::CriticPassed => "critic_passed",
            TaskStatus::Frozen => "frozen",
            TaskStatus::PlanApproved => "plan_approved",
            TaskStatus::Executing => "executing",
            TaskStatus::ReadyValidated => "ready_validated",
            TaskStatus::ReadyApproved => "ready_approved",
            TaskStatus::Blocked => "blocked",
            TaskStatus::RetroDone => "retro_done",
            TaskStatus::Closed => "closed",
        }
    }

    /// The allowed transition graph. The main line is total; side branches
    /// cover blocking and re-critic (which also absorbs the drift rollback).
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        if self == to {
            return true;
        }
        match (self, to) {
            (Draft, CriticPassed) => true,
            // Re-running the critic after a plan edit drops the task back to
            // critic_passed, forcing re-freeze and re-approval.
            (Frozen, CriticPassed) => true,
            (PlanApproved, CriticPassed) => true,
            (Executing, CriticPassed) => true,
            (CriticPassed, Frozen) => true,
            (Frozen, PlanApproved) => true,
            (PlanApproved, Executing) => true,
            (PlanApproved, ReadyValidated) => true,
            (Executing, ReadyValidated) => true,
            (Executing, Blocked) => true,
            (ReadyValidated, ReadyApproved) => true,
            (ReadyValidated, Blocked) => true,
            (ReadyApproved, RetroDone) => true,
            (Blocked, RetroDone) => true,
            (RetroDone, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = CskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::all()
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CskError::SchemaViolation {
                path: "task.status".to_string(),
                reason: format!("unknown task status '{s}'"),
            })
    }
}

// ---------------------------------------------------------------------------
// SliceStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceStatus {
    #[default]
    Pending,
    Running,
    GateFailed,
    Blocked,
    Done,
}

impl fmt::Display for SliceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SliceStatus::Pending => "pending",
            SliceStatus::Running => "running",
            SliceStatus::GateFailed => "gate_failed",
            SliceStatus::Blocked => "blocked",
            SliceStatus::Done => "done",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// GateKind
// ---------------------------------------------------------------------------

/// The closed set of gates a slice can require. The slice pipeline runs them
/// in this order; the proof pack manifest is written only after every
/// required gate passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Scope,
    Verify,
    Review,
    E2e,
}

impl GateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GateKind::Scope => "scope",
            GateKind::Verify => "verify",
            GateKind::Review => "review",
            GateKind::E2e => "e2e",
        }
    }

    pub fn proof_filename(self) -> &'static str {
        match self {
            GateKind::Scope => "scope.json",
            GateKind::Verify => "verify.json",
            GateKind::Review => "review.json",
            GateKind::E2e => "e2e.json",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ProjectPhase / ModulePhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectPhase {
    NotBootstrapped,
    Idle,
    Planning,
    Executing,
    ReadyValidated,
    RetroRequired,
    Blocked,
}

impl fmt::Display for ProjectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProjectPhase::NotBootstrapped => "NOT_BOOTSTRAPPED",
            ProjectPhase::Idle => "IDLE",
            ProjectPhase::Planning => "PLANNING",
            ProjectPhase::Executing => "EXECUTING",
            ProjectPhase::ReadyValidated => "READY_VALIDATED",
            ProjectPhase::RetroRequired => "RETRO_REQUIRED",
            ProjectPhase::Blocked => "BLOCKED",
        };
        f.write_str(s)
    }
}

/// Per-module phase projected from the active task status. Lower priority
/// rank sorts first when choosing the active module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModulePhase {
    Blocked,
    PlanFrozen,
    ReadyValidated,
    RetroRequired,
    Executing,
    Planning,
    Idle,
    RetroDone,
    Closed,
}

impl ModulePhase {
    pub fn from_task_status(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Draft | TaskStatus::CriticPassed => ModulePhase::Planning,
            TaskStatus::Frozen => ModulePhase::PlanFrozen,
            TaskStatus::PlanApproved | TaskStatus::Executing => ModulePhase::Executing,
            TaskStatus::ReadyValidated => ModulePhase::ReadyValidated,
            TaskStatus::ReadyApproved => ModulePhase::RetroRequired,
            TaskStatus::Blocked => ModulePhase::Blocked,
            TaskStatus::RetroDone => ModulePhase::RetroDone,
            TaskStatus::Closed => ModulePhase::Closed,
        }
    }

    pub fn priority(self) -> u8 {
        match self {
            ModulePhase::Blocked => 0,
            ModulePhase::PlanFrozen => 1,
            ModulePhase::ReadyValidated => 2,
            ModulePhase::RetroRequired => 3,
            ModulePhase::Executing => 4,
            ModulePhase::Planning => 5,
            ModulePhase::Idle => 6,
            ModulePhase::RetroDone => 7,
            ModulePhase::Closed => 8,
        }
    }
}

impl fmt::Display for ModulePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModulePhase::Blocked => "BLOCKED",
            ModulePhase::PlanFrozen => "PLAN_FROZEN",
            ModulePhase::ReadyValidated => "READY_VALIDATED",
            ModulePhase::RetroRequired => "RETRO_REQUIRED",
            ModulePhase::Executing => "EXECUTING",
            ModulePhase::Planning => "PLANNING",
            ModulePhase::Idle => "IDLE",
            ModulePhase::RetroDone => "RETRO_DONE",
            ModulePhase::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Id helpers
// ---------------------------------------------------------------------------

/// Next dense id with the given prefix (`T-0001`, `M-0001`, ...) by scanning
/// the child directories of `parent`.
pub fn next_dense_id(prefix: char, parent: &std::path::Path) -> String {
    let pattern = regex::Regex::new(&format!(r"^{prefix}-(\d{{4}})$")).expect("static pattern");
    let mut max_seen = 0u32;
    if let Ok(entries) = std::fs::read_dir(parent) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(caps) = pattern.captures(&name) {
                if let Ok(n) = caps[1].parse::<u32>() {
                    max_seen = max_seen.max(n);
                }
            }
        }
    }
    format!("{prefix}-{:04}", max_seen + 1)
}

pub fn slice_id(index: usize) -> String {
    format!("S-{index:04}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn happy_path_is_reachable() {
        use TaskStatus::*;
        let path = [
            Draft,
            CriticPassed,
            Frozen,
            PlanApproved,
            Executing,
            ReadyValidated,
            ReadyApproved,
            RetroDone,
            Closed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn side_branches() {
        use TaskStatus::*;
        assert!(Executing.can_transition_to(Blocked));
        assert!(ReadyValidated.can_transition_to(Blocked));
        assert!(Blocked.can_transition_to(RetroDone));
        assert!(PlanApproved.can_transition_to(CriticPassed));
        assert!(Executing.can_transition_to(CriticPassed));
    }

    #[test]
    fn backward_and_skip_transitions_rejected() {
        use TaskStatus::*;
        assert!(!Draft.can_transition_to(Frozen));
        assert!(!Frozen.can_transition_to(Draft));
        assert!(!Draft.can_transition_to(ReadyApproved));
        assert!(!Closed.can_transition_to(Draft));
        assert!(!RetroDone.can_transition_to(Executing));
    }

    #[test]
    fn status_string_roundtrip() {
        for status in TaskStatus::all() {
            assert_eq!(TaskStatus::from_str(status.as_str()).unwrap(), *status);
        }
        assert!(TaskStatus::from_str("bogus").is_err());
    }

    #[test]
    fn module_phase_priority_ordering() {
        assert!(ModulePhase::Blocked.priority() < ModulePhase::PlanFrozen.priority());
        assert!(ModulePhase::ReadyValidated.priority() < ModulePhase::Executing.priority());
        assert_eq!(
            ModulePhase::from_task_status(TaskStatus::Frozen),
            ModulePhase::PlanFrozen
        );
    }

    #[test]
    fn dense_ids() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(next_dense_id('T', dir.path()), "T-0001");
        std::fs::create_dir(dir.path().join("T-0001")).unwrap();
        std::fs::create_dir(dir.path().join("T-0007")).unwrap();
        assert_eq!(next_dense_id('T', dir.path()), "T-0008");
        assert_eq!(slice_id(3), "S-0003");
    }
}
