use thiserror::Error;

#[derive(Debug, Error)]
pub enum CskError {
    #[error("not bootstrapped: run 'csk bootstrap'")]
    NotBootstrapped,

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("module already exists: {0}")]
    ModuleExists(String),

    #[error("mission not found: {0}")]
    MissionNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("slice not found: {0}")]
    SliceNotFound(String),

    #[error("invalid module path '{0}': must be relative and stay inside the repository")]
    InvalidModulePath(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("plan drift for {task_id}: {reason}")]
    PlanDrift { task_id: String, reason: String },

    #[error("critic has not passed for {0}")]
    CriticNotPassed(String),

    #[error("scope gate requires non-empty allowed_paths for {0}")]
    ScopeConfigMissing(String),

    #[error("verify gate requires at least one command for {0}")]
    VerifyConfigMissing(String),

    #[error("e2e required but no commands configured for {0}")]
    E2eMissing(String),

    #[error("ready prerequisites missing for {task_id}: {missing:?}")]
    ReadyPrerequisitesMissing { task_id: String, missing: Vec<String> },

    #[error("retro requires ready_approved or blocked, task {task_id} is '{status}'")]
    RetroPreconditionMissing { task_id: String, status: String },

    #[error("worktree creation failed for {module_id}: {reason}")]
    WorktreeCreateFailed { module_id: String, reason: String },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command denied by policy: {0}")]
    CommandDenied(String),

    #[error("invalid command '{argv}': {reason}")]
    CommandRejected { argv: String, reason: String },

    #[error("schema violation in {path}: {reason}")]
    SchemaViolation { path: String, reason: String },

    #[error("replay invariant violation: {0} violation(s)")]
    ReplayInvariantViolation(usize),

    #[error("validation failed: {0} error(s)")]
    ValidationFailed(usize),

    #[error("event log error: {0}")]
    EventLog(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CskError {
    /// Stable snake_case kind tag used in envelopes, incidents and events.
    pub fn kind(&self) -> &'static str {
        match self {
            CskError::NotBootstrapped => "not_bootstrapped",
            CskError::ModuleNotFound(_) => "module_not_found",
            CskError::ModuleExists(_) => "module_exists",
            CskError::MissionNotFound(_) => "mission_not_found",
            CskError::TaskNotFound(_) => "task_not_found",
            CskError::SliceNotFound(_) => "slice_not_found",
            CskError::InvalidModulePath(_) => "invalid_module_path",
            CskError::InvalidTransition { .. } => "InvalidTransition",
            CskError::PlanDrift { .. } => "PlanDrift",
            CskError::CriticNotPassed(_) => "critic_not_passed",
            CskError::ScopeConfigMissing(_) => "scope_config_missing",
            CskError::VerifyConfigMissing(_) => "verify_config_missing",
            CskError::E2eMissing(_) => "e2e_missing",
            CskError::ReadyPrerequisitesMissing { .. } => "ready_prerequisites_missing",
            CskError::RetroPreconditionMissing { .. } => "retro_precondition_missing",
            CskError::WorktreeCreateFailed { .. } => "worktree_create_failed",
            CskError::CommandNotFound(_) => "command_not_found",
            CskError::CommandDenied(_) => "command_denied",
            CskError::CommandRejected { .. } => "command_denied",
            CskError::SchemaViolation { .. } => "schema_violation",
            CskError::ReplayInvariantViolation(_) => "replay_invariant_violation",
            CskError::ValidationFailed(_) => "validation_failed",
            CskError::EventLog(_) => "internal_error",
            CskError::Io(_) => "internal_error",
            CskError::Json(_) => "internal_error",
        }
    }

    /// Process exit code for this error per the CLI contract:
    /// 10 = gate/contract failure needing user action, 20 = internal error,
    /// 30 = replay invariant violation.
    pub fn exit_code(&self) -> i32 {
        match self {
            CskError::ReplayInvariantViolation(_) => 30,
            CskError::SchemaViolation { .. }
            | CskError::EventLog(_)
            | CskError::Io(_)
            | CskError::Json(_) => 20,
            _ => 10,
        }
    }
}

pub type Result<T> = std::result::Result<T, CskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(
            CskError::PlanDrift {
                task_id: "T-0001".into(),
                reason: "plan".into()
            }
            .kind(),
            "PlanDrift"
        );
        assert_eq!(
            CskError::ScopeConfigMissing("S-0001".into()).kind(),
            "scope_config_missing"
        );
    }

    #[test]
    fn exit_codes() {
        assert_eq!(CskError::ReplayInvariantViolation(1).exit_code(), 30);
        assert_eq!(
            CskError::SchemaViolation {
                path: "x".into(),
                reason: "y".into()
            }
            .exit_code(),
            20
        );
        assert_eq!(CskError::TaskNotFound("T-0001".into()).exit_code(), 10);
    }
}
