use crate::error::Result;
use crate::event::{EventLog, EventScope, EventType};
use crate::io;
use crate::paths::Layout;
use crate::task::TaskPaths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// IncidentKind
// ---------------------------------------------------------------------------

/// Closed set of incident kinds, mirroring the error taxonomy of the gates
/// and lifecycle. The retro stage clusters on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    ScopeConfigMissing,
    ScopeViolation,
    VerifyConfigMissing,
    VerifyFail,
    ReviewFail,
    E2eMissing,
    E2eFail,
    ImplementFail,
    TokenWaste,
    ReadyPrerequisitesMissing,
    RetroPreconditionMissing,
    WorktreeCreateFailed,
    CommandNotFound,
    CommandDenied,
    SchemaViolation,
    ReplayInvariantViolation,
}

impl IncidentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IncidentKind::ScopeConfigMissing => "scope_config_missing",
            IncidentKind::ScopeViolation => "scope_violation",
            IncidentKind::VerifyConfigMissing => "verify_config_missing",
            IncidentKind::VerifyFail => "verify_fail",
            IncidentKind::ReviewFail => "review_fail",
            IncidentKind::E2eMissing => "e2e_missing",
            IncidentKind::E2eFail => "e2e_fail",
            IncidentKind::ImplementFail => "implement_fail",
            IncidentKind::TokenWaste => "token_waste",
            IncidentKind::ReadyPrerequisitesMissing => "ready_prerequisites_missing",
            IncidentKind::RetroPreconditionMissing => "retro_precondition_missing",
            IncidentKind::WorktreeCreateFailed => "worktree_create_failed",
            IncidentKind::CommandNotFound => "command_not_found",
            IncidentKind::CommandDenied => "command_denied",
            IncidentKind::SchemaViolation => "schema_violation",
            IncidentKind::ReplayInvariantViolation => "replay_invariant_violation",
        }
    }
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Incident
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub kind: IncidentKind,
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_id: Option<String>,
    pub details: String,
    pub remediation_hint: String,
    pub ts: DateTime<Utc>,
}

impl Incident {
    pub fn new(kind: IncidentKind, phase: &str, details: &str, remediation_hint: &str) -> Self {
        Self {
            id: format!("INC-{}", Uuid::new_v4().simple()),
            kind,
            phase: phase.to_string(),
            module_id: None,
            task_id: None,
            slice_id: None,
            details: details.to_string(),
            remediation_hint: remediation_hint.to_string(),
            ts: Utc::now(),
        }
    }

    pub fn for_slice(mut self, module_id: &str, task_id: &str, slice_id: &str) -> Self {
        self.module_id = Some(module_id.to_string());
        self.task_id = Some(task_id.to_string());
        self.slice_id = Some(slice_id.to_string());
        self
    }

    pub fn for_task(mut self, module_id: &str, task_id: &str) -> Self {
        self.module_id = Some(module_id.to_string());
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn for_module(mut self, module_id: &str) -> Self {
        self.module_id = Some(module_id.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

/// Append the incident to the project stream, the per-task stream when the
/// incident names a task, and emit `incident.logged`.
pub fn record_incident(
    layout: &Layout,
    log: &EventLog,
    incident: &Incident,
    task_paths: Option<&TaskPaths>,
) -> Result<()> {
    io::append_jsonl(&layout.app_incidents(), incident)?;
    let mut refs = vec![layout.app_incidents().display().to_string()];
    if let Some(paths) = task_paths {
        io::append_jsonl(&paths.incidents(), incident)?;
        refs.push(paths.incidents().display().to_string());
    }

    log.append(
        EventType::IncidentLogged,
        "engine",
        EventScope {
            module_id: incident.module_id.clone(),
            task_id: incident.task_id.clone(),
            slice_id: incident.slice_id.clone(),
            ..Default::default()
        },
        serde_json::json!({
            "incident_id": incident.id,
            "kind": incident.kind,
            "phase": incident.phase,
        }),
        refs,
    )?;
    Ok(())
}

/// Incidents attached to one task, from the per-task stream.
pub fn task_incidents(paths: &TaskPaths) -> Result<Vec<Incident>> {
    io::read_jsonl(&paths.incidents())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
