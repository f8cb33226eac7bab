pub mod bootstrap;
pub mod event;
pub mod gate;
pub mod incident;
pub mod mission;
pub mod module;
pub mod registry;
pub mod replay;
pub mod retro;
pub mod skills;
pub mod slice;
pub mod status;
pub mod task;
pub mod validate;

use csk_core::envelope::{Envelope, EnvelopeStatus, NextAction};
use csk_core::event::{EventLog, EventScope, EventType};
use csk_core::paths::Layout;
use csk_core::registry::Registry;
use csk_core::task::TaskPaths;
use csk_core::Result;

/// Resolve the module path and task locations for a `(module_id, task_id)`
/// pair through the registry.
pub fn task_paths(layout: &Layout, module_id: &str, task_id: &str) -> Result<(String, TaskPaths)> {
    let registry = Registry::load(layout)?;
    let module = registry.module(module_id)?;
    Ok((
        module.path.clone(),
        TaskPaths::new(layout, &module.path, task_id),
    ))
}

/// Run one kernel operation inside the `command.started` /
/// `command.completed` bracket, so the operation and its exit status are
/// recoverable from the log alone.
pub fn bracketed<F>(layout: &Layout, command: &str, scope: EventScope, op: F) -> Envelope
where
    F: FnOnce(&EventLog) -> Result<Envelope>,
{
    let log = match EventLog::open(layout) {
        Ok(log) => log,
        Err(e) => {
            return Envelope::from_error(&e, NextAction::new("csk bootstrap"));
        }
    };

    if let Err(e) = log.append(
        EventType::CommandStarted,
        "engine",
        scope.clone(),
        serde_json::json!({"command": command}),
        vec![],
    ) {
        return Envelope::from_error(&e, NextAction::new("csk status --json"));
    }

    let envelope = match op(&log) {
        Ok(envelope) => envelope,
        Err(e) => {
            let next = recovery_next(layout, &e);
            Envelope::from_error(&e, next)
        }
    };

    let result_status = match envelope.status {
        EnvelopeStatus::Ok => "ok",
        EnvelopeStatus::GateFailed => "gate_failed",
        EnvelopeStatus::Error => "error",
        EnvelopeStatus::ReplayFailed => "replay_failed",
    };
    let _ = log.append(
        EventType::CommandCompleted,
        "engine",
        scope,
        serde_json::json!({
            "command": command,
            "result_status": result_status,
            "exit_code": envelope.exit_code(),
        }),
        vec![],
    );
    envelope
}

/// A concrete recovery action for a failed operation, derived from the
/// error kind plus the current projection.
fn recovery_next(layout: &Layout, error: &csk_core::CskError) -> NextAction {
    use csk_core::CskError;
    match error {
        CskError::NotBootstrapped => NextAction::new("csk bootstrap"),
        CskError::PlanDrift { task_id, .. } => NextAction::new(format!(
            "csk task critic --task-id {task_id} (then freeze and approve again)"
        )),
        CskError::CriticNotPassed(task_id) => {
            NextAction::new(format!("csk task critic --task-id {task_id}"))
        }
        CskError::ReadyPrerequisitesMissing { task_id, .. } => {
            NextAction::new(format!("csk gate validate-ready --task-id {task_id}"))
        }
        CskError::RetroPreconditionMissing { task_id, .. } => NextAction::new(format!(
            "csk gate approve-ready --task-id {task_id} --approved-by <name>"
        )),
        _ => csk_core::status::project_status(layout, None)
            .map(|p| p.next)
            .unwrap_or_else(|_| NextAction::new("csk status --json")),
    }
}
