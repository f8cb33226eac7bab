//! Append-only event log backed by redb.
//!
//! # Table design
//!
//! A single `EVENTS` table maps a `u64` insertion sequence to the
//! JSON-encoded envelope. redb orders `u64` keys numerically, so key order
//! equals insertion order and readers can iterate chronologically without
//! trusting wall-clock timestamps (same-second events stay ordered).
//!
//! Each append runs in one write transaction: redb serialises writers, which
//! gives the single-writer-at-a-time guarantee for concurrent invocations.

use crate::error::{CskError, Result};
use crate::paths::Layout;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

const EVENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("events");

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Closed set of event types. Unknown strings fail envelope validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "command.started")]
    CommandStarted,
    #[serde(rename = "command.completed")]
    CommandCompleted,
    #[serde(rename = "bootstrap.completed")]
    BootstrapCompleted,
    #[serde(rename = "module.added")]
    ModuleAdded,
    #[serde(rename = "module.initialized")]
    ModuleInitialized,
    #[serde(rename = "registry.detected")]
    RegistryDetected,
    #[serde(rename = "mission.created")]
    MissionCreated,
    #[serde(rename = "milestone.activated")]
    MilestoneActivated,
    #[serde(rename = "worktree.created")]
    WorktreeCreated,
    #[serde(rename = "worktree.failed")]
    WorktreeFailed,
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "slice.created")]
    SliceCreated,
    #[serde(rename = "task.critic_passed")]
    TaskCriticPassed,
    #[serde(rename = "task.critic_failed")]
    TaskCriticFailed,
    #[serde(rename = "task.frozen")]
    TaskFrozen,
    #[serde(rename = "task.plan_approved")]
    TaskPlanApproved,
    #[serde(rename = "proof.pack.written")]
    ProofPackWritten,
    #[serde(rename = "slice.completed")]
    SliceCompleted,
    #[serde(rename = "ready.validated")]
    ReadyValidated,
    #[serde(rename = "ready.approved")]
    ReadyApproved,
    #[serde(rename = "retro.completed")]
    RetroCompleted,
    #[serde(rename = "incident.logged")]
    IncidentLogged,
    #[serde(rename = "replay.checked")]
    ReplayChecked,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::CommandStarted => "command.started",
            EventType::CommandCompleted => "command.completed",
            EventType::BootstrapCompleted => "bootstrap.completed",
            EventType::ModuleAdded => "module.added",
            EventType::ModuleInitialized => "module.initialized",
            EventType::RegistryDetected => "registry.detected",
            EventType::MissionCreated => "mission.created",
            EventType::MilestoneActivated => "milestone.activated",
            EventType::WorktreeCreated => "worktree.created",
            EventType::WorktreeFailed => "worktree.failed",
            EventType::TaskCreated => "task.created",
            EventType::SliceCreated => "slice.created",
            EventType::TaskCriticPassed => "task.critic_passed",
            EventType::TaskCriticFailed => "task.critic_failed",
            EventType::TaskFrozen => "task.frozen",
            EventType::TaskPlanApproved => "task.plan_approved",
            EventType::ProofPackWritten => "proof.pack.written",
            EventType::SliceCompleted => "slice.completed",
            EventType::ReadyValidated => "ready.validated",
            EventType::ReadyApproved => "ready.approved",
            EventType::RetroCompleted => "retro.completed",
            EventType::IncidentLogged => "incident.logged",
            EventType::ReplayChecked => "replay.checked",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Event {
    pub id: String,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub artifact_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_git_head: Option<String>,
    pub engine_version: String,
}

/// Builder for the optional scope fields of an envelope.
#[derive(Debug, Clone, Default)]
pub struct EventScope {
    pub mission_id: Option<String>,
    pub module_id: Option<String>,
    pub task_id: Option<String>,
    pub slice_id: Option<String>,
}

impl EventScope {
    pub fn module(module_id: impl Into<String>) -> Self {
        Self {
            module_id: Some(module_id.into()),
            ..Default::default()
        }
    }

    pub fn task(module_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            module_id: Some(module_id.into()),
            task_id: Some(task_id.into()),
            ..Default::default()
        }
    }

    pub fn slice(
        module_id: impl Into<String>,
        task_id: impl Into<String>,
        slice_id: impl Into<String>,
    ) -> Self {
        Self {
            module_id: Some(module_id.into()),
            task_id: Some(task_id.into()),
            slice_id: Some(slice_id.into()),
            ..Default::default()
        }
    }

    pub fn mission(mission_id: impl Into<String>) -> Self {
        Self {
            mission_id: Some(mission_id.into()),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub mission_id: Option<String>,
    pub module_id: Option<String>,
    pub task_id: Option<String>,
    pub slice_id: Option<String>,
}

impl EventFilter {
    fn matches(&self, event: &Event) -> bool {
        fn field_ok(want: &Option<String>, got: &Option<String>) -> bool {
            match want {
                None => true,
                Some(value) => got.as_deref() == Some(value.as_str()),
            }
        }
        self.event_type.map_or(true, |t| event.event_type == t)
            && field_ok(&self.mission_id, &event.mission_id)
            && field_ok(&self.module_id, &event.module_id)
            && field_ok(&self.task_id, &event.task_id)
            && field_ok(&self.slice_id, &event.slice_id)
    }
}

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

pub struct EventLog {
    db: Database,
    engine_version: String,
    repo_root: std::path::PathBuf,
}

impl EventLog {
    /// Open or create the log for a state root. The engine version stamped
    /// into every envelope is read from `.csk/engine/VERSION` once at open.
    pub fn open(layout: &Layout) -> Result<Self> {
        let path = layout.eventlog();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path).map_err(|e| CskError::EventLog(e.to_string()))?;
        let wt = db
            .begin_write()
            .map_err(|e| CskError::EventLog(e.to_string()))?;
        wt.open_table(EVENTS)
            .map_err(|e| CskError::EventLog(e.to_string()))?;
        wt.commit().map_err(|e| CskError::EventLog(e.to_string()))?;

        let engine_version = std::fs::read_to_string(layout.engine_version_file())
            .map(|s| s.trim().to_string())
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            db,
            engine_version,
            repo_root: layout.root().to_path_buf(),
        })
    }

    /// Append one event. The envelope is validated (closed type set via the
    /// enum; a serialize/deserialize roundtrip rejects anything malformed)
    /// before the write transaction commits.
    pub fn append(
        &self,
        event_type: EventType,
        actor: &str,
        scope: EventScope,
        payload: serde_json::Value,
        artifact_refs: Vec<String>,
    ) -> Result<Event> {
        let event = Event {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            event_type,
            actor: actor.to_string(),
            mission_id: scope.mission_id,
            module_id: scope.module_id,
            task_id: scope.task_id,
            slice_id: scope.slice_id,
            payload,
            artifact_refs,
            repo_git_head: git_head(&self.repo_root),
            engine_version: self.engine_version.clone(),
        };
        self.append_raw(&event)?;
        Ok(event)
    }

    fn append_raw(&self, event: &Event) -> Result<()> {
        let encoded = serde_json::to_vec(event)?;
        // Roundtrip check: rejects envelopes that would not read back.
        let _: Event = serde_json::from_slice(&encoded).map_err(|e| CskError::SchemaViolation {
            path: "event".to_string(),
            reason: e.to_string(),
        })?;

        let wt = self
            .db
            .begin_write()
            .map_err(|e| CskError::EventLog(e.to_string()))?;
        {
            let mut table = wt
                .open_table(EVENTS)
                .map_err(|e| CskError::EventLog(e.to_string()))?;
            let next_seq = table
                .last()
                .map_err(|e| CskError::EventLog(e.to_string()))?
                .map(|(key, _)| key.value() + 1)
                .unwrap_or(1);
            table
                .insert(next_seq, encoded.as_slice())
                .map_err(|e| CskError::EventLog(e.to_string()))?;
        }
        wt.commit().map_err(|e| CskError::EventLog(e.to_string()))?;
        Ok(())
    }

    /// All events in insertion order.
    pub fn iter_chronological(&self) -> Result<Vec<Event>> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| CskError::EventLog(e.to_string()))?;
        let table = rt
            .open_table(EVENTS)
            .map_err(|e| CskError::EventLog(e.to_string()))?;
        let mut events = Vec::new();
        for entry in table.iter().map_err(|e| CskError::EventLog(e.to_string()))? {
            let (_, value) = entry.map_err(|e| CskError::EventLog(e.to_string()))?;
            let event: Event =
                serde_json::from_slice(value.value()).map_err(|e| CskError::SchemaViolation {
                    path: "eventlog".to_string(),
                    reason: e.to_string(),
                })?;
            events.push(event);
        }
        Ok(events)
    }

    /// Last `n` events matching the filter, newest last.
    pub fn tail(&self, filter: &EventFilter, n: usize) -> Result<Vec<Event>> {
        let mut matched: Vec<Event> = self
            .iter_chronological()?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        if matched.len() > n {
            matched.drain(..matched.len() - n);
        }
        Ok(matched)
    }
}

// ---------------------------------------------------------------------------
// Git head probe
// ---------------------------------------------------------------------------

/// Current `HEAD` of the repository at `root`, suffixed with `:dirty` when
/// the worktree has uncommitted changes. `None` outside a git repository.
pub fn git_head(root: &Path) -> Option<String> {
    let head = git(root, &["rev-parse", "HEAD"])?;
    if head.is_empty() {
        return None;
    }
    match git(root, &["status", "--porcelain"]) {
        Some(status) if !status.is_empty() => Some(format!("{head}:dirty")),
        _ => Some(head),
    }
}

fn git(root: &Path, args: &[&str]) -> Option<String> {
    let output = std::process::Command::new("git")
        .arg("-C")
        .arg(root)
        .args(args)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_log() -> (TempDir, EventLog) {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        let log = EventLog::open(&layout).unwrap();
        (dir, log)
    }

    #[test]
    fn append_and_iterate_in_insertion_order() {
        let (_dir, log) = open_log();
        log.append(
            EventType::TaskCreated,
            "engine",
            EventScope::task("api", "T-0001"),
            serde_json::json!({"task_id": "T-0001"}),
            vec![],
        )
        .unwrap();
        log.append(
            EventType::SliceCreated,
            "engine",
            EventScope::slice("api", "T-0001", "S-0001"),
            serde_json::json!({}),
            vec![],
        )
        .unwrap();

        let events = log.iter_chronological().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::TaskCreated);
        assert_eq!(events[1].event_type, EventType::SliceCreated);
    }

    #[test]
    fn append_preserves_all_events_without_duplicate_ids() {
        let (_dir, log) = open_log();
        for _ in 0..25 {
            log.append(
                EventType::IncidentLogged,
                "engine",
                EventScope::default(),
                serde_json::json!({}),
                vec![],
            )
            .unwrap();
        }
        let events = log.iter_chronological().unwrap();
        assert_eq!(events.len(), 25);
        let unique: std::collections::HashSet<&str> =
            events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(unique.len(), 25);
    }

    #[test]
    fn concurrent_appends_preserve_every_event() {
        let (_dir, log) = open_log();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let log = &log;
                scope.spawn(move || {
                    for i in 0..10 {
                        log.append(
                            EventType::IncidentLogged,
                            "engine",
                            EventScope::default(),
                            serde_json::json!({"worker": worker, "i": i}),
                            vec![],
                        )
                        .unwrap();
                    }
                });
            }
        });

        let events = log.iter_chronological().unwrap();
        assert_eq!(events.len(), 40);
        let unique: std::collections::HashSet<&str> =
            events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(unique.len(), 40);
    }

    #[test]
    fn tail_filters_by_type_and_scope() {
        let (_dir, log) = open_log();
        for task in ["T-0001", "T-0002"] {
            log.append(
                EventType::TaskCreated,
                "engine",
                EventScope::task("api", task),
                serde_json::json!({}),
                vec![],
            )
            .unwrap();
        }
        log.append(
            EventType::TaskFrozen,
            "engine",
            EventScope::task("api", "T-0001"),
            serde_json::json!({}),
            vec![],
        )
        .unwrap();

        let filter = EventFilter {
            task_id: Some("T-0001".to_string()),
            ..Default::default()
        };
        let events = log.tail(&filter, 10).unwrap();
        assert_eq!(events.len(), 2);

        let filter = EventFilter {
            event_type: Some(EventType::TaskFrozen),
            ..Default::default()
        };
        assert_eq!(log.tail(&filter, 10).unwrap().len(), 1);
    }

    #[test]
    fn tail_keeps_newest() {
        let (_dir, log) = open_log();
        for i in 0..5 {
            log.append(
                EventType::IncidentLogged,
                "engine",
                EventScope::default(),
                serde_json::json!({"n": i}),
                vec![],
            )
            .unwrap();
        }
        let events = log.tail(&EventFilter::default(), 2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].payload["n"], 4);
    }

    #[test]
    fn envelope_rejects_unknown_fields() {
        let raw = serde_json::json!({
            "id": "x",
            "ts": Utc::now(),
            "type": "task.created",
            "actor": "engine",
            "payload": {},
            "artifact_refs": [],
            "engine_version": "1",
            "surprise": true,
        });
        assert!(serde_json::from_value::<Event>(raw).is_err());
    }

    #[test]
    fn envelope_rejects_unknown_event_type() {
        let raw = serde_json::json!({
            "id": "x",
            "ts": Utc::now(),
            "type": "task.invented",
            "actor": "engine",
            "payload": {},
            "artifact_refs": [],
            "engine_version": "1",
        });
        assert!(serde_json::from_value::<Event>(raw).is_err());
    }
}
