use crate::error::{CskError, Result};
use crate::event::{EventLog, EventScope, EventType};
use crate::incident::{record_incident, Incident, IncidentKind};
use crate::io;
use crate::paths::Layout;
use crate::registry::Registry;
use crate::types::next_dense_id;
use crate::worktree;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Draft,
    Active,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub title: String,
    pub modules: Vec<String>,
    pub status: MilestoneStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: String,
    pub title: String,
    pub routing: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestonesDoc {
    pub mission_id: String,
    pub milestones: Vec<Milestone>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreesDoc {
    pub mission_id: String,
    pub module_worktrees: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MissionPaths {
    pub dir: PathBuf,
}

impl MissionPaths {
    pub fn new(layout: &Layout, mission_id: &str) -> Self {
        Self {
            dir: layout.mission_dir(mission_id),
        }
    }

    pub fn mission(&self) -> PathBuf {
        self.dir.join("mission.json")
    }

    pub fn spec(&self) -> PathBuf {
        self.dir.join("spec.md")
    }

    pub fn routing(&self) -> PathBuf {
        self.dir.join("routing.json")
    }

    pub fn milestones(&self) -> PathBuf {
        self.dir.join("milestones.json")
    }

    pub fn worktrees(&self) -> PathBuf {
        self.dir.join("worktrees.json")
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MissionNewOutcome {
    pub mission_id: String,
    pub paths: MissionPaths,
    pub worktrees: Vec<worktree::WorktreeInfo>,
}

/// Materialise an intake result: spec text, routing over registered modules,
/// a detailed milestone-1, and (optionally) per-module worktrees. Emits
/// `mission.created`, `milestone.activated`, and one `worktree.created` or
/// `worktree.failed` per module when worktrees are requested.
pub fn mission_new(
    layout: &Layout,
    log: &EventLog,
    title: &str,
    spec_text: &str,
    module_ids: &[String],
    create_worktrees: bool,
) -> Result<MissionNewOutcome> {
    if module_ids.is_empty() {
        return Err(CskError::SchemaViolation {
            path: "routing".to_string(),
            reason: "mission requires at least one module".to_string(),
        });
    }
    let registry = Registry::load(layout)?;
    for module_id in module_ids {
        registry.module(module_id)?;
    }

    io::ensure_dir(&layout.missions())?;
    let mission_id = next_dense_id('M', &layout.missions());
    let paths = MissionPaths::new(layout, &mission_id);
    let now = Utc::now();

    let mission = Mission {
        mission_id: mission_id.clone(),
        title: title.to_string(),
        routing: module_ids.to_vec(),
        created_at: now,
        updated_at: now,
    };
    io::write_json(&paths.mission(), &mission)?;
    io::atomic_write(&paths.spec(), format!("# {title}\n\n{spec_text}\n").as_bytes())?;
    io::write_json(&paths.routing(), &serde_json::json!({
        "mission_id": mission_id,
        "modules": module_ids,
    }))?;

    // Only milestone-1 is detailed at materialisation time.
    let milestones = MilestonesDoc {
        mission_id: mission_id.clone(),
        milestones: vec![Milestone {
            id: "MS-1".to_string(),
            title: "Milestone 1".to_string(),
            modules: module_ids.to_vec(),
            status: MilestoneStatus::Active,
        }],
        updated_at: now,
    };
    io::write_json(&paths.milestones(), &milestones)?;

    let mut worktrees_doc = WorktreesDoc {
        mission_id: mission_id.clone(),
        module_worktrees: BTreeMap::new(),
        updated_at: now,
    };
    let mut infos = Vec::new();
    if create_worktrees {
        for module_id in module_ids {
            let info = worktree::create_module_worktree(layout, &mission_id, module_id)?;
            if info.created {
                worktrees_doc
                    .module_worktrees
                    .insert(module_id.clone(), info.path.clone());
                log.append(
                    EventType::WorktreeCreated,
                    "engine",
                    EventScope {
                        mission_id: Some(mission_id.clone()),
                        module_id: Some(module_id.clone()),
                        ..Default::default()
                    },
                    serde_json::json!({"path": info.path, "branch": info.branch}),
                    vec![info.path.clone()],
                )?;
            } else {
                let reason = info
                    .fallback_reason
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                log.append(
                    EventType::WorktreeFailed,
                    "engine",
                    EventScope {
                        mission_id: Some(mission_id.clone()),
                        module_id: Some(module_id.clone()),
                        ..Default::default()
                    },
                    serde_json::json!({"branch": info.branch, "reason": reason}),
                    vec![],
                )?;
                let incident = Incident::new(
                    IncidentKind::WorktreeCreateFailed,
                    "routing",
                    &format!("worktree not created for {module_id}: {reason}"),
                    "Create the worktree manually or continue against the module path.",
                )
                .for_module(module_id);
                record_incident(layout, log, &incident, None)?;
            }
            infos.push(info);
        }
    }
    io::write_json(&paths.worktrees(), &worktrees_doc)?;

    log.append(
        EventType::MissionCreated,
        "engine",
        EventScope::mission(&mission_id),
        serde_json::json!({"mission_id": mission_id, "routing": module_ids}),
        vec![
            paths.mission().display().to_string(),
            paths.spec().display().to_string(),
        ],
    )?;
    log.append(
        EventType::MilestoneActivated,
        "engine",
        EventScope::mission(&mission_id),
        serde_json::json!({"milestone_id": "MS-1", "modules": module_ids}),
        vec![paths.milestones().display().to_string()],
    )?;

    Ok(MissionNewOutcome {
        mission_id,
        paths,
        worktrees: infos,
    })
}

pub fn mission_load(layout: &Layout, mission_id: &str) -> Result<(Mission, MilestonesDoc, WorktreesDoc)> {
    let paths = MissionPaths::new(layout, mission_id);
    if !paths.mission().exists() {
        return Err(CskError::MissionNotFound(mission_id.to_string()));
    }
    let mission: Mission = io::read_json(&paths.mission())?;
    let milestones: MilestonesDoc = io::read_json(&paths.milestones())?;
    let worktrees: WorktreesDoc = io::read_json(&paths.worktrees())?;
    Ok((mission, milestones, worktrees))
}

pub fn list_mission_ids(layout: &Layout) -> Result<Vec<String>> {
    let missions = layout.missions();
    if !missions.exists() {
        return Ok(Vec::new());
    }
    let mut ids: Vec<String> = std::fs::read_dir(&missions)?
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("M-"))
        .collect();
    ids.sort();
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::module_add;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Layout, EventLog) {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        Registry::new().save(&layout).unwrap();
        module_add(&layout, "api", ".").unwrap();
        let log = EventLog::open(&layout).unwrap();
        (dir, layout, log)
    }

    #[test]
    fn mission_new_materialises_milestone_one() {
        let (_dir, layout, log) = setup();
        let outcome = mission_new(
            &layout,
            &log,
            "Checkout revamp",
            "Rework the checkout flow.",
            &["api".to_string()],
            false,
        )
        .unwrap();
        assert_eq!(outcome.mission_id, "M-0001");

        let (mission, milestones, worktrees) = mission_load(&layout, "M-0001").unwrap();
        assert_eq!(mission.routing, vec!["api"]);
        assert_eq!(milestones.milestones.len(), 1);
        assert_eq!(milestones.milestones[0].id, "MS-1");
        assert_eq!(milestones.milestones[0].status, MilestoneStatus::Active);
        assert!(worktrees.module_worktrees.is_empty());

        let types: Vec<EventType> = log
            .iter_chronological()
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert!(types.contains(&EventType::MissionCreated));
        assert!(types.contains(&EventType::MilestoneActivated));
    }

    #[test]
    fn mission_requires_registered_modules() {
        let (_dir, layout, log) = setup();
        let err = mission_new(&layout, &log, "x", "y", &["ghost".to_string()], false).unwrap_err();
        assert_eq!(err.kind(), "module_not_found");
    }

    #[test]
    fn worktree_failure_recorded_as_event_and_incident() {
        let (_dir, layout, log) = setup();
        // Not a git repository: worktree creation fails by construction
        mission_new(&layout, &log, "x", "y", &["api".to_string()], true).unwrap();
        let types: Vec<EventType> = log
            .iter_chronological()
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert!(types.contains(&EventType::WorktreeFailed));
        assert!(types.contains(&EventType::IncidentLogged));
    }

    #[test]
    fn mission_ids_are_dense() {
        let (_dir, layout, log) = setup();
        mission_new(&layout, &log, "a", "a", &["api".to_string()], false).unwrap();
        let outcome = mission_new(&layout, &log, "b", "b", &["api".to_string()], false).unwrap();
        assert_eq!(outcome.mission_id, "M-0002");
        assert_eq!(list_mission_ids(&layout).unwrap(), vec!["M-0001", "M-0002"]);
    }
}
