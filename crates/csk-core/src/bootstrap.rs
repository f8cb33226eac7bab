//! Bootstrap: create the durable state tree under `<state_root>/.csk` and
//! stamp the engine version. Idempotent; re-running never clobbers local
//! overrides.

use crate::error::Result;
use crate::event::{EventLog, EventScope, EventType};
use crate::io;
use crate::paths::Layout;
use crate::registry::Registry;
use crate::skills;
use serde::{Deserialize, Serialize};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapOutcome {
    pub root: String,
    pub engine_version: String,
    pub created: bool,
}

pub fn bootstrap(layout: &Layout) -> Result<BootstrapOutcome> {
    let already = layout.registry().exists();

    // Engine pack
    io::ensure_dir(&layout.engine())?;
    io::atomic_write(
        &layout.engine_version_file(),
        format!("{ENGINE_VERSION}\n").as_bytes(),
    )?;
    io::ensure_dir(&layout.engine().join("profiles"))?;

    // Local overlay
    io::ensure_dir(&layout.local_profiles())?;
    io::ensure_dir(&layout.local_skills_override())?;
    io::ensure_dir(&layout.local_patches())?;
    io::write_if_missing(
        &layout.local_config(),
        serde_json::to_string_pretty(&serde_json::json!({
            "schema_version": "1",
            "default_profile": "default",
        }))?
        .as_bytes(),
    )?;

    // App state
    io::ensure_dir(&layout.app())?;
    io::ensure_dir(&layout.missions())?;
    if !layout.registry().exists() {
        let mut registry = Registry::new();
        registry.save(layout)?;
    }
    skills::generate(layout)?;

    // The event log is created on open; append the completion marker so the
    // bootstrap itself is reconstructible.
    let log = EventLog::open(layout)?;
    log.append(
        EventType::BootstrapCompleted,
        "engine",
        EventScope::default(),
        serde_json::json!({
            "root": layout.root().display().to_string(),
            "engine_version": ENGINE_VERSION,
            "created": !already,
        }),
        vec![layout.registry().display().to_string()],
    )?;

    Ok(BootstrapOutcome {
        root: layout.root().display().to_string(),
        engine_version: ENGINE_VERSION.to_string(),
        created: !already,
    })
}
