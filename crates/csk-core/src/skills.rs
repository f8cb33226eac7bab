//! Regenerate hook for the static guidance files. Actual template rendering
//! lives outside the kernel; this module only tracks whether the generated
//! output is in sync with the engine version and local overrides, and
//! rewrites the stamp when regeneration runs.

use crate::error::Result;
use crate::io;
use crate::paths::Layout;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsState {
    pub engine_version: String,
    pub overrides_sha256: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsSync {
    pub in_sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn engine_version(layout: &Layout) -> String {
    std::fs::read_to_string(layout.engine_version_file())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Digest of the local skills override directory (file names + contents).
fn overrides_digest(layout: &Layout) -> Result<String> {
    let dir = layout.local_skills_override();
    let mut entries: Vec<(String, String)> = Vec::new();
    if dir.exists() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().is_file() {
                entries.push((
                    entry.file_name().to_string_lossy().into_owned(),
                    io::sha256_file(&entry.path())?,
                ));
            }
        }
    }
    entries.sort();
    let joined = entries
        .iter()
        .map(|(name, hash)| format!("{name}:{hash}"))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(io::sha256_hex(joined.as_bytes()))
}

/// Compare the recorded stamp against the current engine version and
/// override digest.
pub fn check_sync(layout: &Layout) -> Result<SkillsSync> {
    let stamp_path = layout.skills_state();
    if !stamp_path.exists() {
        return Ok(SkillsSync {
            in_sync: false,
            reason: Some("skills never generated".to_string()),
        });
    }
    let stamp: SkillsState = io::read_json(&stamp_path)?;
    if stamp.engine_version != engine_version(layout) {
        return Ok(SkillsSync {
            in_sync: false,
            reason: Some("engine version changed".to_string()),
        });
    }
    if stamp.overrides_sha256 != overrides_digest(layout)? {
        return Ok(SkillsSync {
            in_sync: false,
            reason: Some("local overrides changed".to_string()),
        });
    }
    Ok(SkillsSync {
        in_sync: true,
        reason: None,
    })
}

/// The regenerate hook: record the current inputs as the new stamp.
pub fn generate(layout: &Layout) -> Result<SkillsState> {
    let state = SkillsState {
        engine_version: engine_version(layout),
        overrides_sha256: overrides_digest(layout)?,
        generated_at: Utc::now(),
    };
    io::write_json(&layout.skills_state(), &state)?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn out_of_sync_until_generated() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        io::atomic_write(&layout.engine_version_file(), b"1.0.0\n").unwrap();

        assert!(!check_sync(&layout).unwrap().in_sync);
        generate(&layout).unwrap();
        assert!(check_sync(&layout).unwrap().in_sync);
    }

    #[test]
    fn engine_version_change_breaks_sync() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        io::atomic_write(&layout.engine_version_file(), b"1.0.0\n").unwrap();
        generate(&layout).unwrap();

        io::atomic_write(&layout.engine_version_file(), b"1.1.0\n").unwrap();
        let sync = check_sync(&layout).unwrap();
        assert!(!sync.in_sync);
        assert_eq!(sync.reason.as_deref(), Some("engine version changed"));
    }

    #[test]
    fn override_change_breaks_sync() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        io::atomic_write(&layout.engine_version_file(), b"1.0.0\n").unwrap();
        generate(&layout).unwrap();

        io::atomic_write(&layout.local_skills_override().join("extra.md"), b"hi").unwrap();
        assert!(!check_sync(&layout).unwrap().in_sync);
    }
}
