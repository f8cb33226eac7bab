use crate::error::Result;
use crate::io;
use crate::paths::Layout;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// VerifyCommand
// ---------------------------------------------------------------------------

/// Where a profile command runs relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCwd {
    #[default]
    Worktree,
    Repo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyCommand {
    pub name: String,
    pub argv: Vec<String>,
    #[serde(default)]
    pub cwd: CommandCwd,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
}

fn default_timeout_sec() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub verify_commands: Vec<VerifyCommand>,
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
    #[serde(default)]
    pub user_check_required: bool,
    #[serde(default)]
    pub e2e_required_default: bool,
    #[serde(default)]
    pub e2e_commands: Vec<VerifyCommand>,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_denylist() -> Vec<String> {
    ["rm", "sudo", "curl", "wget"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: default_name(),
            verify_commands: Vec::new(),
            allowlist: Vec::new(),
            denylist: default_denylist(),
            user_check_required: false,
            e2e_required_default: false,
            e2e_commands: Vec::new(),
        }
    }
}

/// Partial profile as written in an override file. Absent fields inherit
/// from the base; `verify_commands` replaces the base list wholesale when
/// present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileOverride {
    pub name: Option<String>,
    pub verify_commands: Option<Vec<VerifyCommand>>,
    pub allowlist: Option<Vec<String>>,
    pub denylist: Option<Vec<String>>,
    pub user_check_required: Option<bool>,
    pub e2e_required_default: Option<bool>,
    pub e2e_commands: Option<Vec<VerifyCommand>>,
}

/// Field-by-field merge; a pure function of the two records.
pub fn merge_profile(base: &Profile, over: &ProfileOverride) -> Profile {
    Profile {
        name: over.name.clone().unwrap_or_else(|| base.name.clone()),
        verify_commands: over
            .verify_commands
            .clone()
            .unwrap_or_else(|| base.verify_commands.clone()),
        allowlist: over
            .allowlist
            .clone()
            .unwrap_or_else(|| base.allowlist.clone()),
        denylist: over
            .denylist
            .clone()
            .unwrap_or_else(|| base.denylist.clone()),
        user_check_required: over
            .user_check_required
            .unwrap_or(base.user_check_required),
        e2e_required_default: over
            .e2e_required_default
            .unwrap_or(base.e2e_required_default),
        e2e_commands: over
            .e2e_commands
            .clone()
            .unwrap_or_else(|| base.e2e_commands.clone()),
    }
}

/// Load the merged profile `name`: engine defaults overlaid by the local
/// profile file when present. A missing local file inherits everything.
pub fn load_profile(layout: &Layout, name: &str) -> Result<Profile> {
    let mut profile = Profile {
        name: name.to_string(),
        ..Default::default()
    };

    let engine_path = layout.engine().join("profiles").join(format!("{name}.json"));
    if engine_path.exists() {
        let over: ProfileOverride = io::read_json(&engine_path)?;
        profile = merge_profile(&profile, &over);
    }

    let local_path = layout.local_profiles().join(format!("{name}.json"));
    if local_path.exists() {
        let over: ProfileOverride = io::read_json(&local_path)?;
        profile = merge_profile(&profile, &over);
    }

    Ok(profile)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cmd(name: &str, argv: &[&str]) -> VerifyCommand {
        VerifyCommand {
            name: name.to_string(),
            argv: argv.iter().map(|s| s.to_string()).collect(),
            cwd: CommandCwd::Worktree,
            timeout_sec: 300,
        }
    }

    #[test]
    fn default_denylist_present() {
        let profile = Profile::default();
        assert!(profile.denylist.contains(&"rm".to_string()));
        assert!(profile.denylist.contains(&"sudo".to_string()));
        assert!(!profile.user_check_required);
    }

    #[test]
    fn merge_replaces_verify_commands_wholesale() {
        let base = Profile {
            verify_commands: vec![cmd("test", &["cargo", "test"]), cmd("lint", &["cargo", "clippy"])],
            ..Default::default()
        };
        let over = ProfileOverride {
            verify_commands: Some(vec![cmd("check", &["python", "-m", "pytest"])]),
            ..Default::default()
        };
        let merged = merge_profile(&base, &over);
        assert_eq!(merged.verify_commands.len(), 1);
        assert_eq!(merged.verify_commands[0].name, "check");
    }

    #[test]
    fn merge_inherits_absent_fields() {
        let base = Profile {
            user_check_required: true,
            verify_commands: vec![cmd("test", &["cargo", "test"])],
            ..Default::default()
        };
        let merged = merge_profile(&base, &ProfileOverride::default());
        assert!(merged.user_check_required);
        assert_eq!(merged.verify_commands.len(), 1);
    }

    #[test]
    fn local_overrides_engine_defaults() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());

        crate::io::write_json(
            &layout.engine().join("profiles/default.json"),
            &serde_json::json!({
                "verify_commands": [
                    {"name": "unit", "argv": ["cargo", "test"], "timeout_sec": 120}
                ],
                "user_check_required": false,
            }),
        )
        .unwrap();
        crate::io::write_json(
            &layout.local_profiles().join("default.json"),
            &serde_json::json!({"user_check_required": true}),
        )
        .unwrap();

        let profile = load_profile(&layout, "default").unwrap();
        assert!(profile.user_check_required);
        // Inherited from engine layer
        assert_eq!(profile.verify_commands.len(), 1);
        assert_eq!(profile.verify_commands[0].timeout_sec, 120);
        // Built-in denylist survives both layers
        assert!(profile.denylist.contains(&"curl".to_string()));
    }

    #[test]
    fn missing_files_yield_defaults() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        let profile = load_profile(&layout, "default").unwrap();
        assert_eq!(profile, Profile::default());
    }

    #[test]
    fn override_rejects_unknown_fields() {
        let raw = serde_json::json!({"verifyCommands": []});
        assert!(serde_json::from_value::<ProfileOverride>(raw).is_err());
    }
}
