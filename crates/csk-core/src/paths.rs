use crate::error::{CskError, Result};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CSK_DIR: &str = ".csk";
pub const ENGINE_DIR: &str = ".csk/engine";
pub const LOCAL_DIR: &str = ".csk/local";
pub const APP_DIR: &str = ".csk/app";
pub const WORKTREES_DIR: &str = ".csk/worktrees";

pub const VERSION_FILE: &str = ".csk/engine/VERSION";
pub const LOCAL_CONFIG_FILE: &str = ".csk/local/config.json";
pub const REGISTRY_FILE: &str = ".csk/app/registry.json";
pub const EVENTLOG_FILE: &str = ".csk/app/eventlog";

pub const ENV_STATE_ROOT: &str = "CSK_STATE_ROOT";

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Resolved state-root layout. Every durable path in the kernel is derived
/// from this handle; operations never consult the process working directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn csk(&self) -> PathBuf {
        self.root.join(CSK_DIR)
    }

    pub fn engine(&self) -> PathBuf {
        self.root.join(ENGINE_DIR)
    }

    pub fn engine_version_file(&self) -> PathBuf {
        self.root.join(VERSION_FILE)
    }

    pub fn local(&self) -> PathBuf {
        self.root.join(LOCAL_DIR)
    }

    pub fn local_config(&self) -> PathBuf {
        self.root.join(LOCAL_CONFIG_FILE)
    }

    pub fn local_profiles(&self) -> PathBuf {
        self.local().join("profiles")
    }

    pub fn local_skills_override(&self) -> PathBuf {
        self.local().join("skills_override")
    }

    pub fn local_patches(&self) -> PathBuf {
        self.local().join("patches")
    }

    pub fn app(&self) -> PathBuf {
        self.root.join(APP_DIR)
    }

    pub fn registry(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    pub fn eventlog(&self) -> PathBuf {
        self.root.join(EVENTLOG_FILE)
    }

    pub fn app_incidents(&self) -> PathBuf {
        self.app().join("logs").join("incidents.jsonl")
    }

    pub fn skills_state(&self) -> PathBuf {
        self.app().join("skills_state.json")
    }

    pub fn missions(&self) -> PathBuf {
        self.app().join("missions")
    }

    pub fn mission_dir(&self, mission_id: &str) -> PathBuf {
        self.missions().join(mission_id)
    }

    pub fn worktrees(&self) -> PathBuf {
        self.root.join(WORKTREES_DIR)
    }

    pub fn worktree_dir(&self, mission_id: &str, module_id: &str) -> PathBuf {
        self.worktrees().join(mission_id).join(module_id)
    }

    // -----------------------------------------------------------------------
    // Per-module paths
    // -----------------------------------------------------------------------

    pub fn module_root(&self, module_path: &str) -> PathBuf {
        if module_path == "." {
            self.root.clone()
        } else {
            self.root.join(module_path)
        }
    }

    pub fn module_csk(&self, module_path: &str) -> PathBuf {
        let modules = self.root.join(CSK_DIR).join("modules");
        if module_path == "." {
            modules.join("root")
        } else {
            modules.join(module_path)
        }
    }

    pub fn module_tasks(&self, module_path: &str) -> PathBuf {
        self.module_csk(module_path).join("tasks")
    }

    pub fn module_run(&self, module_path: &str) -> PathBuf {
        self.module_csk(module_path).join("run")
    }

    pub fn task_dir(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.module_tasks(module_path).join(task_id)
    }

    pub fn task_run_dir(&self, module_path: &str, task_id: &str) -> PathBuf {
        self.module_run(module_path).join("tasks").join(task_id)
    }
}

// ---------------------------------------------------------------------------
// Module path normalisation
// ---------------------------------------------------------------------------

/// Normalise a repository-relative module path. Rejects absolute paths and
/// any `..` component; `""` and `"."` normalise to `"."`.
pub fn normalize_module_path(raw: &str) -> Result<String> {
    let cleaned = raw.trim().replace('\\', "/");
    if cleaned.is_empty() || cleaned == "." {
        return Ok(".".to_string());
    }
    if cleaned.starts_with('/') {
        return Err(CskError::InvalidModulePath(raw.to_string()));
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in cleaned.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(CskError::InvalidModulePath(raw.to_string())),
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Ok(".".to_string());
    }
    Ok(parts.join("/"))
}

// ---------------------------------------------------------------------------
// State root resolution
// ---------------------------------------------------------------------------

/// Resolve the state root.
///
/// Priority:
/// 1. explicit argument (`--state-root` flag)
/// 2. `CSK_STATE_ROOT` environment variable
/// 3. Walk upward from `cwd` looking for `.csk/`
/// 4. Walk upward from `cwd` looking for `.git/`
/// 5. Fall back to `cwd`
pub fn resolve_state_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(env_root) = std::env::var(ENV_STATE_ROOT) {
        if !env_root.is_empty() {
            return PathBuf::from(env_root);
        }
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    for marker in [CSK_DIR, ".git"] {
        let mut dir = cwd.clone();
        loop {
            if dir.join(marker).is_dir() {
                return dir;
            }
            match dir.parent() {
                Some(p) => dir = p.to_path_buf(),
                None => break,
            }
        }
    }

    cwd
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
