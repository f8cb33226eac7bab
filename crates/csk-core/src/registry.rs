use crate::error::{CskError, Result};
use crate::io;
use crate::paths::{self, Layout};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ModuleRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleRecord {
    pub module_id: String,
    /// Repository-relative path; `"."` is the repository root.
    pub path: String,
    pub registered: bool,
    pub initialized: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModuleRecord {
    fn new(module_id: impl Into<String>, path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            module_id: module_id.into(),
            path: path.into(),
            registered: true,
            initialized: false,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub modules: Vec<ModuleRecord>,
    pub updated_at: DateTime<Utc>,
}

fn default_schema_version() -> String {
    "1".to_string()
}

impl Registry {
    pub fn new() -> Self {
        Self {
            schema_version: default_schema_version(),
            modules: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn load(layout: &Layout) -> Result<Self> {
        let path = layout.registry();
        if !path.exists() {
            return Err(CskError::NotBootstrapped);
        }
        io::read_json(&path)
    }

    pub fn save(&mut self, layout: &Layout) -> Result<()> {
        self.updated_at = Utc::now();
        io::write_json(&layout.registry(), self)
    }

    pub fn module(&self, module_id: &str) -> Result<&ModuleRecord> {
        self.modules
            .iter()
            .find(|m| m.module_id == module_id)
            .ok_or_else(|| CskError::ModuleNotFound(module_id.to_string()))
    }

    pub fn module_by_path(&self, path: &str) -> Option<&ModuleRecord> {
        self.modules.iter().find(|m| m.path == path)
    }

    fn module_mut(&mut self, module_id: &str) -> Result<&mut ModuleRecord> {
        self.modules
            .iter_mut()
            .find(|m| m.module_id == module_id)
            .ok_or_else(|| CskError::ModuleNotFound(module_id.to_string()))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Register a module under an explicit `(module_id, path)` pair. Re-adding
/// an already registered path is a no-op; a duplicate id on a different
/// path fails.
pub fn module_add(layout: &Layout, module_id: &str, path: &str) -> Result<(ModuleRecord, bool)> {
    let normalized = paths::normalize_module_path(path)?;
    let mut registry = Registry::load(layout)?;

    if let Some(existing) = registry.module_by_path(&normalized) {
        return Ok((existing.clone(), false));
    }
    if registry.module(module_id).is_ok() {
        return Err(CskError::ModuleExists(module_id.to_string()));
    }

    let record = ModuleRecord::new(module_id, normalized);
    registry.modules.push(record.clone());
    registry.save(layout)?;
    Ok((record, true))
}

/// Create the per-module scaffold (tasks root, run root, module agents file)
/// and mark the module initialized. Observable on disk, idempotent.
pub fn module_init(layout: &Layout, module_id: &str) -> Result<ModuleRecord> {
    let mut registry = Registry::load(layout)?;
    let record = registry.module(module_id)?.clone();

    io::ensure_dir(&layout.module_tasks(&record.path))?;
    io::ensure_dir(&layout.module_run(&record.path))?;

    let agents = layout.module_csk(&record.path).join("AGENTS.md");
    io::write_if_missing(
        &agents,
        format!("# AGENTS.md ({module_id})\n\nUse `csk` from the repository root.\n").as_bytes(),
    )?;

    let record = {
        let module = registry.module_mut(module_id)?;
        module.initialized = true;
        module.updated_at = Utc::now();
        module.clone()
    };
    registry.save(layout)?;
    Ok(record)
}

/// Persist an externally detected candidate map. Each pair is validated the
/// same way as an explicit `module add`; pairs whose path is already
/// registered are skipped. Returns the newly created records.
pub fn registry_apply(
    layout: &Layout,
    candidates: &[(String, String)],
) -> Result<Vec<ModuleRecord>> {
    let mut created = Vec::new();
    for (module_id, path) in candidates {
        let (record, was_created) = module_add(layout, module_id, path)?;
        if was_created {
            created.push(record);
        }
    }
    Ok(created)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bootstrapped() -> (TempDir, Layout) {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        let mut registry = Registry::new();
        registry.save(&layout).unwrap();
        (dir, layout)
    }

    #[test]
    fn load_without_bootstrap_fails() {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        assert!(matches!(
            Registry::load(&layout),
            Err(CskError::NotBootstrapped)
        ));
    }

    #[test]
    fn add_and_init_module() {
        let (_dir, layout) = bootstrapped();
        let (record, created) = module_add(&layout, "api", "src/api").unwrap();
        assert!(created);
        assert!(record.registered);
        assert!(!record.initialized);

        let record = module_init(&layout, "api").unwrap();
        assert!(record.initialized);
        assert!(layout.module_tasks("src/api").is_dir());
        assert!(layout.module_csk("src/api").join("AGENTS.md").exists());
    }

    #[test]
    fn readding_same_path_is_noop() {
        let (_dir, layout) = bootstrapped();
        module_add(&layout, "api", "src/api").unwrap();
        let (_, created) = module_add(&layout, "api", "src/api").unwrap();
        assert!(!created);
        assert_eq!(Registry::load(&layout).unwrap().modules.len(), 1);
    }

    #[test]
    fn duplicate_id_different_path_fails() {
        let (_dir, layout) = bootstrapped();
        module_add(&layout, "api", "src/api").unwrap();
        assert!(matches!(
            module_add(&layout, "api", "src/other"),
            Err(CskError::ModuleExists(_))
        ));
    }

    #[test]
    fn apply_detected_candidates() {
        let (_dir, layout) = bootstrapped();
        module_add(&layout, "api", "src/api").unwrap();
        let created = registry_apply(
            &layout,
            &[
                ("api2".to_string(), "src/api".to_string()),
                ("web".to_string(), "src/web".to_string()),
            ],
        )
        .unwrap();
        // src/api already registered, only src/web is new
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].module_id, "web");
    }

    #[test]
    fn rejects_escaping_paths() {
        let (_dir, layout) = bootstrapped();
        assert!(module_add(&layout, "bad", "../outside").is_err());
    }
}
