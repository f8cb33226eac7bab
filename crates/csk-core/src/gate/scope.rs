use super::{write_proof, GateOutcome};
use crate::error::{CskError, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeProof {
    pub task_id: String,
    pub slice_id: String,
    pub passed: bool,
    pub allowed_paths: Vec<String>,
    pub forbidden_paths: Vec<String>,
    pub changed_files: Vec<String>,
    pub violations: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| CskError::SchemaViolation {
            path: "allowed_paths".to_string(),
            reason: format!("invalid glob '{pattern}': {e}"),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| CskError::SchemaViolation {
        path: "allowed_paths".to_string(),
        reason: e.to_string(),
    })
}

/// Check every changed path against the slice's doublestar globs. A path
/// passes when it matches at least one allowed pattern and no forbidden
/// pattern; forbidden wins. Writes `scope.json` either way.
pub fn check_scope(
    task_id: &str,
    slice_id: &str,
    slice_proof_dir: &Path,
    changed: &[String],
    allowed_paths: &[String],
    forbidden_paths: &[String],
) -> Result<(ScopeProof, GateOutcome)> {
    let allowed = build_globset(allowed_paths)?;
    let forbidden = build_globset(forbidden_paths)?;

    let mut violations: Vec<String> = Vec::new();
    for path in changed {
        let in_allowed = allowed.is_match(path);
        let in_forbidden = forbidden.is_match(path);
        if in_forbidden || !in_allowed {
            violations.push(path.clone());
        }
    }

    let proof = ScopeProof {
        task_id: task_id.to_string(),
        slice_id: slice_id.to_string(),
        passed: violations.is_empty(),
        allowed_paths: allowed_paths.to_vec(),
        forbidden_paths: forbidden_paths.to_vec(),
        changed_files: changed.to_vec(),
        violations,
        checked_at: Utc::now(),
    };
    let proof_path = write_proof(slice_proof_dir, "scope.json", &proof)?;
    let outcome = GateOutcome {
        passed: proof.passed,
        proof_path,
    };
    Ok((proof, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn changed_inside_allowed_passes() {
        let dir = TempDir::new().unwrap();
        let (proof, outcome) = check_scope(
            "T-0001",
            "S-0001",
            dir.path(),
            &strings(&["src/lib.rs", "src/api/mod.rs"]),
            &strings(&["src/**"]),
            &[],
        )
        .unwrap();
        assert!(proof.passed);
        assert!(outcome.passed);
        assert!(outcome.proof_path.exists());
    }

    #[test]
    fn change_outside_allowed_is_violation() {
        let dir = TempDir::new().unwrap();
        let (proof, _) = check_scope(
            "T-0001",
            "S-0001",
            dir.path(),
            &strings(&["src/lib.rs", "docs/readme.md"]),
            &strings(&["src/**"]),
            &[],
        )
        .unwrap();
        assert!(!proof.passed);
        assert_eq!(proof.violations, vec!["docs/readme.md"]);
        // Failed gate still wrote its proof
        assert!(dir.path().join("scope.json").exists());
    }

    #[test]
    fn forbidden_takes_precedence_over_allowed() {
        let dir = TempDir::new().unwrap();
        let (proof, _) = check_scope(
            "T-0001",
            "S-0001",
            dir.path(),
            &strings(&["src/generated/schema.rs"]),
            &strings(&["src/**"]),
            &strings(&["src/generated/**"]),
        )
        .unwrap();
        assert!(!proof.passed);
    }

    #[test]
    fn doublestar_matches_nested_paths() {
        let dir = TempDir::new().unwrap();
        let (proof, _) = check_scope(
            "T-0001",
            "S-0001",
            dir.path(),
            &strings(&["src/a/b/c/deep.rs"]),
            &strings(&["src/**"]),
            &[],
        )
        .unwrap();
        assert!(proof.passed);
    }

    #[test]
    fn no_changes_passes() {
        let dir = TempDir::new().unwrap();
        let (proof, _) =
            check_scope("T-0001", "S-0001", dir.path(), &[], &strings(&["src/**"]), &[]).unwrap();
        assert!(proof.passed);
        assert!(proof.changed_files.is_empty());
    }
}
