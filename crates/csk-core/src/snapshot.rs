//! Content snapshots of a module workdir, used by the scope gate when the
//! version-control wrapper cannot provide a changed-file list.

use crate::error::Result;
use crate::io::sha256_file;
use std::collections::BTreeMap;
use std::path::Path;

/// Relative path -> content hash for every file under `root`, skipping the
/// kernel's own state directories.
pub fn take_snapshot(root: &Path) -> Result<BTreeMap<String, String>> {
    let mut snapshot = BTreeMap::new();
    if !root.exists() {
        return Ok(snapshot);
    }
    walk(root, root, &mut snapshot)?;
    Ok(snapshot)
}

fn walk(root: &Path, dir: &Path, snapshot: &mut BTreeMap<String, String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() {
            if name == ".csk" || name == ".git" {
                continue;
            }
            walk(root, &path, snapshot)?;
        } else if path.is_file() {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            snapshot.insert(rel, sha256_file(&path)?);
        }
    }
    Ok(())
}

/// Paths added, removed, or modified between two snapshots, sorted.
pub fn changed_files(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut changed: Vec<String> = Vec::new();
    for (path, hash) in before {
        match after.get(path) {
            None => changed.push(path.clone()),
            Some(new_hash) if new_hash != hash => changed.push(path.clone()),
            _ => {}
        }
    }
    for path in after.keys() {
        if !before.contains_key(path) {
            changed.push(path.clone());
        }
    }
    changed.sort();
    changed.dedup();
    changed
}

/// Ask git for changed files inside `workdir` (staged and unstaged, plus
/// untracked). Returns `None` when git is unavailable or `workdir` is not
/// inside a repository, letting callers fall back to snapshot diffing.
pub fn changed_files_via_git(workdir: &Path) -> Option<Vec<String>> {
    let output = std::process::Command::new("git")
        .arg("-C")
        .arg(workdir)
        .args(["status", "--porcelain"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let mut files: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            if line.len() < 4 {
                return None;
            }
            // Porcelain v1: two status columns, space, then the path. Renames
            // list "old -> new"; the new path is the changed one.
            let path = line[3..].trim();
            let path = path.rsplit(" -> ").next().unwrap_or(path);
            Some(path.trim_matches('"').to_string())
        })
        .filter(|p| !p.starts_with(".csk/"))
        .collect();
    files.sort();
    files.dedup();
    Some(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn detects_added_modified_removed() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "a").unwrap();
        std::fs::write(dir.path().join("src/b.rs"), "b").unwrap();
        let before = take_snapshot(dir.path()).unwrap();

        std::fs::write(dir.path().join("src/a.rs"), "a2").unwrap();
        std::fs::remove_file(dir.path().join("src/b.rs")).unwrap();
        std::fs::write(dir.path().join("src/c.rs"), "c").unwrap();
        let after = take_snapshot(dir.path()).unwrap();

        assert_eq!(
            changed_files(&before, &after),
            vec!["src/a.rs", "src/b.rs", "src/c.rs"]
        );
    }

    #[test]
    fn ignores_state_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".csk/app")).unwrap();
        std::fs::write(dir.path().join(".csk/app/registry.json"), "{}").unwrap();
        std::fs::write(dir.path().join("kept.txt"), "x").unwrap();
        let snapshot = take_snapshot(dir.path()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("kept.txt"));
    }

    #[test]
    fn unchanged_tree_diffs_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.txt"), "same").unwrap();
        let before = take_snapshot(dir.path()).unwrap();
        let after = take_snapshot(dir.path()).unwrap();
        assert!(changed_files(&before, &after).is_empty());
    }
}
