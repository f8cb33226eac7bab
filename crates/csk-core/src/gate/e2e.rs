use super::{write_proof, GateOutcome};
use crate::error::Result;
use crate::profile::Profile;
use crate::runner::{self, CommandOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct E2eProof {
    pub task_id: String,
    pub slice_id: String,
    pub passed: bool,
    pub commands: Vec<CommandOutcome>,
    pub checked_at: DateTime<Utc>,
}

/// Run end-to-end commands with the same argv discipline as verify.
/// Only called when the slice or merged profile requires e2e.
#[allow(clippy::too_many_arguments)]
pub fn run_e2e(
    task_id: &str,
    slice_id: &str,
    slice_proof_dir: &Path,
    task_run_dir: &Path,
    workdir: &Path,
    commands: &[Vec<String>],
    profile: &Profile,
    timeout_sec: u64,
) -> Result<(E2eProof, GateOutcome)> {
    for argv in commands {
        runner::check_argv(argv)?;
        runner::check_policy(argv, profile)?;
    }

    let log_path = runner::slice_log_path(task_run_dir, slice_id, "e2e");
    let mut outcomes: Vec<CommandOutcome> = Vec::new();
    let mut all_ok = true;
    for argv in commands {
        let outcome = runner::run_command(argv, workdir, Duration::from_secs(timeout_sec), &log_path)?;
        all_ok = all_ok && outcome.passed();
        outcomes.push(outcome);
    }

    let proof = E2eProof {
        task_id: task_id.to_string(),
        slice_id: slice_id.to_string(),
        passed: all_ok && !outcomes.is_empty(),
        commands: outcomes,
        checked_at: Utc::now(),
    };
    let proof_path = write_proof(slice_proof_dir, "e2e.json", &proof)?;
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

    #[test]
    fn passing_e2e() {
        let dir = TempDir::new().unwrap();
        let proofs = dir.path().join("proofs/S-0001");
        let (proof, _) = run_e2e(
            "T-0001",
            "S-0001",
            &proofs,
            dir.path(),
            dir.path(),
            &[vec!["true".to_string()]],
            &Profile::default(),
            30,
        )
        .unwrap();
        assert!(proof.passed);
    }

    #[test]
    fn empty_commands_never_pass() {
        let dir = TempDir::new().unwrap();
        let proofs = dir.path().join("proofs/S-0001");
        let (proof, _) = run_e2e(
            "T-0001",
            "S-0001",
            &proofs,
            dir.path(),
            dir.path(),
            &[],
            &Profile::default(),
            30,
        )
        .unwrap();
        assert!(!proof.passed);
    }
}
