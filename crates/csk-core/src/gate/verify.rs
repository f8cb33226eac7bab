use super::{write_proof, GateOutcome};
use crate::error::Result;
use crate::profile::Profile;
use crate::runner::{self, CommandOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One resolved command for this gate: argv, the directory it runs in, and
/// its timeout. Slice-level commands run in the module workdir; profile
/// commands may select the repository root instead.
#[derive(Debug, Clone)]
pub struct CommandPlan {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyProof {
    pub task_id: String,
    pub slice_id: String,
    pub passed: bool,
    pub executed_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub commands: Vec<CommandOutcome>,
    pub checked_at: DateTime<Utc>,
}

/// Run the verify commands sequentially, each under the policy and its own
/// timeout, appending output to the per-slice verify log.
///
/// `passed = all exit codes zero and executed_count > 0` when the gate is
/// required; a required gate with zero commands fails with
/// `verify_config_missing` recorded in the proof.
pub fn run_verify(
    task_id: &str,
    slice_id: &str,
    slice_proof_dir: &Path,
    task_run_dir: &Path,
    commands: &[CommandPlan],
    required: bool,
    profile: &Profile,
) -> Result<(VerifyProof, GateOutcome)> {
    // Policy is enforced before anything is spawned: one rejected command
    // fails the whole gate.
    for plan in commands {
        runner::check_argv(&plan.argv)?;
        runner::check_policy(&plan.argv, profile)?;
    }

    let log_path = runner::slice_log_path(task_run_dir, slice_id, "verify");
    let mut outcomes: Vec<CommandOutcome> = Vec::new();
    let mut all_ok = true;
    for plan in commands {
        let outcome = runner::run_command(&plan.argv, &plan.cwd, plan.timeout, &log_path)?;
        all_ok = all_ok && outcome.passed();
        outcomes.push(outcome);
    }

    let executed_count = outcomes.len();
    let mut failure_reason = None;
    let mut passed = all_ok && executed_count > 0;
    if required && executed_count == 0 {
        passed = false;
        failure_reason = Some("verify_config_missing".to_string());
    }
    if !required && executed_count == 0 {
        // Optional gate with nothing to run: vacuously true, but recorded
        // with executed_count = 0 so READY coverage checks see it.
        passed = true;
    }

    let proof = VerifyProof {
        task_id: task_id.to_string(),
        slice_id: slice_id.to_string(),
        passed,
        executed_count,
        failure_reason,
        commands: outcomes,
        checked_at: Utc::now(),
    };
    let proof_path = write_proof(slice_proof_dir, "verify.json", &proof)?;
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

    fn plan(dir: &TempDir, items: &[&str]) -> CommandPlan {
        CommandPlan {
            argv: items.iter().map(|s| s.to_string()).collect(),
            cwd: dir.path().to_path_buf(),
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn passing_command_passes_gate() {
        let dir = TempDir::new().unwrap();
        let proofs = dir.path().join("proofs/S-0001");
        let (proof, outcome) = run_verify(
            "T-0001",
            "S-0001",
            &proofs,
            dir.path(),
            &[plan(&dir, &["python3", "-c", "print('ok')"])],
            true,
            &Profile::default(),
        )
        .unwrap();
        assert!(proof.passed);
        assert_eq!(proof.executed_count, 1);
        assert_eq!(proof.commands[0].exit_code, 0);
        assert!(outcome.proof_path.exists());
        assert!(dir.path().join("logs/S-0001/verify.log").exists());
    }

    #[test]
    fn failing_command_fails_gate_but_writes_proof() {
        let dir = TempDir::new().unwrap();
        let proofs = dir.path().join("proofs/S-0001");
        let (proof, _) = run_verify(
            "T-0001",
            "S-0001",
            &proofs,
            dir.path(),
            &[plan(&dir, &["python3", "-c", "raise SystemExit(3)"])],
            true,
            &Profile::default(),
        )
        .unwrap();
        assert!(!proof.passed);
        assert_eq!(proof.commands[0].exit_code, 3);
        assert!(proofs.join("verify.json").exists());
    }

    #[test]
    fn required_with_zero_commands_is_config_missing() {
        let dir = TempDir::new().unwrap();
        let proofs = dir.path().join("proofs/S-0001");
        let (proof, _) = run_verify(
            "T-0001",
            "S-0001",
            &proofs,
            dir.path(),
            &[],
            true,
            &Profile::default(),
        )
        .unwrap();
        assert!(!proof.passed);
        assert_eq!(proof.failure_reason.as_deref(), Some("verify_config_missing"));
        assert_eq!(proof.executed_count, 0);
    }

    #[test]
    fn denied_head_fails_before_spawn() {
        let dir = TempDir::new().unwrap();
        let proofs = dir.path().join("proofs/S-0001");
        let err = run_verify(
            "T-0001",
            "S-0001",
            &proofs,
            dir.path(),
            &[plan(&dir, &["curl", "http://example.com"])],
            true,
            &Profile::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "command_denied");
    }

    #[test]
    fn pipeline_tokens_rejected_at_parse() {
        let dir = TempDir::new().unwrap();
        let proofs = dir.path().join("proofs/S-0001");
        let err = run_verify(
            "T-0001",
            "S-0001",
            &proofs,
            dir.path(),
            &[plan(&dir, &["echo", "a", "|", "grep", "a"])],
            true,
            &Profile::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "command_denied");
    }

    #[test]
    fn commands_run_in_their_own_cwd() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir_all(&sub).unwrap();
        let proofs = dir.path().join("proofs/S-0001");
        let plan = CommandPlan {
            argv: vec![
                "python3".to_string(),
                "-c".to_string(),
                "open('here.txt', 'w').write('x')".to_string(),
            ],
            cwd: sub.clone(),
            timeout: Duration::from_secs(30),
        };
        let (proof, _) = run_verify(
            "T-0001",
            "S-0001",
            &proofs,
            dir.path(),
            &[plan],
            true,
            &Profile::default(),
        )
        .unwrap();
        assert!(proof.passed);
        assert!(sub.join("here.txt").exists());
    }
}
