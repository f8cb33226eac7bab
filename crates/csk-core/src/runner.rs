//! Subprocess execution for verify/implement/e2e commands.
//!
//! Commands are argv arrays and are never passed through a shell. Shell
//! control tokens are rejected at parse time, the command head is checked
//! against the profile allow/deny policy, and stdout/stderr are drained by
//! dedicated threads into a per-slice log file while an mpsc waiter enforces
//! the timeout.

use crate::error::{CskError, Result};
use crate::profile::Profile;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Exit code recorded when a command is killed on timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const SHELL_TOKENS: [&str; 4] = ["|", ";", "&&", "||"];

// ---------------------------------------------------------------------------
// CommandOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub argv: Vec<String>,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub log_path: String,
    #[serde(default)]
    pub timed_out: bool,
}

impl CommandOutcome {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

// ---------------------------------------------------------------------------
// Policy and parse checks
// ---------------------------------------------------------------------------

/// Reject argv vectors that smuggle shell syntax. Every element is checked:
/// pipelines and command chaining have no meaning in argv form and indicate
/// a copy-pasted shell line.
pub fn check_argv(argv: &[String]) -> Result<()> {
    if argv.is_empty() {
        return Err(CskError::CommandRejected {
            argv: String::new(),
            reason: "empty argv".to_string(),
        });
    }
    for element in argv {
        if SHELL_TOKENS.contains(&element.as_str()) {
            return Err(CskError::CommandRejected {
                argv: argv.join(" "),
                reason: format!("shell token '{element}' is not allowed"),
            });
        }
    }
    Ok(())
}

/// Apply the allow/deny policy to the command head. Deny wins; a non-empty
/// allowlist restricts heads to its members.
pub fn check_policy(argv: &[String], profile: &Profile) -> Result<()> {
    let head = argv.first().map(String::as_str).unwrap_or_default();
    let head_name = Path::new(head)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| head.to_string());

    if profile.denylist.iter().any(|d| d == &head_name) {
        return Err(CskError::CommandDenied(head_name));
    }
    if !profile.allowlist.is_empty() && !profile.allowlist.iter().any(|a| a == &head_name) {
        return Err(CskError::CommandDenied(head_name));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Run one argv command with `cwd` and a timeout, appending combined
/// stdout/stderr to `log_path`. The process is killed on timeout and the
/// outcome records exit code 124.
pub fn run_command(
    argv: &[String],
    cwd: &Path,
    timeout: Duration,
    log_path: &Path,
) -> Result<CommandOutcome> {
    check_argv(argv)?;

    let head = &argv[0];
    if which::which(head).is_err() {
        return Err(CskError::CommandNotFound(head.clone()));
    }

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let start = Instant::now();
    let mut child = Command::new(head)
        .args(&argv[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let child_pid = child.id();

    // Drain pipes in dedicated threads so a chatty command cannot deadlock
    // on a full pipe buffer.
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_thread = std::thread::spawn(move || drain(stdout_handle));
    let stderr_thread = std::thread::spawn(move || drain(stderr_handle));

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(child.wait());
    });

    let (exit_code, timed_out) = match rx.recv_timeout(timeout) {
        Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
        Ok(Err(e)) => return Err(CskError::Io(e)),
        Err(_) => {
            kill_process(child_pid);
            (TIMEOUT_EXIT_CODE, true)
        }
    };

    let stdout_buf = stdout_thread.join().unwrap_or_default();
    let stderr_buf = stderr_thread.join().unwrap_or_default();
    let duration_ms = start.elapsed().as_millis() as u64;
    tracing::debug!(command = %argv.join(" "), exit_code, duration_ms, timed_out, "command finished");

    append_log(log_path, argv, exit_code, timed_out, &stdout_buf, &stderr_buf)?;

    Ok(CommandOutcome {
        argv: argv.to_vec(),
        exit_code,
        duration_ms,
        log_path: log_path.display().to_string(),
        timed_out,
    })
}

fn drain(handle: Option<impl Read>) -> String {
    let mut buf = String::new();
    if let Some(mut reader) = handle {
        let _ = reader.read_to_string(&mut buf);
    }
    buf
}

fn append_log(
    log_path: &Path,
    argv: &[String],
    exit_code: i32,
    timed_out: bool,
    stdout: &str,
    stderr: &str,
) -> Result<()> {
    use std::io::Write as _;
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    writeln!(f, "$ {}", argv.join(" "))?;
    if !stdout.is_empty() {
        writeln!(f, "{}", stdout.trim_end())?;
    }
    if !stderr.is_empty() {
        writeln!(f, "{}", stderr.trim_end())?;
    }
    if timed_out {
        writeln!(f, "[timed out, killed]")?;
    }
    writeln!(f, "[exit {exit_code}]")?;
    Ok(())
}

/// Terminate a process by PID. Best-effort; errors are ignored.
fn kill_process(pid: u32) {
    let _ = Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

/// Resolve the effective log file for a slice command sequence.
pub fn slice_log_path(task_run_dir: &Path, slice_id: &str, stage: &str) -> PathBuf {
    task_run_dir
        .join("logs")
        .join(slice_id)
        .join(format!("{stage}.log"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rejects_shell_tokens() {
        for bad in [
            argv(&["sh", "-c", "a", "|", "b"]),
            argv(&["echo", "x", "&&", "echo", "y"]),
            argv(&["true", ";", "false"]),
        ] {
            let err = check_argv(&bad).unwrap_err();
            assert_eq!(err.kind(), "command_denied");
        }
        assert!(check_argv(&argv(&["echo", "a|b-inside-word"])).is_ok());
    }

    #[test]
    fn rejects_empty_argv() {
        assert!(check_argv(&[]).is_err());
    }

    #[test]
    fn denylist_blocks_head() {
        let profile = Profile::default();
        let err = check_policy(&argv(&["rm", "-rf", "/"]), &profile).unwrap_err();
        assert_eq!(err.kind(), "command_denied");
        // Path form of a denied head is still denied
        assert!(check_policy(&argv(&["/usr/bin/curl", "x"]), &profile).is_err());
        assert!(check_policy(&argv(&["echo", "ok"]), &profile).is_ok());
    }

    #[test]
    fn allowlist_restricts_heads() {
        let profile = Profile {
            allowlist: vec!["python3".to_string()],
            ..Default::default()
        };
        assert!(check_policy(&argv(&["python3", "-c", "1"]), &profile).is_ok());
        assert!(check_policy(&argv(&["echo", "x"]), &profile).is_err());
    }

    #[test]
    fn runs_command_and_captures_log() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("logs/S-0001/verify.log");
        let outcome = run_command(
            &argv(&["echo", "hello"]),
            dir.path(),
            Duration::from_secs(10),
            &log,
        )
        .unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.passed());
        assert!(!outcome.timed_out);
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("hello"));
        assert!(content.contains("[exit 0]"));
    }

    #[test]
    fn nonzero_exit_recorded() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("fail.log");
        let outcome = run_command(&argv(&["false"]), dir.path(), Duration::from_secs(10), &log)
            .unwrap();
        assert_ne!(outcome.exit_code, 0);
        assert!(!outcome.passed());
    }

    #[test]
    fn timeout_kills_and_records_124() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("slow.log");
        let outcome = run_command(
            &argv(&["sleep", "30"]),
            dir.path(),
            Duration::from_millis(200),
            &log,
        )
        .unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
        assert!(std::fs::read_to_string(&log).unwrap().contains("timed out"));
    }

    #[test]
    fn missing_command_is_command_not_found() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("x.log");
        let err = run_command(
            &argv(&["definitely-not-a-real-binary-xyz"]),
            dir.path(),
            Duration::from_secs(1),
            &log,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "command_not_found");
    }
}
