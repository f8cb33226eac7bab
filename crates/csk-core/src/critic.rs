//! Structural critic over a task's plan and slice breakdown.
//!
//! The critic is deterministic and purely structural: it never executes
//! anything. P0/P1 findings block freezing; P2/P3 are advisory.

use crate::profile::Profile;
use crate::slices::SlicesDoc;
use crate::types::GateKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Severity / Finding / CriticReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    P0,
    P1,
    P2,
    P3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticReport {
    pub task_id: String,
    pub p0: u32,
    pub p1: u32,
    pub p2: u32,
    pub p3: u32,
    pub passed: bool,
    pub findings: Vec<Finding>,
    pub reviewed_at: DateTime<Utc>,
}

impl CriticReport {
    pub fn blocking(&self) -> bool {
        self.p0 > 0 || self.p1 > 0
    }
}

// ---------------------------------------------------------------------------
// Critic
// ---------------------------------------------------------------------------

/// Run the structural critic over `plan` (markdown text) and `slices`,
/// with `profile` supplying fallback verify commands.
pub fn run_critic(
    task_id: &str,
    plan: &str,
    slices: &SlicesDoc,
    profile: &Profile,
) -> CriticReport {
    let mut findings: Vec<Finding> = Vec::new();
    let mut push = |severity: Severity, code: &str, slice_id: Option<&str>, message: String| {
        findings.push(Finding {
            severity,
            code: code.to_string(),
            slice_id: slice_id.map(|s| s.to_string()),
            message,
        });
    };

    // Plan sections
    if !has_heading(plan, "goal") {
        push(
            Severity::P0,
            "plan_goal_missing",
            None,
            "plan has no Goal section".to_string(),
        );
    }
    if !has_heading(plan, "acceptance") {
        push(
            Severity::P0,
            "plan_acceptance_missing",
            None,
            "plan has no Acceptance section".to_string(),
        );
    }
    if !has_heading(plan, "non-goals") && !has_heading(plan, "non-scope") {
        push(
            Severity::P2,
            "plan_non_goals_missing",
            None,
            "plan does not state what is out of scope".to_string(),
        );
    }

    // Slice structure
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let ids: BTreeSet<&str> = slices.slices.iter().map(|s| s.slice_id.as_str()).collect();
    for slice in &slices.slices {
        let id = slice.slice_id.as_str();
        if !seen.insert(id) {
            push(
                Severity::P1,
                "slice_id_duplicate",
                Some(id),
                format!("slice id {id} appears more than once"),
            );
        }

        if slice.requires(GateKind::Scope) && slice.allowed_paths.is_empty() {
            push(
                Severity::P0,
                "scope_config_missing",
                Some(id),
                format!("slice {id} requires scope but allowed_paths is empty"),
            );
        }
        if slice
            .allowed_paths
            .iter()
            .any(|p| p == "." || p == "**" || p == "/" || p == "**/*")
        {
            push(
                Severity::P1,
                "scope_too_broad",
                Some(id),
                format!("slice {id} allows the whole module root"),
            );
        }

        let slice_has_verify = slice
            .verify_commands
            .as_ref()
            .map(|cmds| !cmds.is_empty())
            .unwrap_or(false);
        if slice.requires(GateKind::Verify) && !slice_has_verify && profile.verify_commands.is_empty()
        {
            push(
                Severity::P0,
                "verify_config_missing",
                Some(id),
                format!("slice {id} requires verify but no commands are configured"),
            );
        }
        if !slice_has_verify && !slice.requires(GateKind::Verify) {
            push(
                Severity::P1,
                "verification_undocumented",
                Some(id),
                format!("slice {id} has no documented verification"),
            );
        }

        for dep in &slice.deps {
            if dep == id {
                push(
                    Severity::P0,
                    "dep_self",
                    Some(id),
                    format!("slice {id} depends on itself"),
                );
            } else if !ids.contains(dep.as_str()) {
                push(
                    Severity::P0,
                    "dep_undefined",
                    Some(id),
                    format!("slice {id} depends on undefined {dep}"),
                );
            }
        }

        if slice.title.trim().is_empty() || slice.title == format!("Slice {id}") {
            push(
                Severity::P3,
                "slice_title_stub",
                Some(id),
                format!("slice {id} still has a stub title"),
            );
        }
    }

    if let Some(on_cycle) = slices.find_cycle() {
        push(
            Severity::P0,
            "dep_cycle",
            Some(on_cycle.as_str()),
            format!("slice deps contain a cycle through {on_cycle}"),
        );
    }

    let count =
        |severity: Severity| findings.iter().filter(|f| f.severity == severity).count() as u32;
    let (p0, p1, p2, p3) = (
        count(Severity::P0),
        count(Severity::P1),
        count(Severity::P2),
        count(Severity::P3),
    );

    CriticReport {
        task_id: task_id.to_string(),
        p0,
        p1,
        p2,
        p3,
        passed: p0 == 0 && p1 == 0,
        findings,
        reviewed_at: Utc::now(),
    }
}

fn has_heading(plan: &str, name: &str) -> bool {
    plan.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with('#')
            && trimmed
                .trim_start_matches('#')
                .trim()
                .to_lowercase()
                .starts_with(name)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{CommandCwd, VerifyCommand};

    const GOOD_PLAN: &str = "# Plan\n\n## Goal\nShip it.\n\n## Non-goals\nNothing else.\n\n## Acceptance\nTests pass.\n";

    fn good_slices() -> SlicesDoc {
        let mut doc = SlicesDoc::stub(2);
        for slice in &mut doc.slices {
            slice.title = format!("real work {}", slice.slice_id);
            slice.allowed_paths = vec!["src/**".to_string()];
            slice.verify_commands = Some(vec![vec!["cargo".to_string(), "test".to_string()]]);
        }
        doc.slices[1].deps = vec!["S-0001".to_string()];
        doc
    }

    fn profile_with_verify() -> Profile {
        Profile {
            verify_commands: vec![VerifyCommand {
                name: "unit".to_string(),
                argv: vec!["cargo".to_string(), "test".to_string()],
                cwd: CommandCwd::Worktree,
                timeout_sec: 60,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn clean_plan_passes() {
        let report = run_critic("T-0001", GOOD_PLAN, &good_slices(), &Profile::default());
        assert_eq!(report.p0, 0, "findings: {:?}", report.findings);
        assert_eq!(report.p1, 0, "findings: {:?}", report.findings);
        assert!(report.passed);
    }

    #[test]
    fn missing_goal_and_acceptance_are_p0() {
        let report = run_critic("T-0001", "# Plan\njust prose\n", &good_slices(), &Profile::default());
        assert!(report.p0 >= 2);
        assert!(!report.passed);
        assert!(report.findings.iter().any(|f| f.code == "plan_goal_missing"));
        assert!(report
            .findings
            .iter()
            .any(|f| f.code == "plan_acceptance_missing"));
    }

    #[test]
    fn empty_allowed_paths_with_scope_is_p0() {
        let mut slices = good_slices();
        slices.slices[0].allowed_paths.clear();
        let report = run_critic("T-0001", GOOD_PLAN, &slices, &Profile::default());
        assert!(report
            .findings
            .iter()
            .any(|f| f.code == "scope_config_missing" && f.severity == Severity::P0));
    }

    #[test]
    fn missing_verify_commands_is_p0_without_profile_fallback() {
        let mut slices = good_slices();
        slices.slices[0].verify_commands = None;
        let report = run_critic("T-0001", GOOD_PLAN, &slices, &Profile::default());
        assert!(report
            .findings
            .iter()
            .any(|f| f.code == "verify_config_missing"));

        // Profile fallback downgrades the problem
        let report = run_critic("T-0001", GOOD_PLAN, &slices, &profile_with_verify());
        assert!(!report
            .findings
            .iter()
            .any(|f| f.code == "verify_config_missing"));
    }

    #[test]
    fn broad_scope_is_p1() {
        let mut slices = good_slices();
        slices.slices[0].allowed_paths = vec![".".to_string()];
        let report = run_critic("T-0001", GOOD_PLAN, &slices, &Profile::default());
        assert!(report
            .findings
            .iter()
            .any(|f| f.code == "scope_too_broad" && f.severity == Severity::P1));
        assert!(!report.passed);
    }

    #[test]
    fn cyclic_deps_are_p0() {
        let mut slices = good_slices();
        slices.slices[0].deps = vec!["S-0002".to_string()];
        let report = run_critic("T-0001", GOOD_PLAN, &slices, &Profile::default());
        assert!(report.findings.iter().any(|f| f.code == "dep_cycle"));
    }

    #[test]
    fn stub_title_is_advisory_only() {
        let mut slices = good_slices();
        slices.slices[0].title = "Slice S-0001".to_string();
        let report = run_critic("T-0001", GOOD_PLAN, &slices, &Profile::default());
        assert!(report.p3 >= 1);
        assert!(report.passed);
    }
}
