use clap::Subcommand;
use csk_core::envelope::{Envelope, NextAction};
use csk_core::event::EventScope;
use csk_core::paths::Layout;
use csk_core::task;

#[derive(Subcommand)]
pub enum TaskSubcommand {
    /// Create a task with stub plan and slices
    New {
        #[arg(long = "module-id")]
        module_id: String,
        #[arg(long = "slices", default_value = "1")]
        slices: usize,
        #[arg(long = "mission-id")]
        mission_id: Option<String>,
        #[arg(long, default_value = "default")]
        profile: String,
    },
    /// Run the structural critic over plan and slices
    Critic {
        #[arg(long = "module-id")]
        module_id: String,
        #[arg(long = "task-id")]
        task_id: String,
    },
    /// Pin the critic-approved plan content by hash
    Freeze {
        #[arg(long = "module-id")]
        module_id: String,
        #[arg(long = "task-id")]
        task_id: String,
    },
    /// Record a plan (default) or user-check approval
    Approve {
        #[arg(long = "module-id")]
        module_id: String,
        #[arg(long = "task-id")]
        task_id: String,
        #[arg(long = "approved-by")]
        approved_by: String,
        /// Record a user-check approval instead of the plan approval
        #[arg(long = "user-check")]
        user_check: bool,
    },
    /// Show a task's state and approvals
    Status {
        #[arg(long = "module-id")]
        module_id: String,
        #[arg(long = "task-id")]
        task_id: String,
    },
    /// Append an entry to the task's decision journal
    Decide {
        #[arg(long = "module-id")]
        module_id: String,
        #[arg(long = "task-id")]
        task_id: String,
        #[arg(long)]
        decision: String,
        #[arg(long, default_value = "")]
        rationale: String,
        #[arg(long = "decided-by", default_value = "engine")]
        decided_by: String,
    },
}

pub fn run(layout: &Layout, subcommand: TaskSubcommand) -> Envelope {
    match subcommand {
        TaskSubcommand::New {
            module_id,
            slices,
            mission_id,
            profile,
        } => new(layout, &module_id, slices, mission_id.as_deref(), &profile),
        TaskSubcommand::Critic { module_id, task_id } => critic(layout, &module_id, &task_id),
        TaskSubcommand::Freeze { module_id, task_id } => freeze(layout, &module_id, &task_id),
        TaskSubcommand::Approve {
            module_id,
            task_id,
            approved_by,
            user_check,
        } => approve(layout, &module_id, &task_id, &approved_by, user_check),
        TaskSubcommand::Status { module_id, task_id } => status(layout, &module_id, &task_id),
        TaskSubcommand::Decide {
            module_id,
            task_id,
            decision,
            rationale,
            decided_by,
        } => decide(layout, &module_id, &task_id, &decision, &rationale, &decided_by),
    }
}

fn decide(
    layout: &Layout,
    module_id: &str,
    task_id: &str,
    decision: &str,
    rationale: &str,
    decided_by: &str,
) -> Envelope {
    let result = (|| -> csk_core::Result<Envelope> {
        let (_, paths) = super::task_paths(layout, module_id, task_id)?;
        task::read_state(&paths)?;
        task::add_decision(&paths, decision, rationale, decided_by)?;
        Ok(Envelope::ok(
            format!("recorded decision for {task_id}"),
            NextAction::new("csk status --json"),
        )
        .with_refs([paths.decisions().display().to_string()]))
    })();
    result.unwrap_or_else(|e| Envelope::from_error(&e, NextAction::new("csk status --json")))
}

fn new(
    layout: &Layout,
    module_id: &str,
    slices: usize,
    mission_id: Option<&str>,
    profile: &str,
) -> Envelope {
    super::bracketed(layout, "task new", EventScope::module(module_id), |log| {
        let outcome = task::task_new(layout, log, module_id, slices, mission_id, profile)?;
        Ok(Envelope::ok(
            format!(
                "created task {} with {slices} slice(s) — edit plan.md and slices.json, then run the critic",
                outcome.task_id
            ),
            NextAction::new(format!(
                "csk task critic --module-id {module_id} --task-id {}",
                outcome.task_id
            ))
            .with_alternatives(["csk status --json"]),
        )
        .with_refs([
            outcome.paths.plan().display().to_string(),
            outcome.paths.slices().display().to_string(),
        ])
        .with_data(serde_json::json!({
            "task_id": outcome.task_id,
            "module_path": outcome.module_path,
        })))
    })
}

fn critic(layout: &Layout, module_id: &str, task_id: &str) -> Envelope {
    super::bracketed(
        layout,
        "task critic",
        EventScope::task(module_id, task_id),
        |log| {
            let (_, paths) = super::task_paths(layout, module_id, task_id)?;
            let report = task::task_critic(layout, log, &paths)?;
            let envelope = if report.passed {
                Envelope::ok(
                    format!("critic passed for {task_id} (p2={}, p3={})", report.p2, report.p3),
                    NextAction::new(format!(
                        "csk task freeze --module-id {module_id} --task-id {task_id}"
                    )),
                )
            } else {
                Envelope::gate_failed(
                    format!(
                        "critic found blocking findings for {task_id} (p0={}, p1={})",
                        report.p0, report.p1
                    ),
                    NextAction::new(format!(
                        "edit plan.md/slices.json, then csk task critic --module-id {module_id} --task-id {task_id}"
                    )),
                )
                .with_errors(
                    report
                        .findings
                        .iter()
                        .filter(|f| matches!(f.severity, csk_core::critic::Severity::P0 | csk_core::critic::Severity::P1))
                        .map(|f| format!("{}: {}", f.code, f.message)),
                )
            };
            Ok(envelope
                .with_refs([paths.critic_report().display().to_string()])
                .with_data(serde_json::to_value(&report)?))
        },
    )
}

fn freeze(layout: &Layout, module_id: &str, task_id: &str) -> Envelope {
    super::bracketed(
        layout,
        "task freeze",
        EventScope::task(module_id, task_id),
        |log| {
            let (_, paths) = super::task_paths(layout, module_id, task_id)?;
            let freeze = task::task_freeze(layout, log, &paths)?;
            Ok(Envelope::ok(
                format!("froze plan for {task_id}"),
                NextAction::new(format!(
                    "csk task approve --module-id {module_id} --task-id {task_id} --approved-by <name>"
                )),
            )
            .with_refs([paths.freeze().display().to_string()])
            .with_data(serde_json::to_value(&freeze)?))
        },
    )
}

fn approve(
    layout: &Layout,
    module_id: &str,
    task_id: &str,
    approved_by: &str,
    user_check: bool,
) -> Envelope {
    let command = if user_check { "task approve --user-check" } else { "task approve" };
    super::bracketed(
        layout,
        command,
        EventScope::task(module_id, task_id),
        |log| {
            let (_, paths) = super::task_paths(layout, module_id, task_id)?;
            if user_check {
                let approval = task::task_approve_user_check(&paths, approved_by)?;
                return Ok(Envelope::ok(
                    format!("recorded user check for {task_id}"),
                    NextAction::new(format!(
                        "csk gate validate-ready --module-id {module_id} --task-id {task_id}"
                    )),
                )
                .with_refs([paths.user_check_approval().display().to_string()])
                .with_data(serde_json::to_value(&approval)?));
            }
            let approval = task::task_approve_plan(log, &paths, approved_by)?;
            Ok(Envelope::ok(
                format!("plan approved for {task_id} by {approved_by}"),
                NextAction::new(format!(
                    "csk slice run --module-id {module_id} --task-id {task_id} --slice-id S-0001"
                ))
                .with_alternatives(["csk status --json"]),
            )
            .with_refs([paths.plan_approval().display().to_string()])
            .with_data(serde_json::to_value(&approval)?))
        },
    )
}

fn status(layout: &Layout, module_id: &str, task_id: &str) -> Envelope {
    let result = (|| -> csk_core::Result<Envelope> {
        let (_, paths) = super::task_paths(layout, module_id, task_id)?;
        let state = task::read_state(&paths)?;
        let (freeze_ok, freeze_reason) = if paths.freeze().exists() {
            task::freeze_valid(&paths)?
        } else {
            (false, "missing freeze".to_string())
        };
        Ok(Envelope::ok(
            format!("task {task_id} is {}", state.status),
            NextAction::new("csk status --json"),
        )
        .with_data(serde_json::json!({
            "task": state,
            "freeze_valid": freeze_ok,
            "freeze_reason": freeze_reason,
            "approvals": {
                "plan": paths.plan_approval().exists(),
                "ready": paths.ready_approval().exists(),
                "user_check": paths.user_check_approval().exists(),
            },
        })))
    })();
    result.unwrap_or_else(|e| Envelope::from_error(&e, NextAction::new("csk status --json")))
}
