use clap::Subcommand;
use csk_core::envelope::{Envelope, NextAction};
use csk_core::event::EventScope;
use csk_core::gate::ready;
use csk_core::paths::Layout;
use csk_core::profile;
use csk_core::task;

#[derive(Subcommand)]
pub enum GateSubcommand {
    /// Validate every READY prerequisite and write the handoff
    ValidateReady {
        #[arg(long = "module-id")]
        module_id: String,
        #[arg(long = "task-id")]
        task_id: String,
    },
    /// Record the ready approval (requires ready_validated)
    ApproveReady {
        #[arg(long = "module-id")]
        module_id: String,
        #[arg(long = "task-id")]
        task_id: String,
        #[arg(long = "approved-by")]
        approved_by: String,
    },
}

pub fn run(layout: &Layout, subcommand: GateSubcommand) -> Envelope {
    match subcommand {
        GateSubcommand::ValidateReady { module_id, task_id } => {
            validate_ready(layout, &module_id, &task_id)
        }
        GateSubcommand::ApproveReady {
            module_id,
            task_id,
            approved_by,
        } => approve_ready(layout, &module_id, &task_id, &approved_by),
    }
}

fn validate_ready(layout: &Layout, module_id: &str, task_id: &str) -> Envelope {
    super::bracketed(
        layout,
        "gate validate-ready",
        EventScope::task(module_id, task_id),
        |log| {
            let (_, paths) = super::task_paths(layout, module_id, task_id)?;
            let state = task::read_state(&paths)?;
            let merged = profile::load_profile(layout, &state.profile_name)?;
            let proof = ready::validate_ready(log, &paths, &merged)?;
            Ok(Envelope::ok(
                format!("task {task_id} is ready for approval"),
                NextAction::new(format!(
                    "csk gate approve-ready --module-id {module_id} --task-id {task_id} --approved-by <name>"
                ))
                .with_alternatives(["csk status --json"]),
            )
            .with_refs([
                paths.ready_proof().display().to_string(),
                paths.handoff().display().to_string(),
            ])
            .with_data(serde_json::to_value(&proof)?))
        },
    )
}

fn approve_ready(layout: &Layout, module_id: &str, task_id: &str, approved_by: &str) -> Envelope {
    super::bracketed(
        layout,
        "gate approve-ready",
        EventScope::task(module_id, task_id),
        |log| {
            let (_, paths) = super::task_paths(layout, module_id, task_id)?;
            let approval = ready::approve_ready(log, &paths, approved_by)?;
            Ok(Envelope::ok(
                format!("ready approved for {task_id} by {approved_by}"),
                NextAction::new(format!(
                    "csk retro run --module-id {module_id} --task-id {task_id}"
                )),
            )
            .with_refs([paths.ready_approval().display().to_string()])
            .with_data(serde_json::to_value(&approval)?))
        },
    )
}
