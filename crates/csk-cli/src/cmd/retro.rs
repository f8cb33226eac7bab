use clap::Subcommand;
use csk_core::envelope::{Envelope, NextAction};
use csk_core::event::EventScope;
use csk_core::paths::Layout;
use csk_core::retro;

#[derive(Subcommand)]
pub enum RetroSubcommand {
    /// Cluster the task's incidents into retro.md plus a patch proposal
    Run {
        #[arg(long = "module-id")]
        module_id: String,
        #[arg(long = "task-id")]
        task_id: String,
        #[arg(long)]
        feedback: Option<String>,
    },
}

pub fn run(layout: &Layout, subcommand: RetroSubcommand) -> Envelope {
    match subcommand {
        RetroSubcommand::Run {
            module_id,
            task_id,
            feedback,
        } => super::bracketed(
            layout,
            "retro run",
            EventScope::task(&module_id, &task_id),
            |log| {
                let (_, paths) = super::task_paths(layout, &module_id, &task_id)?;
                let outcome = retro::retro_run(layout, log, &paths, feedback.as_deref())?;
                Ok(Envelope::ok(
                    format!(
                        "retro complete for {task_id} ({} incident(s) clustered)",
                        outcome.incident_count
                    ),
                    NextAction::new("csk replay check").with_alternatives(["csk status --json"]),
                )
                .with_refs([outcome.retro_path.clone(), outcome.patch_path.clone()])
                .with_data(serde_json::to_value(&outcome)?))
            },
        ),
    }
}
