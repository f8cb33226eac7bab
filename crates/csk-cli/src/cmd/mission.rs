use clap::Subcommand;
use csk_core::envelope::{Envelope, NextAction};
use csk_core::event::EventScope;
use csk_core::mission;
use csk_core::paths::Layout;

#[derive(Subcommand)]
pub enum MissionSubcommand {
    /// Materialise an intake result into a mission with milestone-1
    New {
        #[arg(long)]
        title: String,
        /// Mission spec text (the intake flow's final answer)
        #[arg(long = "spec-text", default_value = "")]
        spec_text: String,
        /// Comma-separated module ids to route to
        #[arg(long = "modules", value_delimiter = ',', required = true)]
        modules: Vec<String>,
        /// Create a git worktree per routed module
        #[arg(long)]
        worktrees: bool,
    },
    /// Show a mission's routing and milestones
    Status { mission_id: String },
}

pub fn run(layout: &Layout, subcommand: MissionSubcommand) -> Envelope {
    match subcommand {
        MissionSubcommand::New {
            title,
            spec_text,
            modules,
            worktrees,
        } => new(layout, &title, &spec_text, &modules, worktrees),
        MissionSubcommand::Status { mission_id } => status(layout, &mission_id),
    }
}

fn new(
    layout: &Layout,
    title: &str,
    spec_text: &str,
    modules: &[String],
    worktrees: bool,
) -> Envelope {
    super::bracketed(layout, "mission new", EventScope::default(), |log| {
        let outcome = mission::mission_new(layout, log, title, spec_text, modules, worktrees)?;
        let first_module = &modules[0];
        Ok(Envelope::ok(
            format!(
                "created mission {} routing {} module(s)",
                outcome.mission_id,
                modules.len()
            ),
            NextAction::new(format!(
                "csk task new --module-id {first_module} --slices 1 --mission-id {}",
                outcome.mission_id
            ))
            .with_alternatives([format!("csk mission status {}", outcome.mission_id)]),
        )
        .with_refs([
            outcome.paths.mission().display().to_string(),
            outcome.paths.milestones().display().to_string(),
        ])
        .with_data(serde_json::json!({
            "mission_id": outcome.mission_id,
            "worktrees": outcome.worktrees,
        })))
    })
}

fn status(layout: &Layout, mission_id: &str) -> Envelope {
    match mission::mission_load(layout, mission_id) {
        Ok((mission_doc, milestones, worktrees)) => Envelope::ok(
            format!(
                "mission {} — {} milestone(s)",
                mission_doc.mission_id,
                milestones.milestones.len()
            ),
            NextAction::new("csk status --json"),
        )
        .with_data(serde_json::json!({
            "mission": mission_doc,
            "milestones": milestones,
            "worktrees": worktrees,
        })),
        Err(e) => Envelope::from_error(&e, NextAction::new("csk status --json")),
    }
}
