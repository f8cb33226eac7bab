use clap::Subcommand;
use csk_core::envelope::{Envelope, NextAction};
use csk_core::event::EventScope;
use csk_core::executor::{self, ReviewInput, SliceRunRequest};
use csk_core::paths::Layout;
use csk_core::types::SliceStatus;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum SliceSubcommand {
    /// Run one slice through implement and the gate sequence
    Run {
        #[arg(long = "module-id")]
        module_id: String,
        #[arg(long = "task-id")]
        task_id: String,
        #[arg(long = "slice-id")]
        slice_id: String,
        /// Implement command as trailing argv (no shell)
        #[arg(long = "implement", num_args = 1.., allow_hyphen_values = true)]
        implement: Option<Vec<String>>,
        /// Review counters recorded by the executor
        #[arg(long, default_value = "0")]
        p0: u32,
        #[arg(long, default_value = "0")]
        p1: u32,
        #[arg(long, default_value = "0")]
        p2: u32,
        #[arg(long, default_value = "0")]
        p3: u32,
        #[arg(long = "review-summary", default_value = "")]
        review_summary: String,
        #[arg(long, default_value = "engine")]
        reviewer: String,
        /// Run against this workdir instead of the module path
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
}

pub fn run(layout: &Layout, subcommand: SliceSubcommand) -> Envelope {
    match subcommand {
        SliceSubcommand::Run {
            module_id,
            task_id,
            slice_id,
            implement,
            p0,
            p1,
            p2,
            p3,
            review_summary,
            reviewer,
            workdir,
        } => {
            let scope = EventScope::slice(&module_id, &task_id, &slice_id);
            super::bracketed(layout, "slice run", scope, |log| {
                let request = SliceRunRequest {
                    module_id: &module_id,
                    task_id: &task_id,
                    slice_id: &slice_id,
                    implement_argv: implement.clone(),
                    review: ReviewInput { p0, p1, p2, p3 },
                    review_summary: &review_summary,
                    reviewer: &reviewer,
                    workdir: workdir.clone(),
                };
                let outcome = executor::slice_run(layout, log, &request)?;

                let envelope = if outcome.completed() {
                    Envelope::ok(
                        format!("slice {slice_id} completed (attempt {})", outcome.attempts),
                        NextAction::new(format!(
                            "csk gate validate-ready --module-id {module_id} --task-id {task_id}"
                        ))
                        .with_alternatives(["csk status --json"]),
                    )
                    .with_refs(outcome.manifest_path.clone().into_iter())
                } else {
                    let gate = outcome.failed_gate.clone().unwrap_or_default();
                    let next = match (gate.as_str(), outcome.status) {
                        ("scope", _) => NextAction::new(format!(
                            "revert the out-of-scope files, then csk slice run --module-id {module_id} --task-id {task_id} --slice-id {slice_id}"
                        )),
                        (_, SliceStatus::Blocked) => NextAction::new(format!(
                            "csk retro run --module-id {module_id} --task-id {task_id}"
                        )),
                        _ => NextAction::new(format!(
                            "csk slice run --module-id {module_id} --task-id {task_id} --slice-id {slice_id}"
                        )),
                    };
                    Envelope::gate_failed(
                        format!(
                            "slice {slice_id} failed at the {gate} gate (attempt {})",
                            outcome.attempts
                        ),
                        next,
                    )
                    .with_errors(
                        outcome
                            .incident_kind
                            .iter()
                            .map(|k| format!("{k}: gate {gate} did not pass")),
                    )
                };
                Ok(envelope.with_data(serde_json::to_value(&outcome)?))
            })
        }
    }
}
