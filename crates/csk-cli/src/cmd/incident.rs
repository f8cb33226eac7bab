use clap::Subcommand;
use csk_core::envelope::{Envelope, NextAction};
use csk_core::event::EventScope;
use csk_core::incident::{self, Incident, IncidentKind};
use csk_core::paths::Layout;

#[derive(Subcommand)]
pub enum IncidentSubcommand {
    /// Append a structured incident to the project (and task) streams
    Add {
        /// Incident kind (closed set, snake_case)
        #[arg(long)]
        kind: String,
        #[arg(long, default_value = "manual")]
        phase: String,
        #[arg(long)]
        details: String,
        #[arg(long, default_value = "none")]
        remediation: String,
        #[arg(long = "module-id")]
        module_id: Option<String>,
        #[arg(long = "task-id")]
        task_id: Option<String>,
        #[arg(long = "slice-id")]
        slice_id: Option<String>,
    },
}

pub fn run(layout: &Layout, subcommand: IncidentSubcommand) -> Envelope {
    match subcommand {
        IncidentSubcommand::Add {
            kind,
            phase,
            details,
            remediation,
            module_id,
            task_id,
            slice_id,
        } => super::bracketed(layout, "incident add", EventScope::default(), |log| {
            let kind: IncidentKind =
                serde_json::from_value(serde_json::Value::String(kind.clone())).map_err(|_| {
                    csk_core::CskError::SchemaViolation {
                        path: "kind".to_string(),
                        reason: format!("unknown incident kind '{kind}'"),
                    }
                })?;

            let mut row = Incident::new(kind, &phase, &details, &remediation);
            row.module_id = module_id.clone();
            row.task_id = task_id.clone();
            row.slice_id = slice_id.clone();

            let task_paths = match (&module_id, &task_id) {
                (Some(module_id), Some(task_id)) => {
                    Some(super::task_paths(layout, module_id, task_id)?.1)
                }
                _ => None,
            };
            incident::record_incident(layout, log, &row, task_paths.as_ref())?;

            Ok(Envelope::ok(
                format!("recorded incident {} ({kind})", row.id),
                NextAction::new("csk status --json"),
            )
            .with_refs([layout.app_incidents().display().to_string()])
            .with_data(serde_json::to_value(&row)?))
        }),
    }
}
