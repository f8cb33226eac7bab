use clap::Subcommand;
use csk_core::envelope::{Envelope, NextAction};
use csk_core::event::{EventFilter, EventLog};
use csk_core::paths::Layout;

#[derive(Subcommand)]
pub enum EventSubcommand {
    /// Show the newest events, optionally filtered by scope
    Tail {
        #[arg(long, default_value = "20")]
        n: usize,
        #[arg(long = "type")]
        event_type: Option<String>,
        #[arg(long = "mission-id")]
        mission_id: Option<String>,
        #[arg(long = "module-id")]
        module_id: Option<String>,
        #[arg(long = "task-id")]
        task_id: Option<String>,
        #[arg(long = "slice-id")]
        slice_id: Option<String>,
    },
}

pub fn run(layout: &Layout, subcommand: EventSubcommand) -> Envelope {
    match subcommand {
        EventSubcommand::Tail {
            n,
            event_type,
            mission_id,
            module_id,
            task_id,
            slice_id,
        } => {
            let result = (|| -> csk_core::Result<Envelope> {
                let log = EventLog::open(layout)?;
                let event_type = match event_type {
                    Some(raw) => Some(
                        serde_json::from_value(serde_json::Value::String(raw.clone())).map_err(
                            |_| csk_core::CskError::SchemaViolation {
                                path: "type".to_string(),
                                reason: format!("unknown event type '{raw}'"),
                            },
                        )?,
                    ),
                    None => None,
                };
                let filter = EventFilter {
                    event_type,
                    mission_id,
                    module_id,
                    task_id,
                    slice_id,
                };
                let events = log.tail(&filter, n)?;
                Ok(Envelope::ok(
                    format!("{} event(s)", events.len()),
                    NextAction::new("csk status --json"),
                )
                .with_data(serde_json::to_value(&events)?))
            })();
            result.unwrap_or_else(|e| Envelope::from_error(&e, NextAction::new("csk bootstrap")))
        }
    }
}
