use clap::Subcommand;
use csk_core::envelope::{Envelope, EnvelopeStatus, NextAction};
use csk_core::event::EventScope;
use csk_core::paths::Layout;
use csk_core::replay;

#[derive(Subcommand)]
pub enum ReplaySubcommand {
    /// Walk the log in insertion order and enforce every invariant
    Check,
}

pub fn run(layout: &Layout, subcommand: ReplaySubcommand) -> Envelope {
    match subcommand {
        ReplaySubcommand::Check => super::bracketed(
            layout,
            "replay check",
            EventScope::default(),
            |log| {
                let report = replay::replay_check(layout, log)?;
                if report.ok() {
                    return Ok(Envelope::ok(
                        format!("replay clean over {} event(s)", report.events_checked),
                        NextAction::new("csk status --json"),
                    )
                    .with_data(serde_json::to_value(&report)?));
                }

                // First violation's remediation is the recommended action.
                let next = NextAction::new(report.violations[0].next.clone())
                    .with_alternatives(["csk validate --strict".to_string()]);
                let mut envelope = Envelope {
                    summary: format!(
                        "replay found {} violation(s) over {} event(s)",
                        report.violations.len(),
                        report.events_checked
                    ),
                    status: EnvelopeStatus::ReplayFailed,
                    next,
                    refs: report
                        .violations
                        .iter()
                        .flat_map(|v| v.refs.clone())
                        .collect(),
                    errors: report
                        .violations
                        .iter()
                        .map(|v| format!("{} (event {})", v.kind, v.event_id))
                        .collect(),
                    data: serde_json::Value::Null,
                };
                envelope.data = serde_json::to_value(&report)?;
                Ok(envelope)
            },
        ),
    }
}
