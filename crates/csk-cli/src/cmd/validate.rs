use csk_core::envelope::{Envelope, NextAction};
use csk_core::event::EventScope;
use csk_core::paths::Layout;
use csk_core::validate;

pub fn run(layout: &Layout, strict: bool) -> Envelope {
    super::bracketed(layout, "validate", EventScope::default(), |_log| {
        let report = validate::validate_all(layout, strict)?;
        if report.ok() {
            let summary = if report.warnings.is_empty() {
                "validation clean".to_string()
            } else {
                format!("validation clean with {} warning(s)", report.warnings.len())
            };
            return Ok(Envelope::ok(summary, NextAction::new("csk status --json"))
                .with_data(serde_json::to_value(&report)?));
        }
        Ok(Envelope::gate_failed(
            format!("validation failed with {} error(s)", report.errors.len()),
            NextAction::new("csk status --json")
                .with_alternatives(["csk replay check"]),
        )
        .with_errors(report.errors.clone())
        .with_data(serde_json::to_value(&report)?))
    })
}
