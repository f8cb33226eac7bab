use csk_core::bootstrap;
use csk_core::envelope::{Envelope, NextAction};
use csk_core::event::EventScope;
use csk_core::paths::Layout;

pub fn run(layout: &Layout) -> Envelope {
    // Bootstrap creates the log itself, so the bracket opens after the
    // tree exists.
    match bootstrap::bootstrap(layout) {
        Ok(outcome) => super::bracketed(layout, "bootstrap", EventScope::default(), |_log| {
            Ok(Envelope::ok(
                if outcome.created {
                    format!("bootstrapped state root at {}", outcome.root)
                } else {
                    format!("state root at {} already bootstrapped", outcome.root)
                },
                NextAction::new("csk module add <id> <path>")
                    .with_alternatives(["csk status --json"]),
            )
            .with_refs([layout.registry().display().to_string()])
            .with_data(serde_json::json!({
                "root": outcome.root,
                "engine_version": outcome.engine_version,
                "created": outcome.created,
            })))
        }),
        Err(e) => Envelope::from_error(&e, NextAction::new("csk bootstrap")),
    }
}
