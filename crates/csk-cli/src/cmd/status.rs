use csk_core::envelope::{Envelope, NextAction};
use csk_core::event::EventLog;
use csk_core::paths::Layout;
use csk_core::status;

pub fn run(layout: &Layout) -> Envelope {
    // Status is a pure read; it takes no command bracket and must not
    // create state on an unbootstrapped root.
    let log = if status::bootstrapped(layout) {
        EventLog::open(layout).ok()
    } else {
        None
    };

    match status::project_status(layout, log.as_ref()) {
        Ok(projection) => {
            let summary = format!(
                "phase {} — {} module(s), active task {}",
                projection.project_phase,
                projection.modules.len(),
                projection.active_task_id.as_deref().unwrap_or("none"),
            );
            let next = projection.next.clone();
            let data = serde_json::to_value(&projection).unwrap_or_default();
            Envelope::ok(summary, next).with_data(data)
        }
        Err(e) => Envelope::from_error(&e, NextAction::new("csk bootstrap")),
    }
}
