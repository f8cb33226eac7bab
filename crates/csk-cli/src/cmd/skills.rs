use clap::Subcommand;
use csk_core::envelope::{Envelope, NextAction};
use csk_core::event::EventScope;
use csk_core::paths::Layout;
use csk_core::skills;

#[derive(Subcommand)]
pub enum SkillsSubcommand {
    /// Re-stamp the generated guidance against the current engine version
    Generate,
    /// Report whether the generated guidance is in sync
    Check,
}

pub fn run(layout: &Layout, subcommand: SkillsSubcommand) -> Envelope {
    match subcommand {
        SkillsSubcommand::Generate => {
            super::bracketed(layout, "skills generate", EventScope::default(), |_log| {
                let state = skills::generate(layout)?;
                Ok(Envelope::ok(
                    format!("skills regenerated for engine {}", state.engine_version),
                    NextAction::new("csk status --json"),
                )
                .with_refs([layout.skills_state().display().to_string()])
                .with_data(serde_json::to_value(&state)?))
            })
        }
        SkillsSubcommand::Check => {
            let result = skills::check_sync(layout)
                .map(|sync| {
                    let summary = if sync.in_sync {
                        "skills are in sync".to_string()
                    } else {
                        format!(
                            "skills out of sync: {}",
                            sync.reason.as_deref().unwrap_or("unknown")
                        )
                    };
                    let next = if sync.in_sync {
                        NextAction::new("csk status --json")
                    } else {
                        NextAction::new("csk skills generate")
                    };
                    Envelope::ok(summary, next)
                        .with_data(serde_json::to_value(&sync).unwrap_or_default())
                });
            result.unwrap_or_else(|e| Envelope::from_error(&e, NextAction::new("csk bootstrap")))
        }
    }
}
