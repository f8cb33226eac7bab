use clap::Subcommand;
use csk_core::envelope::{Envelope, NextAction};
use csk_core::event::{EventScope, EventType};
use csk_core::paths::Layout;
use csk_core::registry;
use csk_core::CskError;

#[derive(Subcommand)]
pub enum RegistrySubcommand {
    /// Persist an externally detected candidate map (`--pair id=path`, repeatable)
    Apply {
        #[arg(long = "pair", required = true)]
        pairs: Vec<String>,
    },
}

pub fn run(layout: &Layout, subcommand: RegistrySubcommand) -> Envelope {
    match subcommand {
        RegistrySubcommand::Apply { pairs } => apply(layout, &pairs),
    }
}

fn apply(layout: &Layout, pairs: &[String]) -> Envelope {
    super::bracketed(layout, "registry apply", EventScope::default(), |log| {
        let mut candidates: Vec<(String, String)> = Vec::new();
        for pair in pairs {
            let (module_id, path) = pair.split_once('=').ok_or(CskError::SchemaViolation {
                path: "pair".to_string(),
                reason: format!("expected id=path, got '{pair}'"),
            })?;
            candidates.push((module_id.to_string(), path.to_string()));
        }

        let created = registry::registry_apply(layout, &candidates)?;
        log.append(
            EventType::RegistryDetected,
            "engine",
            EventScope::default(),
            serde_json::json!({
                "candidates": candidates.len(),
                "created": created.len(),
                "module_ids": created.iter().map(|m| m.module_id.clone()).collect::<Vec<_>>(),
            }),
            vec![layout.registry().display().to_string()],
        )?;

        Ok(Envelope::ok(
            format!(
                "applied {} candidate(s), {} newly registered",
                candidates.len(),
                created.len()
            ),
            NextAction::new("csk module init <id>").with_alternatives(["csk status --json"]),
        )
        .with_refs([layout.registry().display().to_string()])
        .with_data(serde_json::to_value(&created)?))
    })
}
