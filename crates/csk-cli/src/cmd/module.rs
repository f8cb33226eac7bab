use clap::Subcommand;
use csk_core::envelope::{Envelope, NextAction};
use csk_core::event::{EventScope, EventType};
use csk_core::paths::Layout;
use csk_core::registry::{self, Registry};

#[derive(Subcommand)]
pub enum ModuleSubcommand {
    /// Register a module under an explicit id and repository-relative path
    Add { module_id: String, path: String },
    /// Create the per-module scaffold and mark the module initialized
    Init { module_id: String },
    /// List registered modules
    List,
}

pub fn run(layout: &Layout, subcommand: ModuleSubcommand) -> Envelope {
    match subcommand {
        ModuleSubcommand::Add { module_id, path } => add(layout, &module_id, &path),
        ModuleSubcommand::Init { module_id } => init(layout, &module_id),
        ModuleSubcommand::List => list(layout),
    }
}

fn add(layout: &Layout, module_id: &str, path: &str) -> Envelope {
    super::bracketed(
        layout,
        "module add",
        EventScope::module(module_id),
        |log| {
            let (record, created) = registry::module_add(layout, module_id, path)?;
            if created {
                log.append(
                    EventType::ModuleAdded,
                    "engine",
                    EventScope::module(module_id),
                    serde_json::json!({"module_id": record.module_id, "path": record.path}),
                    vec![layout.registry().display().to_string()],
                )?;
            }
            Ok(Envelope::ok(
                if created {
                    format!("registered module {} at {}", record.module_id, record.path)
                } else {
                    format!("module path {} already registered", record.path)
                },
                NextAction::new(format!("csk module init {}", record.module_id))
                    .with_alternatives(["csk status --json"]),
            )
            .with_refs([layout.registry().display().to_string()])
            .with_data(serde_json::to_value(&record)?))
        },
    )
}

fn init(layout: &Layout, module_id: &str) -> Envelope {
    super::bracketed(
        layout,
        "module init",
        EventScope::module(module_id),
        |log| {
            let record = registry::module_init(layout, module_id)?;
            log.append(
                EventType::ModuleInitialized,
                "engine",
                EventScope::module(module_id),
                serde_json::json!({"module_id": record.module_id, "path": record.path}),
                vec![layout.module_tasks(&record.path).display().to_string()],
            )?;
            Ok(Envelope::ok(
                format!("initialized module {}", record.module_id),
                NextAction::new(format!(
                    "csk task new --module-id {} --slices 1",
                    record.module_id
                ))
                .with_alternatives(["csk status --json"]),
            )
            .with_data(serde_json::to_value(&record)?))
        },
    )
}

fn list(layout: &Layout) -> Envelope {
    match Registry::load(layout) {
        Ok(registry) => Envelope::ok(
            format!("{} module(s) registered", registry.modules.len()),
            NextAction::new("csk status --json"),
        )
        .with_data(serde_json::to_value(&registry.modules).unwrap_or_default()),
        Err(e) => Envelope::from_error(&e, NextAction::new("csk bootstrap")),
    }
}
