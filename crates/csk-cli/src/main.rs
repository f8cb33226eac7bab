mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{
    event::EventSubcommand, gate::GateSubcommand, mission::MissionSubcommand,
    module::ModuleSubcommand, registry::RegistrySubcommand, retro::RetroSubcommand,
    skills::SkillsSubcommand, slice::SliceSubcommand, task::TaskSubcommand,
};
use csk_core::paths::{resolve_state_root, Layout};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "csk",
    about = "Gate-enforced delivery workflow kernel — tasks, slices, proofs, replay",
    version,
    propagate_version = true
)]
struct Cli {
    /// State root (default: CSK_STATE_ROOT, else auto-detect from .csk/ or .git/)
    #[arg(long, global = true, env = "CSK_STATE_ROOT")]
    state_root: Option<PathBuf>,

    /// Output the decision envelope as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the durable state tree under <state-root>/.csk
    Bootstrap,

    /// Project status and the single recommended next action
    Status,

    /// Manage the module registry
    Module {
        #[command(subcommand)]
        subcommand: ModuleSubcommand,
    },

    /// Persist externally detected module candidates
    Registry {
        #[command(subcommand)]
        subcommand: RegistrySubcommand,
    },

    /// Create and inspect missions
    Mission {
        #[command(subcommand)]
        subcommand: MissionSubcommand,
    },

    /// Task lifecycle: new, critic, freeze, approve, status
    Task {
        #[command(subcommand)]
        subcommand: TaskSubcommand,
    },

    /// Run a slice through its gate sequence
    Slice {
        #[command(subcommand)]
        subcommand: SliceSubcommand,
    },

    /// READY gate: validate prerequisites, record approval
    Gate {
        #[command(subcommand)]
        subcommand: GateSubcommand,
    },

    /// Retro stage: cluster incidents into a report and patch proposal
    Retro {
        #[command(subcommand)]
        subcommand: RetroSubcommand,
    },

    /// Inspect the event log
    Event {
        #[command(subcommand)]
        subcommand: EventSubcommand,
    },

    /// Re-derive invariants from the event log
    Replay {
        /// Run the invariant checks
        #[command(subcommand)]
        subcommand: cmd::replay::ReplaySubcommand,
    },

    /// Structural validation of all durable artifacts
    Validate {
        /// Promote warnings to failures
        #[arg(long)]
        strict: bool,
    },

    /// Skills guidance regenerate hook
    Skills {
        #[command(subcommand)]
        subcommand: SkillsSubcommand,
    },

    /// Append a structured incident
    Incident {
        #[command(subcommand)]
        subcommand: cmd::incident::IncidentSubcommand,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let layout = Layout::new(resolve_state_root(cli.state_root.as_deref()));

    let envelope = match cli.command {
        Commands::Bootstrap => cmd::bootstrap::run(&layout),
        Commands::Status => cmd::status::run(&layout),
        Commands::Module { subcommand } => cmd::module::run(&layout, subcommand),
        Commands::Registry { subcommand } => cmd::registry::run(&layout, subcommand),
        Commands::Mission { subcommand } => cmd::mission::run(&layout, subcommand),
        Commands::Task { subcommand } => cmd::task::run(&layout, subcommand),
        Commands::Slice { subcommand } => cmd::slice::run(&layout, subcommand),
        Commands::Gate { subcommand } => cmd::gate::run(&layout, subcommand),
        Commands::Retro { subcommand } => cmd::retro::run(&layout, subcommand),
        Commands::Event { subcommand } => cmd::event::run(&layout, subcommand),
        Commands::Replay { subcommand } => cmd::replay::run(&layout, subcommand),
        Commands::Validate { strict } => cmd::validate::run(&layout, strict),
        Commands::Skills { subcommand } => cmd::skills::run(&layout, subcommand),
        Commands::Incident { subcommand } => cmd::incident::run(&layout, subcommand),
    };

    let exit_code = envelope.exit_code();
    output::print_envelope(&envelope, cli.json);
    std::process::exit(exit_code);
}
