use std::process::ExitCode;

use clap::{Parser, Subcommand};

use fleetdeck::commands;
use fleetdeck::commands::agents::AgentsCommand;
use fleetdeck::commands::config_cmd::ConfigCommand;
use fleetdeck::commands::doctor::DoctorArgs;
use fleetdeck::commands::epics::EpicsCommand;
use fleetdeck::commands::sessions::SessionsCommand;
use fleetdeck::commands::status::StatusArgs;
use fleetdeck::commands::streak::StreakArgs;
use fleetdeck::commands::tasks::TasksCommand;
use fleetdeck::commands::usage::UsageArgs;
use fleetdeck::commands::work::WorkCommand;
use fleetdeck::error::ExitError;
use fleetdeck::telemetry;

#[derive(Debug, Parser)]
#[command(
    name = "fleetdeck",
    version,
    about = "Operations deck for a fleet of AI coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Browse, create, edit, and link tasks
    Tasks {
        #[command(subcommand)]
        command: TasksCommand,
    },
    /// List epics and launch agent swarms on them
    Epics {
        #[command(subcommand)]
        command: EpicsCommand,
    },
    /// Agent token usage and messages
    Agents {
        #[command(subcommand)]
        command: AgentsCommand,
    },
    /// System usage totals, top consumers, and the token sparkline
    Usage(UsageArgs),
    /// Daily completion streak and calendar
    Streak(StreakArgs),
    /// One-screen overview of tasks, agents, and sessions
    Status(StatusArgs),
    /// Check config and try every API endpoint
    Doctor(DoctorArgs),
    /// Spawn agents and inspect session capacity
    Work {
        #[command(subcommand)]
        command: WorkCommand,
    },
    /// List or pause agent sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },
    /// Create or show .fleetdeck.toml
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the JSON Schema for .fleetdeck.toml
    Schema,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Tasks { .. } => "tasks",
            Self::Epics { .. } => "epics",
            Self::Agents { .. } => "agents",
            Self::Usage(_) => "usage",
            Self::Streak(_) => "streak",
            Self::Status(_) => "status",
            Self::Doctor(_) => "doctor",
            Self::Work { .. } => "work",
            Self::Sessions { .. } => "sessions",
            Self::Config { .. } => "config",
            Self::Schema => "schema",
        }
    }
}

fn main() -> ExitCode {
    telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Tasks { command } => command.execute(),
        Commands::Epics { command } => command.execute(),
        Commands::Agents { command } => command.execute(),
        Commands::Usage(args) => args.execute(),
        Commands::Streak(args) => args.execute(),
        Commands::Status(args) => args.execute(),
        Commands::Doctor(args) => args.execute(),
        Commands::Work { command } => command.execute(),
        Commands::Sessions { command } => command.execute(),
        Commands::Config { command } => command.execute(),
        Commands::Schema => commands::schema::run_schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
