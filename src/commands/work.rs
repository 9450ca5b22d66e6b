use clap::Subcommand;

use super::{Deck, OutputFormat, cancel_on_ctrlc, print_json};
use crate::error::ExitError;
use crate::events::{Notice, Notifier, StderrNotifier};
use crate::model::SpawnRequest;
use crate::pacing::{SpawnReport, StaggeredSpawner, select_next};

#[derive(Debug, Subcommand)]
pub enum WorkCommand {
    /// Show active and maximum agent sessions
    Status {
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Spawn agents for specific tasks, one after another
    Spawn {
        #[arg(required = true)]
        tasks: Vec<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Spawn agents for the highest-priority ready tasks
    Next {
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
}

impl WorkCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let deck = Deck::connect()?;
        let api = deck.api();
        match self {
            WorkCommand::Status { format } => {
                let work = api.work_status().map_err(|e| deck.fail(e))?;
                match OutputFormat::resolve(format) {
                    OutputFormat::Json => print_json(&work)?,
                    _ => {
                        let max = work
                            .max_sessions
                            .map_or_else(|| "unlimited".to_string(), |m| m.to_string());
                        println!("sessions  active={}  max={max}", work.active_sessions);
                    }
                }
                Ok(())
            }
            WorkCommand::Spawn { tasks, model, format } => {
                let requests = tasks
                    .into_iter()
                    .map(|task_id| SpawnRequest {
                        task_id,
                        model: model.clone(),
                        ..SpawnRequest::default()
                    })
                    .collect();
                run_spawns(&deck, requests, OutputFormat::resolve(format))
            }
            WorkCommand::Next { count, model, format } => {
                let ready = api.ready_tasks().map_err(|e| deck.fail(e))?;
                let picks = select_next(&ready, count);
                if picks.is_empty() {
                    StderrNotifier.notify(Notice::info("no ready tasks"));
                    return Ok(());
                }
                let requests = picks
                    .into_iter()
                    .map(|t| SpawnRequest {
                        task_id: t.id.clone(),
                        model: model.clone(),
                        ..SpawnRequest::default()
                    })
                    .collect();
                run_spawns(&deck, requests, OutputFormat::resolve(format))
            }
        }
    }
}

fn run_spawns(
    deck: &Deck,
    requests: Vec<SpawnRequest>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let cancel = cancel_on_ctrlc();
    let spawner = StaggeredSpawner::new(deck.api(), deck.config.stagger(), cancel.clone());
    let report = spawner.run(requests, |id, ok| {
        if format != OutputFormat::Json {
            eprintln!("  {} {id}", if ok { "\u{2713}" } else { "\u{2717}" });
        }
    });
    print_report(&report, format)?;
    if cancel.is_cancelled() {
        return Err(ExitError::Cancelled.into());
    }
    if !report.failed.is_empty() {
        return Err(ExitError::Other(format!("{} spawn(s) failed", report.failed.len())).into());
    }
    Ok(())
}

fn print_report(report: &SpawnReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(report)?,
        _ => {
            for s in &report.spawned {
                let session = s.session.as_deref().unwrap_or("-");
                println!("spawned  task={}  session={session}", s.task_id);
            }
            for f in &report.failed {
                println!("failed  task={}  error={}", f.task_id, f.error);
            }
            for id in &report.skipped {
                println!("skipped  task={id}");
            }
        }
    }
    Ok(())
}
