use std::io::IsTerminal;

use anyhow::Context;
use clap::{Args, Subcommand};
use serde::Serialize;

use super::{Deck, OutputFormat, cancel_on_ctrlc, print_json, prompt_multi_select, truncate};
use crate::error::ExitError;
use crate::events::{Notice, Notifier, StderrNotifier};
use crate::model::{Epic, Task};
use crate::pacing::{SpawnReport, StaggeredSpawner};
use crate::store::Store;
use crate::swarm::{self, ChildState, ExecutionMode, LaunchPlan, SettingsOverride, SwarmSettings};

#[derive(Debug, Subcommand)]
pub enum EpicsCommand {
    /// List open epics with child readiness
    List {
        /// Include epics with no ready children
        #[arg(long)]
        all: bool,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Launch agents on an epic's children
    Swarm(SwarmArgs),
    /// Close every epic whose children are all closed
    CloseEligible,
}

#[derive(Debug, Args)]
pub struct SwarmArgs {
    /// Epic id; prompts when omitted
    pub epic: Option<String>,
    /// Child task to launch (repeatable); prompts when omitted
    #[arg(long = "task")]
    pub tasks: Vec<String>,
    #[arg(long, value_enum)]
    pub mode: Option<ExecutionMode>,
    #[arg(long)]
    pub max_concurrent: Option<u32>,
    #[arg(long)]
    pub review_threshold: Option<u8>,
    /// Also spawn selected children that are still blocked
    #[arg(long)]
    pub auto_spawn_blocked: Option<bool>,
    /// Forget saved settings for this epic before applying flags
    #[arg(long)]
    pub reset: bool,
    /// Print the launch plan without spawning
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Serialize)]
struct SwarmOutcome<'a> {
    epic: &'a str,
    settings: &'a SwarmSettings,
    plan: &'a LaunchPlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a SpawnReport>,
}

impl EpicsCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let deck = Deck::connect()?;
        match self {
            EpicsCommand::List { all, format } => {
                let epics = if all {
                    swarm::annotated_epics(deck.api())
                } else {
                    swarm::load_candidates(deck.api(), None)
                }
                .map_err(|e| deck.fail(e))?;
                print_epics(&epics, OutputFormat::resolve(format))
            }
            EpicsCommand::Swarm(args) => args.execute(&deck),
            EpicsCommand::CloseEligible => {
                let result = deck.api().close_eligible_epics().map_err(|e| deck.fail(e))?;
                if result.closed.is_empty() {
                    StderrNotifier.notify(Notice::info("no epics eligible to close"));
                } else {
                    for id in &result.closed {
                        println!("{id}");
                    }
                    let closed = format!("closed {} epic(s)", result.closed.len());
                    StderrNotifier.notify(Notice::success(closed));
                }
                Ok(())
            }
        }
    }
}

impl SwarmArgs {
    fn execute(self, deck: &Deck) -> anyhow::Result<()> {
        let api = deck.api();
        let format = OutputFormat::resolve(self.format);
        let interactive = std::io::stdin().is_terminal() && format != OutputFormat::Json;

        let candidates =
            swarm::load_candidates(api, self.epic.as_deref()).map_err(|e| deck.fail(e))?;
        let epic = self.choose_epic(&candidates, interactive)?;

        let flags = SettingsOverride {
            mode: self.mode,
            max_concurrent: self.max_concurrent,
            review_threshold: self.review_threshold,
            auto_spawn_blocked: self.auto_spawn_blocked,
        };
        let mut store = deck.store();
        let remembered = remember_settings(store.as_mut(), &epic.task.id, self.reset, &flags);

        let cap = deck.config.swarm.max_concurrent_cap;
        let free_slots = match api.work_status() {
            Ok(work) => work.free_slots(),
            Err(e) => {
                tracing::warn!(error = %e, "work status unavailable; not limiting by sessions");
                None
            }
        };
        let session_cap = Some(free_slots.map_or(cap, |free| free.min(cap)));
        let settings = remembered.clamped(epic.summary.ready, session_cap);
        if settings.max_concurrent == 0 {
            StderrNotifier.notify(Notice::warning("no free agent sessions"));
            if !self.dry_run {
                return Err(ExitError::Other(
                    "no free agent sessions; retry when a running agent finishes".into(),
                )
                .into());
            }
        }

        let children = api.epic_children(&epic.task.id).map_err(|e| deck.fail(e))?.children;
        let selected = self.choose_children(&children, interactive)?;
        let plan = swarm::plan_launch(&selected, &settings);

        if self.dry_run || plan.start.is_empty() {
            if plan.start.is_empty() {
                StderrNotifier.notify(Notice::warning("nothing to launch"));
            }
            return print_outcome(&epic.task.id, &settings, &plan, None, format);
        }

        let cancel = cancel_on_ctrlc();
        let spawner = StaggeredSpawner::new(api, deck.config.stagger(), cancel.clone());
        let poll = deck.config.swarm_poll();
        let report = swarm::launch(&spawner, &epic.task.id, &plan, &settings, poll, |id, ok| {
            if format != OutputFormat::Json {
                eprintln!("  {} {id}", if ok { "\u{2713}" } else { "\u{2717}" });
            }
        });
        print_outcome(&epic.task.id, &settings, &plan, Some(&report), format)?;

        if cancel.is_cancelled() {
            return Err(ExitError::Cancelled.into());
        }
        if !report.failed.is_empty() {
            return Err(ExitError::Other(format!("{} spawn(s) failed", report.failed.len())).into());
        }
        Ok(())
    }

    fn choose_epic(&self, candidates: &[Epic], interactive: bool) -> anyhow::Result<Epic> {
        if let Some(id) = &self.epic {
            return candidates
                .iter()
                .find(|e| &e.task.id == id)
                .cloned()
                .ok_or_else(|| ExitError::Validation(format!("{id} is not an open epic")).into());
        }
        if candidates.is_empty() {
            return Err(ExitError::Validation("no epics have ready tasks".into()).into());
        }
        if !interactive {
            return Err(ExitError::Validation(
                "an epic id is required when not running interactively".into(),
            )
            .into());
        }
        let items: Vec<String> = candidates.iter().map(epic_line).collect();
        let picked = dialoguer::Select::new()
            .with_prompt("Epic")
            .items(&items)
            .default(0)
            .interact()
            .context("reading epic selection")?;
        Ok(candidates[picked].clone())
    }

    fn choose_children<'a>(
        &self,
        children: &'a [Task],
        interactive: bool,
    ) -> anyhow::Result<Vec<&'a Task>> {
        let selectable = swarm::selectable(children);
        if !self.tasks.is_empty() {
            return self
                .tasks
                .iter()
                .map(|id| {
                    selectable.iter().copied().find(|c| &c.id == id).ok_or_else(|| {
                        let reason = format!("{id} is not a ready or blocked child of this epic");
                        ExitError::Validation(reason).into()
                    })
                })
                .collect();
        }
        if !interactive {
            return Ok(selectable
                .into_iter()
                .filter(|c| swarm::classify(c) == ChildState::Ready)
                .collect());
        }
        if selectable.is_empty() {
            return Ok(Vec::new());
        }
        let items: Vec<String> = selectable
            .iter()
            .map(|c| {
                let tag = if swarm::classify(c) == ChildState::Blocked { " [blocked]" } else { "" };
                format!("{}  P{}  {}{tag}", c.id, c.priority, truncate(&c.title, 50))
            })
            .collect();
        let defaults: Vec<bool> =
            selectable.iter().map(|c| swarm::classify(c) == ChildState::Ready).collect();
        let picked = prompt_multi_select("Tasks to launch", &items, &defaults)?;
        Ok(picked.into_iter().map(|i| selectable[i]).collect())
    }
}

/// Remembered settings for `epic_id` with `flags` applied, saved back as
/// the user's choice. Launches clamp their own copy.
fn remember_settings(
    store: Option<&mut Store>,
    epic_id: &str,
    reset: bool,
    flags: &SettingsOverride,
) -> SwarmSettings {
    let Some(store) = store else {
        let mut settings = SwarmSettings::default();
        flags.apply(&mut settings);
        return settings;
    };
    if reset {
        store.prefs.reset_swarm_settings(epic_id);
    }
    let mut settings = store.prefs.swarm_settings(epic_id);
    flags.apply(&mut settings);
    store.prefs.set_swarm_settings(epic_id, settings.clone());
    if let Err(e) = store.save() {
        tracing::warn!(error = %e, "could not save swarm settings");
    }
    settings
}

fn epic_line(epic: &Epic) -> String {
    format!(
        "{}  {} ready / {} in progress / {} total  {}",
        epic.task.id,
        epic.summary.ready,
        epic.summary.in_progress,
        epic.summary.total,
        truncate(&epic.task.title, 50)
    )
}

fn print_epics(epics: &[Epic], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(epics)?,
        OutputFormat::Text => {
            for e in epics {
                println!(
                    "epic  id={}  ready={}  in-progress={}  total={}  title={}",
                    e.task.id, e.summary.ready, e.summary.in_progress, e.summary.total, e.task.title
                );
            }
        }
        OutputFormat::Pretty => {
            if epics.is_empty() {
                println!("No epics with ready tasks.");
            }
            for e in epics {
                println!("{}", epic_line(e));
            }
        }
    }
    Ok(())
}

fn print_outcome(
    epic: &str,
    settings: &SwarmSettings,
    plan: &LaunchPlan,
    report: Option<&SpawnReport>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(&SwarmOutcome { epic, settings, plan, report })?,
        OutputFormat::Text => {
            println!(
                "swarm  epic={epic}  mode={:?}  max-concurrent={}  review-threshold={}",
                settings.mode, settings.max_concurrent, settings.review_threshold
            );
            println!(
                "plan  start={}  queued={}  held={}",
                plan.start.join(","),
                plan.queued.join(","),
                plan.held.join(",")
            );
            if let Some(r) = report {
                println!(
                    "result  spawned={}  failed={}  skipped={}",
                    r.spawned.len(),
                    r.failed.len(),
                    r.skipped.len()
                );
            }
        }
        OutputFormat::Pretty => {
            println!("=== Swarm {epic} ===\n");
            println!(
                "Mode: {:?}  Max concurrent: {}  Review after: {}",
                settings.mode, settings.max_concurrent, settings.review_threshold
            );
            println!("Start:  {}", list_or_dash(&plan.start));
            println!("Queued (as slots free): {}", list_or_dash(&plan.queued));
            if !plan.held.is_empty() {
                println!("Held (blocked): {}", plan.held.join(", "));
            }
            if let Some(r) = report {
                let total = plan.start.len() + plan.queued.len();
                println!("\nSpawned {} of {total}", r.spawned.len());
                for f in &r.failed {
                    println!("  failed {}: {}", f.task_id, f.error);
                }
                if !r.skipped.is_empty() {
                    println!("  cancelled before: {}", r.skipped.join(", "));
                }
            }
        }
    }
    Ok(())
}

fn list_or_dash(ids: &[String]) -> String {
    if ids.is_empty() { "-".to_string() } else { ids.join(", ") }
}
