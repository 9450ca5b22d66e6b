use clap::Subcommand;

use super::{Deck, OutputFormat, print_json, prompt_confirm};
use crate::error::ExitError;
use crate::events::{Notice, Notifier, StderrNotifier};

#[derive(Debug, Subcommand)]
pub enum SessionsCommand {
    /// List agent sessions and known projects
    List {
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Pause every running agent session
    PauseAll {
        #[arg(short, long)]
        yes: bool,
    },
}

impl SessionsCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let deck = Deck::connect()?;
        match self {
            SessionsCommand::List { format } => {
                let sessions = deck.api().sessions().map_err(|e| deck.fail(e))?;
                match OutputFormat::resolve(format) {
                    OutputFormat::Json => print_json(&sessions)?,
                    OutputFormat::Text => {
                        for s in &sessions.sessions {
                            println!(
                                "session  id={}  project={}  agent={}  state={}",
                                s.id,
                                s.project.as_deref().unwrap_or("-"),
                                s.agent.as_deref().unwrap_or("-"),
                                s.state.as_deref().unwrap_or("-")
                            );
                        }
                        for p in &sessions.projects {
                            let path = p.path.as_deref().unwrap_or("-");
                            println!("project  name={}  path={path}", p.name);
                        }
                    }
                    OutputFormat::Pretty => {
                        println!("Sessions: {}", sessions.sessions.len());
                        for s in &sessions.sessions {
                            println!(
                                "  {:<24} {:<16} {}",
                                s.id,
                                s.agent.as_deref().unwrap_or("-"),
                                s.state.as_deref().unwrap_or("")
                            );
                        }
                        if !sessions.projects.is_empty() {
                            println!("\nProjects:");
                            for p in &sessions.projects {
                                println!("  {}", p.name);
                            }
                        }
                    }
                }
                Ok(())
            }
            SessionsCommand::PauseAll { yes } => {
                if !yes && !prompt_confirm("Pause all agent sessions?", false)? {
                    return Err(ExitError::Cancelled.into());
                }
                deck.api().pause_all().map_err(|e| deck.fail(e))?;
                StderrNotifier.notify(Notice::success("all sessions paused"));
                Ok(())
            }
        }
    }
}
