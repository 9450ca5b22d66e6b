use clap::Subcommand;

use super::{Deck, OutputFormat, print_json, thousands};
use crate::error::ExitError;
use crate::events::{Notice, Notifier, StderrNotifier};
use crate::model::Agent;
use crate::usage::top_consumers;

#[derive(Debug, Subcommand)]
pub enum AgentsCommand {
    /// List agents with today's and this week's usage
    List {
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Show today's heaviest token consumers
    Top {
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Send a message to an agent
    Message { agent: String, text: String },
}

impl AgentsCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let deck = Deck::connect()?;
        match self {
            AgentsCommand::List { format } => {
                let agents = deck.api().list_agents().map_err(|e| deck.fail(e))?;
                print_agents(&agents, OutputFormat::resolve(format))
            }
            AgentsCommand::Top { format } => {
                let agents = deck.api().list_agents().map_err(|e| deck.fail(e))?;
                let top: Vec<Agent> = top_consumers(&agents).into_iter().cloned().collect();
                print_agents(&top, OutputFormat::resolve(format))
            }
            AgentsCommand::Message { agent, text } => {
                if text.trim().is_empty() {
                    return Err(ExitError::Validation("message is empty".into()).into());
                }
                deck.api().message_agent(&agent, &text).map_err(|e| deck.fail(e))?;
                StderrNotifier.notify(Notice::success(format!("sent to {agent}")));
                Ok(())
            }
        }
    }
}

fn print_agents(agents: &[Agent], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(agents)?,
        OutputFormat::Text => {
            for a in agents {
                println!(
                    "agent  name={}  online={}  tokens-today={}  cost-today={:.2}  \
                     tokens-week={}  cost-week={:.2}",
                    a.name,
                    a.online,
                    a.usage.today.total_tokens,
                    a.usage.today.cost,
                    a.usage.week.total_tokens,
                    a.usage.week.cost
                );
            }
        }
        OutputFormat::Pretty => {
            if agents.is_empty() {
                println!("No agents.");
            }
            for a in agents {
                let dot = if a.online { "\u{25cf}" } else { "\u{25cb}" };
                println!(
                    "{dot} {:<20} {:>12} tok  ${:>8.2} today   {:>12} tok  ${:>8.2} week  {}",
                    a.name,
                    thousands(a.usage.today.total_tokens),
                    a.usage.today.cost,
                    thousands(a.usage.week.total_tokens),
                    a.usage.week.cost,
                    a.session_state.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}
