use std::io::IsTerminal;
use std::sync::mpsc;
use std::time::Duration;

use chrono::Utc;
use clap::Args;
use serde::Serialize;

use super::{Deck, OutputFormat, cancel_on_ctrlc, print_json, thousands};
use crate::error::ExitError;
use crate::model::SparklinePoint;
use crate::sparkline::{self, TimeWindow};
use crate::usage::{SystemStats, UsagePoller, UsageSnapshot, top_consumers};

#[derive(Debug, Args)]
pub struct UsageArgs {
    /// Time range: 1h, 24h, 7d, 30d, all, or FROM..TO (YYYY-MM-DD)
    #[arg(long)]
    pub range: Option<TimeWindow>,
    /// Keep refreshing until interrupted
    #[arg(long)]
    pub watch: bool,
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Serialize)]
struct UsageReport<'a> {
    range: String,
    stats: SystemStats,
    snapshot: &'a UsageSnapshot,
    tiers: Vec<u8>,
}

impl UsageArgs {
    pub fn execute(self) -> anyhow::Result<()> {
        let deck = Deck::connect()?;
        let window = match self.range {
            Some(w) => w,
            None => deck.config.default_range()?,
        };
        let format = OutputFormat::resolve(self.format);

        if !self.watch {
            let mut snapshot = UsageSnapshot::default();
            snapshot.refresh(deck.api(), window);
            if snapshot.stale.len() == 3 {
                return Err(ExitError::Unreachable {
                    url: deck.config.server.url.clone(),
                    message: "every usage feed failed".into(),
                }
                .into());
            }
            return print_usage(&snapshot, window, format, deck.colors());
        }

        let cancel = cancel_on_ctrlc();
        let (tx, rx) = mpsc::channel();
        let poller = UsagePoller::spawn(deck.backend(), window, deck.config.poll_interval(), tx);
        let colors = deck.colors();
        let clear = format == OutputFormat::Pretty && std::io::stdout().is_terminal();
        while !cancel.is_cancelled() {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(snapshot) => {
                    if clear {
                        print!("\x1b[2J\x1b[H");
                    }
                    print_usage(&snapshot, window, format, colors)?;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        poller.stop();
        Ok(())
    }
}

fn print_usage(
    snapshot: &UsageSnapshot,
    window: TimeWindow,
    format: OutputFormat,
    colors: bool,
) -> anyhow::Result<()> {
    let stats = snapshot.stats();
    let points = sparkline::filter(&snapshot.sparkline, window, Utc::now());
    let tokens: Vec<u64> = points.iter().map(|p: &SparklinePoint| p.tokens).collect();

    match format {
        OutputFormat::Json => print_json(&UsageReport {
            range: window.to_string(),
            stats,
            snapshot,
            tiers: sparkline::tiers(&tokens),
        })?,
        OutputFormat::Text => {
            if let Some(m) = &snapshot.metrics {
                println!(
                    "tier  name={}  today={}  week={}",
                    m.tier.as_deref().unwrap_or("unknown"),
                    m.today.total_tokens,
                    m.week.total_tokens
                );
                if let Some(s) = &m.session {
                    let resets = s.resets_at.as_deref().unwrap_or("");
                    println!(
                        "session  used={}  limit={}  resets={resets}",
                        s.used_tokens, s.limit_tokens
                    );
                }
            }
            println!(
                "fleet  tokens-today={}  cost-today={:.2}  tokens-week={}  cost-week={:.2}  \
                 active-agents={}",
                stats.tokens_today,
                stats.cost_today,
                stats.tokens_week,
                stats.cost_week,
                stats.active_agents
            );
            for a in top_consumers(&snapshot.agents) {
                println!("top  name={}  tokens-today={}", a.name, a.usage.today.total_tokens);
            }
            println!("sparkline  range={window}  {}", sparkline::render(&tokens, false));
            for feed in &snapshot.stale {
                println!("stale  feed={feed}");
            }
        }
        OutputFormat::Pretty => {
            println!("=== Usage ({window}) ===\n");
            if let Some(m) = &snapshot.metrics {
                println!("Tier: {}", m.tier.as_deref().unwrap_or("unknown"));
                if let Some(s) = &m.session {
                    println!(
                        "Session: {} / {} tokens ({:.0}%)",
                        thousands(s.used_tokens),
                        thousands(s.limit_tokens),
                        s.utilization() * 100.0
                    );
                }
            }
            println!(
                "Today: {} tokens  ${:.2}    Week: {} tokens  ${:.2}",
                thousands(stats.tokens_today),
                stats.cost_today,
                thousands(stats.tokens_week),
                stats.cost_week
            );
            println!("Active agents: {}", stats.active_agents);
            let top = top_consumers(&snapshot.agents);
            if !top.is_empty() {
                println!("\nTop consumers:");
                for a in top {
                    println!("  {:<20} {:>12}", a.name, thousands(a.usage.today.total_tokens));
                }
            }
            if !tokens.is_empty() {
                println!("\n{}", sparkline::render(&tokens, colors));
            }
            if !snapshot.stale.is_empty() {
                println!("\n(stale: {})", snapshot.stale.join(", "));
            }
        }
    }
    Ok(())
}
