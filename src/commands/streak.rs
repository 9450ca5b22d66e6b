use chrono::{Duration, Local};
use clap::Args;

use super::{Deck, OutputFormat, print_json};
use crate::model::{TaskFilter, TaskStatus};
use crate::streak::{self, StreakStats};

#[derive(Debug, Args)]
pub struct StreakArgs {
    /// Weeks shown in the calendar
    #[arg(long, default_value_t = 12)]
    pub weeks: u32,
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

impl StreakArgs {
    pub fn execute(self) -> anyhow::Result<()> {
        let deck = Deck::connect()?;
        let filter = TaskFilter { status: Some(TaskStatus::Closed), ..TaskFilter::default() };
        let closed = deck.api().list_tasks(&filter).map_err(|e| deck.fail(e))?;
        let stats = streak::compute(&closed, Local::now().date_naive());

        match OutputFormat::resolve(self.format) {
            OutputFormat::Json => print_json(&stats)?,
            OutputFormat::Text => {
                println!(
                    "streak  current={}  best={}  average-30d={:.2}  top-agent={}",
                    stats.current,
                    stats.best,
                    stats.average_30d,
                    stats.top_agent.as_deref().unwrap_or("-")
                );
            }
            OutputFormat::Pretty => {
                println!("=== Streak ===\n");
                println!("Current: {} day(s)   Best: {} day(s)", stats.current, stats.best);
                println!("30-day average: {:.2} per day", stats.average_30d);
                if let Some(agent) = &stats.top_agent {
                    println!("Top agent: {agent}");
                }
                println!();
                print!("{}", calendar(&stats, self.weeks));
            }
        }
        Ok(())
    }
}

/// Weekday rows, one column per week, oldest on the left.
fn calendar(stats: &StreakStats, weeks: u32) -> String {
    const SHADES: [char; 5] = ['\u{b7}', '\u{2591}', '\u{2592}', '\u{2593}', '\u{2588}'];
    let today = Local::now().date_naive();
    let days = i64::from(weeks.max(1)) * 7;
    let start = today - Duration::days(days - 1);
    let mut rows = vec![String::new(); 7];
    for offset in 0..days {
        let day = start + Duration::days(offset);
        let count = stats.by_day.get(&day).copied().unwrap_or(0);
        let shade = SHADES[usize::try_from(count).unwrap_or(usize::MAX).min(4)];
        let row = usize::try_from(offset % 7).unwrap_or(0);
        rows[row].push(shade);
    }
    rows.into_iter().map(|r| r + "\n").collect()
}
