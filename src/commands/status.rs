use std::collections::BTreeMap;

use clap::Args;
use serde::{Deserialize, Serialize};

use super::{Deck, OutputFormat, print_json, thousands};
use crate::model::{Task, TaskFilter};
use crate::usage::SystemStats;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReport {
    pub server: String,
    pub tasks: Option<TaskSummary>,
    pub ready: Option<ReadySummary>,
    pub agents: Option<AgentsSummary>,
    pub sessions: Option<SessionsSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub advice: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub open_epics: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadySummary {
    pub count: usize,
    pub items: Vec<TaskBrief>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskBrief {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentsSummary {
    pub total: usize,
    pub active: usize,
    pub tokens_today: u64,
    pub cost_today: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionsSummary {
    pub active: u32,
    pub max: Option<u32>,
}

fn summarize_tasks(tasks: &[Task]) -> TaskSummary {
    let mut by_status = BTreeMap::new();
    for t in tasks {
        *by_status.entry(t.status.to_string()).or_insert(0) += 1;
    }
    TaskSummary {
        total: tasks.len(),
        by_status,
        open_epics: tasks.iter().filter(|t| t.is_epic() && t.status.is_active()).count(),
    }
}

impl StatusArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let deck = Deck::connect()?;
        let format = OutputFormat::resolve(self.format);
        let api = deck.api();

        let (tasks, ready, agents, work) = std::thread::scope(|s| {
            let tasks = s.spawn(|| api.list_tasks(&TaskFilter::default()));
            let ready = s.spawn(|| api.ready_tasks());
            let agents = s.spawn(|| api.list_agents());
            let work = api.work_status();
            (tasks.join(), ready.join(), agents.join(), work)
        });

        let mut report = StatusReport {
            server: deck.config.server.url.clone(),
            tasks: None,
            ready: None,
            agents: None,
            sessions: None,
            advice: vec![],
        };

        // 1. Tasks
        match tasks {
            Ok(Ok(tasks)) => report.tasks = Some(summarize_tasks(&tasks)),
            Ok(Err(e)) => report.advice.push(format!("tasks unavailable: {e}")),
            Err(_) => report.advice.push("tasks unavailable".into()),
        }

        // 2. Ready tasks
        match ready {
            Ok(Ok(ready)) => {
                report.ready = Some(ReadySummary {
                    count: ready.len(),
                    items: ready
                        .iter()
                        .take(5)
                        .map(|t| TaskBrief { id: t.id.clone(), title: t.title.clone() })
                        .collect(),
                });
            }
            Ok(Err(e)) => report.advice.push(format!("ready tasks unavailable: {e}")),
            Err(_) => report.advice.push("ready tasks unavailable".into()),
        }

        // 3. Agents
        match agents {
            Ok(Ok(agents)) => {
                let stats = SystemStats::from_agents(&agents);
                report.agents = Some(AgentsSummary {
                    total: agents.len(),
                    active: stats.active_agents,
                    tokens_today: stats.tokens_today,
                    cost_today: stats.cost_today,
                });
            }
            Ok(Err(e)) => report.advice.push(format!("agents unavailable: {e}")),
            Err(_) => report.advice.push("agents unavailable".into()),
        }

        // 4. Sessions
        match work {
            Ok(work) => {
                report.sessions =
                    Some(SessionsSummary { active: work.active_sessions, max: work.max_sessions });
                if work.free_slots() == Some(0) {
                    report.advice.push("all agent sessions are in use".into());
                }
            }
            Err(e) => report.advice.push(format!("work status unavailable: {e}")),
        }

        if let Some(ready) = &report.ready
            && ready.count > 0
            && report.sessions.as_ref().is_some_and(|s| s.active == 0)
        {
            report.advice.push(format!(
                "{} ready task(s) and no agents working: try `fleetdeck work next`",
                ready.count
            ));
        }

        match format {
            OutputFormat::Pretty => Self::print_pretty(&report),
            OutputFormat::Text => Self::print_text(&report),
            OutputFormat::Json => print_json(&report)?,
        }

        Ok(())
    }

    fn print_pretty(report: &StatusReport) {
        println!("=== fleetdeck status ({}) ===\n", report.server);

        if let Some(tasks) = &report.tasks {
            let breakdown: Vec<String> =
                tasks.by_status.iter().map(|(s, n)| format!("{s}: {n}")).collect();
            println!("Tasks: {}  ({})", tasks.total, breakdown.join(", "));
            println!("Open epics: {}", tasks.open_epics);
        }

        if let Some(ready) = &report.ready {
            println!("\nReady: {}", ready.count);
            for t in &ready.items {
                println!("  \u{2022} {}  {}", t.id, t.title);
            }
            if ready.count > ready.items.len() {
                println!("  ... and {} more", ready.count - ready.items.len());
            }
        }

        if let Some(agents) = &report.agents {
            println!(
                "\nAgents: {} ({} active)  Today: {} tokens, ${:.2}",
                agents.total,
                agents.active,
                thousands(agents.tokens_today),
                agents.cost_today
            );
        }
        if let Some(sessions) = &report.sessions {
            match sessions.max {
                Some(max) => println!("Sessions: {}/{max}", sessions.active),
                None => println!("Sessions: {}", sessions.active),
            }
        }

        if !report.advice.is_empty() {
            println!();
            for line in &report.advice {
                println!("! {line}");
            }
        }
    }

    fn print_text(report: &StatusReport) {
        println!("fleetdeck-status  server={}", report.server);
        if let Some(tasks) = &report.tasks {
            println!("tasks  total={}  open-epics={}", tasks.total, tasks.open_epics);
            for (status, n) in &tasks.by_status {
                println!("tasks-status  status={status}  count={n}");
            }
        }
        if let Some(ready) = &report.ready {
            println!("ready  count={}", ready.count);
            for t in &ready.items {
                println!("ready-task  id={}  title={}", t.id, t.title);
            }
        }
        if let Some(agents) = &report.agents {
            println!(
                "agents  total={}  active={}  tokens-today={}  cost-today={:.2}",
                agents.total, agents.active, agents.tokens_today, agents.cost_today
            );
        }
        if let Some(sessions) = &report.sessions {
            println!(
                "sessions  active={}  max={}",
                sessions.active,
                sessions.max.map_or_else(|| "-".to_string(), |m| m.to_string())
            );
        }
        for line in &report.advice {
            println!("advice  {line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::task;

    #[test]
    fn task_summary_counts_statuses_and_epics() {
        let mut epic = task("web-1", "open");
        epic.issue_type = "epic".into();
        let mut closed_epic = task("web-2", "closed");
        closed_epic.issue_type = "epic".into();
        let tasks = vec![epic, closed_epic, task("web-3", "open"), task("web-4", "in_progress")];

        let summary = summarize_tasks(&tasks);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.by_status.get("open"), Some(&2));
        assert_eq!(summary.by_status.get("closed"), Some(&1));
        assert_eq!(summary.open_epics, 1);
    }
}
