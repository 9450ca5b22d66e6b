//! Fleet-wide usage: aggregation over agents and the periodic poller.

use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;

use crate::client::Backend;
use crate::model::{Agent, SparklinePoint, UsageMetrics};
use crate::pacing::CancelFlag;
use crate::sparkline::TimeWindow;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const TOP_CONSUMERS: usize = 3;

/// Totals across all agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SystemStats {
    pub tokens_today: u64,
    pub cost_today: f64,
    pub tokens_week: u64,
    pub cost_week: f64,
    pub active_agents: usize,
}

impl SystemStats {
    pub fn from_agents(agents: &[Agent]) -> Self {
        agents.iter().fold(Self::default(), |mut acc, a| {
            acc.tokens_today += a.usage.today.total_tokens;
            acc.cost_today += a.usage.today.cost;
            acc.tokens_week += a.usage.week.total_tokens;
            acc.cost_week += a.usage.week.cost;
            if a.online || a.usage.today.total_tokens > 0 {
                acc.active_agents += 1;
            }
            acc
        })
    }
}

/// The heaviest users today, at most three, agents with no usage left out.
pub fn top_consumers(agents: &[Agent]) -> Vec<&Agent> {
    let mut users: Vec<&Agent> = agents
        .iter()
        .filter(|a| a.usage.today.total_tokens > 0)
        .collect();
    users.sort_by(|a, b| {
        b.usage
            .today
            .total_tokens
            .cmp(&a.usage.today.total_tokens)
            .then_with(|| a.name.cmp(&b.name))
    });
    users.truncate(TOP_CONSUMERS);
    users
}

/// Latest known values of the three usage feeds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageSnapshot {
    pub metrics: Option<UsageMetrics>,
    pub agents: Vec<Agent>,
    pub sparkline: Vec<SparklinePoint>,
    /// Feeds that failed on the last refresh.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stale: Vec<&'static str>,
}

impl UsageSnapshot {
    /// Refresh each feed independently. A failed feed keeps its previous
    /// value and is marked stale.
    pub fn refresh(&mut self, backend: &dyn Backend, window: TimeWindow) {
        self.stale.clear();
        let (metrics, agents, sparkline) = std::thread::scope(|s| {
            let metrics = s.spawn(|| backend.usage_metrics());
            let agents = s.spawn(|| backend.list_agents());
            let sparkline = backend.agent_sparkline(window.api_range());
            (metrics.join(), agents.join(), sparkline)
        });

        match metrics {
            Ok(Ok(m)) => self.metrics = Some(m),
            Ok(Err(e)) => self.mark_stale("metrics", &e),
            Err(_) => self.stale.push("metrics"),
        }
        match agents {
            Ok(Ok(a)) => self.agents = a,
            Ok(Err(e)) => self.mark_stale("agents", &e),
            Err(_) => self.stale.push("agents"),
        }
        match sparkline {
            Ok(points) => self.sparkline = points,
            Err(e) => self.mark_stale("sparkline", &e),
        }
    }

    fn mark_stale(&mut self, feed: &'static str, error: &dyn std::fmt::Display) {
        tracing::warn!(feed, error = %error, "usage refresh failed");
        self.stale.push(feed);
    }

    pub fn stats(&self) -> SystemStats {
        SystemStats::from_agents(&self.agents)
    }
}

/// Background refresh on a fixed interval until cancelled.
pub struct UsagePoller {
    cancel: CancelFlag,
    handle: Option<JoinHandle<()>>,
}

impl UsagePoller {
    /// Refresh immediately, then every `interval`, sending each snapshot.
    /// The poller stops on cancel or when the receiver goes away.
    pub fn spawn(
        backend: std::sync::Arc<dyn Backend>,
        window: TimeWindow,
        interval: Duration,
        tx: Sender<UsageSnapshot>,
    ) -> Self {
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        let handle = std::thread::spawn(move || {
            let mut snapshot = UsageSnapshot::default();
            loop {
                snapshot.refresh(backend.as_ref(), window);
                if tx.send(snapshot.clone()).is_err() || !flag.sleep(interval) {
                    break;
                }
            }
            tracing::debug!("usage poller stopped");
        });
        Self { cancel, handle: Some(handle) }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UsagePoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::mpsc;

    use super::*;
    use crate::model::{AgentUsage, UsageWindow};
    use crate::testing::FakeBackend;

    fn agent(name: &str, today: u64, week: u64, online: bool) -> Agent {
        Agent {
            name: name.into(),
            online,
            usage: AgentUsage {
                today: UsageWindow { total_tokens: today, cost: today as f64 / 1000.0 },
                week: UsageWindow { total_tokens: week, cost: week as f64 / 1000.0 },
            },
            ..Agent::default()
        }
    }

    fn fleet() -> Vec<Agent> {
        vec![
            agent("amber", 500, 4000, true),
            agent("bolt", 0, 900, false),
            agent("cedar", 1200, 1300, false),
            agent("dune", 80, 80, false),
            agent("echo", 700, 700, true),
            agent("fern", 0, 0, true),
        ]
    }

    #[test]
    fn stats_are_sums_over_agents() {
        let agents = fleet();
        let stats = SystemStats::from_agents(&agents);
        let today: u64 = agents.iter().map(|a| a.usage.today.total_tokens).sum();
        assert_eq!(stats.tokens_today, today);
        let week: u64 = agents.iter().map(|a| a.usage.week.total_tokens).sum();
        assert_eq!(stats.tokens_week, week);
        let cost: f64 = agents.iter().map(|a| a.usage.today.cost).sum();
        assert!((stats.cost_today - cost).abs() < 1e-9);
        // bolt is the only agent offline with no usage today.
        assert_eq!(stats.active_agents, 5);
    }

    #[test]
    fn top_consumers_bounded_sorted_and_nonzero() {
        let agents = fleet();
        let top: Vec<&str> = top_consumers(&agents).iter().map(|a| a.name.as_str()).collect();
        assert_eq!(top, vec!["cedar", "echo", "amber"]);

        let idle = vec![agent("a", 0, 10, true), agent("b", 5, 5, false)];
        let top: Vec<&str> = top_consumers(&idle).iter().map(|a| a.name.as_str()).collect();
        assert_eq!(top, vec!["b"]);
    }

    #[test]
    fn failed_feed_keeps_previous_value() {
        let fake = FakeBackend::new();
        fake.state.lock().unwrap().agents = fleet();
        let mut snapshot = UsageSnapshot::default();
        snapshot.refresh(&fake, TimeWindow::Day);
        assert_eq!(snapshot.agents.len(), 6);
        assert!(snapshot.stale.is_empty());

        fake.fail("list_agents");
        fake.state.lock().unwrap().usage.tier = Some("max".into());
        snapshot.refresh(&fake, TimeWindow::Day);
        assert_eq!(snapshot.agents.len(), 6);
        assert_eq!(snapshot.stale, vec!["agents"]);
        assert_eq!(snapshot.metrics.unwrap().tier.as_deref(), Some("max"));
    }

    #[test]
    fn poller_sends_and_stops() {
        let fake = Arc::new(FakeBackend::new());
        let (tx, rx) = mpsc::channel();
        let poller =
            UsagePoller::spawn(fake.clone(), TimeWindow::Day, Duration::from_millis(20), tx);
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        poller.stop();
        let polls = fake.calls().iter().filter(|c| c.starts_with("usage_metrics")).count();
        assert!(polls >= 2);
        while rx.try_recv().is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
