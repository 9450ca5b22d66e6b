//! Staggered agent spawning.
//!
//! Spawns are issued strictly one after another with a fixed delay between
//! them. There is no feedback from how long an agent actually takes to start;
//! the delay is a pacing policy only. Cancelling stops further requests but
//! never undoes spawns already issued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::client::Backend;
use crate::model::{SpawnRequest, Task, TaskStatus};

pub const DEFAULT_STAGGER: Duration = Duration::from_millis(2000);

const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on cancellation.
    /// Returns false if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(CANCEL_POLL.min(deadline - now));
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Spawned {
    pub task_id: String,
    pub session: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpawnFailure {
    pub task_id: String,
    pub error: String,
}

/// Outcome of a staggered run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpawnReport {
    pub spawned: Vec<Spawned>,
    pub failed: Vec<SpawnFailure>,
    /// Requests never issued because the run was cancelled.
    pub skipped: Vec<String>,
}

impl SpawnReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// Append the outcome of a later run.
    pub fn merge(&mut self, other: SpawnReport) {
        self.spawned.extend(other.spawned);
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
    }
}

pub struct StaggeredSpawner<'a> {
    backend: &'a dyn Backend,
    stagger: Duration,
    cancel: CancelFlag,
}

impl<'a> StaggeredSpawner<'a> {
    pub fn new(backend: &'a dyn Backend, stagger: Duration, cancel: CancelFlag) -> Self {
        Self { backend, stagger, cancel }
    }

    pub fn backend(&self) -> &'a dyn Backend {
        self.backend
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Spawn each request in order, waiting `stagger` between requests.
    ///
    /// A failed spawn is recorded and the sequence continues; nothing is
    /// retried.
    pub fn run(
        &self,
        requests: Vec<SpawnRequest>,
        mut on_spawn: impl FnMut(&str, bool),
    ) -> SpawnReport {
        let mut report = SpawnReport::default();
        let mut pending = requests.into_iter();

        while let Some(request) = pending.next() {
            if self.cancel.is_cancelled() {
                report.skipped.push(request.task_id);
                report.skipped.extend(pending.by_ref().map(|r| r.task_id));
                break;
            }

            match self.backend.spawn(&request) {
                Ok(result) => {
                    tracing::info!(
                        task = %request.task_id,
                        session = ?result.session,
                        "agent spawned"
                    );
                    on_spawn(&request.task_id, true);
                    report.spawned.push(Spawned {
                        task_id: request.task_id,
                        session: result.session,
                    });
                }
                Err(e) => {
                    tracing::warn!(task = %request.task_id, error = %e, "spawn failed");
                    on_spawn(&request.task_id, false);
                    report.failed.push(SpawnFailure {
                        task_id: request.task_id,
                        error: e.to_string(),
                    });
                }
            }

            if pending.len() > 0 && !self.cancel.sleep(self.stagger) {
                report.skipped.extend(pending.by_ref().map(|r| r.task_id));
                break;
            }
        }
        report
    }
}

/// Pick up to `count` ready tasks to start: lowest priority number first,
/// then oldest. Epics are never spawned directly.
pub fn select_next(ready: &[Task], count: usize) -> Vec<&Task> {
    let mut picks: Vec<&Task> = ready
        .iter()
        .filter(|t| !t.is_epic() && t.status == TaskStatus::Open)
        .collect();
    picks.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.created().cmp(&b.created()))
            .then_with(|| a.id.cmp(&b.id))
    });
    picks.truncate(count);
    picks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, task};

    fn requests(ids: &[&str]) -> Vec<SpawnRequest> {
        ids.iter()
            .map(|id| SpawnRequest { task_id: (*id).to_string(), ..SpawnRequest::default() })
            .collect()
    }

    #[test]
    fn spawns_are_sequential_and_spaced() {
        let fake = FakeBackend::new();
        let spawner = StaggeredSpawner::new(&fake, Duration::from_millis(40), CancelFlag::new());
        let report = spawner.run(requests(&["a-1", "a-2", "a-3"]), |_, _| {});
        assert_eq!(report.spawned.len(), 3);
        assert_eq!(fake.spawned(), vec!["a-1", "a-2", "a-3"]);
        let times = fake.spawn_times();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(40));
        }
    }

    #[test]
    fn failures_do_not_stop_the_sequence() {
        let fake = FakeBackend::new();
        fake.fail("spawn");
        let spawner = StaggeredSpawner::new(&fake, Duration::ZERO, CancelFlag::new());
        let report = spawner.run(requests(&["a-1", "a-2"]), |_, _| {});
        assert_eq!(report.failed.len(), 2);
        assert_eq!(fake.spawned().len(), 2);
        assert!(!report.is_clean());
    }

    #[test]
    fn cancel_stops_further_requests() {
        let fake = FakeBackend::new();
        let cancel = CancelFlag::new();
        let spawner = StaggeredSpawner::new(&fake, Duration::from_millis(20), cancel.clone());
        let report = spawner.run(requests(&["a-1", "a-2", "a-3"]), |id, _| {
            if id == "a-1" {
                cancel.cancel();
            }
        });
        assert_eq!(fake.spawned(), vec!["a-1"]);
        assert_eq!(report.skipped, vec!["a-2", "a-3"]);
    }

    #[test]
    fn cancelled_sleep_returns_early() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let start = Instant::now();
        assert!(!cancel.sleep(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn select_next_orders_by_priority_then_age() {
        let mut a = task("w-1", "open");
        a.priority = 2;
        a.created_at = Some("2026-01-02T00:00:00Z".into());
        let mut b = task("w-2", "open");
        b.priority = 1;
        let mut c = task("w-3", "open");
        c.priority = 2;
        c.created_at = Some("2026-01-01T00:00:00Z".into());
        let mut epic = task("w-4", "open");
        epic.issue_type = "epic".into();
        epic.priority = 0;
        let ready = vec![a, b, c, epic];

        let ids: Vec<&str> = select_next(&ready, 2).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["w-2", "w-3"]);
    }
}
