//! Epic swarm launches: pick an epic, choose children, spawn agents for them.

use std::cmp::Reverse;
use std::collections::VecDeque;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::client::Backend;
use crate::error::ApiError;
use crate::model::{ChildSummary, Epic, SpawnRequest, Task, TaskFilter, TaskStatus};
use crate::pacing::{SpawnReport, StaggeredSpawner};

/// Hard ceiling on concurrent agents per swarm.
pub const MAX_CONCURRENT_CAP: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Parallel,
    Sequential,
}

/// Per-epic launch settings, persisted in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SwarmSettings {
    #[serde(default = "default_mode")]
    pub mode: ExecutionMode,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    /// Completed tasks after which the swarm asks for a human review.
    #[serde(default = "default_review_threshold")]
    pub review_threshold: u8,
    /// Also spawn selected children that are still blocked.
    #[serde(default)]
    pub auto_spawn_blocked: bool,
}

const fn default_mode() -> ExecutionMode {
    ExecutionMode::Parallel
}
const fn default_max_concurrent() -> u32 {
    3
}
const fn default_review_threshold() -> u8 {
    3
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            max_concurrent: default_max_concurrent(),
            review_threshold: default_review_threshold(),
            auto_spawn_blocked: false,
        }
    }
}

impl SwarmSettings {
    /// Copy for one launch with `max_concurrent` clamped to
    /// `min(ready, session_cap, 8)`. Zero means no free sessions.
    pub fn clamped(&self, ready: u32, session_cap: Option<u32>) -> Self {
        let bound = max_concurrent_bound(ready, session_cap);
        Self {
            max_concurrent: self.max_concurrent.max(1).min(bound),
            ..self.clone()
        }
    }

    /// How many of this swarm's agents may run at once.
    pub fn batch_size(&self) -> usize {
        match self.mode {
            ExecutionMode::Sequential => usize::from(self.max_concurrent > 0),
            ExecutionMode::Parallel => self.max_concurrent as usize,
        }
    }
}

/// Upper bound for `max_concurrent`.
///
/// An epic with no ready children still allows one agent for blocked picks;
/// a session cap of zero allows none.
pub fn max_concurrent_bound(ready: u32, session_cap: Option<u32>) -> u32 {
    ready
        .max(1)
        .min(session_cap.unwrap_or(MAX_CONCURRENT_CAP))
        .min(MAX_CONCURRENT_CAP)
}

/// Order epics by ready children, then by total children, both descending.
pub fn sort_epics(epics: &mut [Epic]) {
    epics.sort_by_key(|e| (Reverse(e.summary.ready), Reverse(e.summary.total)));
}

/// Flag values that override the remembered settings for one launch.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverride {
    pub mode: Option<ExecutionMode>,
    pub max_concurrent: Option<u32>,
    pub review_threshold: Option<u8>,
    pub auto_spawn_blocked: Option<bool>,
}

impl SettingsOverride {
    pub fn apply(&self, settings: &mut SwarmSettings) {
        if let Some(mode) = self.mode {
            settings.mode = mode;
        }
        if let Some(n) = self.max_concurrent {
            settings.max_concurrent = n;
        }
        if let Some(n) = self.review_threshold {
            settings.review_threshold = n;
        }
        if let Some(b) = self.auto_spawn_blocked {
            settings.auto_spawn_blocked = b;
        }
    }
}

/// All open epics with their child readiness, sorted for display.
///
/// Children summaries are fetched concurrently; an epic whose summary fails
/// to load is shown with zero counts.
pub fn annotated_epics(backend: &dyn Backend) -> Result<Vec<Epic>, ApiError> {
    let filter = TaskFilter { issue_type: Some("epic".into()), ..TaskFilter::default() };
    let epics: Vec<Task> = backend
        .list_tasks(&filter)?
        .into_iter()
        .filter(|t| t.is_epic() && t.status != TaskStatus::Closed)
        .collect();

    let summaries: Vec<ChildSummary> = std::thread::scope(|s| {
        let handles: Vec<_> = epics
            .iter()
            .map(|epic| s.spawn(move || backend.epic_children(&epic.id)))
            .collect();
        handles
            .into_iter()
            .zip(&epics)
            .map(|(h, epic)| match h.join() {
                Ok(Ok(children)) => children.summary,
                Ok(Err(e)) => {
                    tracing::warn!(epic = %epic.id, error = %e, "could not load epic children");
                    ChildSummary::default()
                }
                Err(_) => ChildSummary::default(),
            })
            .collect()
    });

    let mut annotated: Vec<Epic> = epics
        .into_iter()
        .zip(summaries)
        .map(|(task, summary)| Epic { task, summary })
        .collect();
    sort_epics(&mut annotated);
    Ok(annotated)
}

/// Launchable epics: those with ready children, plus `preselected` even
/// when it has none.
pub fn load_candidates(
    backend: &dyn Backend,
    preselected: Option<&str>,
) -> Result<Vec<Epic>, ApiError> {
    Ok(annotated_epics(backend)?
        .into_iter()
        .filter(|e| e.summary.ready > 0 || preselected == Some(e.task.id.as_str()))
        .collect())
}

/// Launch state of an epic child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildState {
    Ready,
    Blocked,
    InProgress,
    Closed,
    /// A status this client does not know; never launched.
    Unknown,
}

/// Only an open child without blockers is ready.
pub fn classify(child: &Task) -> ChildState {
    match child.status {
        TaskStatus::Closed => ChildState::Closed,
        TaskStatus::InProgress => ChildState::InProgress,
        TaskStatus::Blocked => ChildState::Blocked,
        TaskStatus::Open if !child.blocked_by.is_empty() => ChildState::Blocked,
        TaskStatus::Open => ChildState::Ready,
        TaskStatus::Other(_) => ChildState::Unknown,
    }
}

/// Children the user may pick: ready or blocked ones.
pub fn selectable(children: &[Task]) -> Vec<&Task> {
    children
        .iter()
        .filter(|c| matches!(classify(c), ChildState::Ready | ChildState::Blocked))
        .collect()
}

/// What a launch will do with the user's selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    pub start: Vec<String>,
    /// Eligible but beyond the concurrency limit; started as slots free up.
    pub queued: Vec<String>,
    /// Blocked and `auto_spawn_blocked` is off.
    pub held: Vec<String>,
}

/// Split `selected` children into started, queued and held.
///
/// Ready children go first in the order given, blocked ones after them.
pub fn plan_launch(selected: &[&Task], settings: &SwarmSettings) -> LaunchPlan {
    let mut plan = LaunchPlan::default();
    let mut eligible = Vec::new();
    let mut blocked = Vec::new();
    for child in selected {
        match classify(child) {
            ChildState::Ready => eligible.push(child.id.clone()),
            ChildState::Blocked if settings.auto_spawn_blocked => blocked.push(child.id.clone()),
            ChildState::Blocked => plan.held.push(child.id.clone()),
            ChildState::InProgress | ChildState::Closed | ChildState::Unknown => {}
        }
    }
    eligible.extend(blocked);

    let batch = settings.batch_size().min(eligible.len());
    plan.queued = eligible.split_off(batch);
    plan.start = eligible;
    plan
}

/// Run a planned launch to completion.
///
/// The first batch is spawned through the pacer. Queued children follow as
/// this swarm's agents finish: every `poll` the epic's children and
/// `/api/work` are re-read, and a queued child starts only while fewer than
/// `batch_size()` spawned children are still open and the server has a free
/// session. Sequential mode therefore runs one child at a time. Cancelling
/// reports whatever is still queued as skipped.
pub fn launch(
    spawner: &StaggeredSpawner<'_>,
    epic_id: &str,
    plan: &LaunchPlan,
    settings: &SwarmSettings,
    poll: Duration,
    mut on_spawn: impl FnMut(&str, bool),
) -> SpawnReport {
    tracing::info!(
        epic = epic_id,
        start = plan.start.len(),
        queued = plan.queued.len(),
        mode = ?settings.mode,
        "launching swarm"
    );
    let request = |id: &String| SpawnRequest {
        task_id: id.clone(),
        epic_id: Some(epic_id.to_string()),
        review_threshold: Some(settings.review_threshold),
        ..SpawnRequest::default()
    };

    let mut report = spawner.run(plan.start.iter().map(request).collect(), &mut on_spawn);
    let mut running: Vec<String> = report.spawned.iter().map(|s| s.task_id.clone()).collect();
    let mut queue: VecDeque<String> = plan.queued.iter().cloned().collect();
    let window = settings.batch_size();
    let cancel = spawner.cancel_flag();

    while !queue.is_empty() {
        if window == 0 || !report.skipped.is_empty() || !cancel.sleep(poll) {
            report.skipped.extend(queue.drain(..));
            break;
        }
        let slots = match open_slots(spawner.backend(), epic_id, &mut running, window) {
            Ok(slots) => slots,
            Err(e) => {
                tracing::warn!(epic = epic_id, error = %e, "could not check swarm capacity");
                continue;
            }
        };
        if slots == 0 {
            continue;
        }
        let take = slots.min(queue.len());
        let batch: Vec<SpawnRequest> = queue.drain(..take).map(|id| request(&id)).collect();
        tracing::debug!(
            epic = epic_id,
            starting = batch.len(),
            queued = queue.len(),
            "slots freed"
        );
        let next = spawner.run(batch, &mut on_spawn);
        running.extend(next.spawned.iter().map(|s| s.task_id.clone()));
        report.merge(next);
    }
    report
}

/// Free launch slots: the swarm window minus children spawned by this
/// launch that are still open, capped by the server's free sessions.
fn open_slots(
    backend: &dyn Backend,
    epic_id: &str,
    running: &mut Vec<String>,
    window: usize,
) -> Result<usize, ApiError> {
    let children = backend.epic_children(epic_id)?.children;
    running.retain(|id| {
        children
            .iter()
            .any(|c| &c.id == id && c.status != TaskStatus::Closed)
    });
    let mut slots = window.saturating_sub(running.len());
    if let Some(free) = backend.work_status()?.free_slots() {
        slots = slots.min(free as usize);
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EpicChildren, WorkStatus};
    use crate::pacing::CancelFlag;
    use crate::testing::{FakeBackend, task};

    const POLL: Duration = Duration::from_millis(5);

    fn epic(id: &str, ready: u32, total: u32) -> Epic {
        let mut t = task(id, "open");
        t.issue_type = "epic".into();
        Epic { task: t, summary: ChildSummary { ready, in_progress: 0, total } }
    }

    #[test]
    fn epics_sorted_by_ready_then_total() {
        let mut epics =
            vec![epic("e-1", 1, 9), epic("e-2", 3, 4), epic("e-3", 3, 7), epic("e-4", 0, 2)];
        sort_epics(&mut epics);
        let ids: Vec<&str> = epics.iter().map(|e| e.task.id.as_str()).collect();
        assert_eq!(ids, vec!["e-3", "e-2", "e-1", "e-4"]);
    }

    #[test]
    fn max_concurrent_bounded_by_ready_sessions_and_cap() {
        assert_eq!(max_concurrent_bound(20, None), 8);
        assert_eq!(max_concurrent_bound(2, Some(5)), 2);
        assert_eq!(max_concurrent_bound(6, Some(4)), 4);
        assert_eq!(max_concurrent_bound(0, Some(5)), 1);

        let settings = SwarmSettings { max_concurrent: 7, ..SwarmSettings::default() };
        assert_eq!(settings.clamped(3, Some(10)).max_concurrent, 3);
        let settings = SwarmSettings { max_concurrent: 0, ..SwarmSettings::default() };
        assert_eq!(settings.clamped(3, Some(10)).max_concurrent, 1);
    }

    #[test]
    fn no_free_sessions_allows_no_agents() {
        assert_eq!(max_concurrent_bound(4, Some(0)), 0);
        for mode in [ExecutionMode::Parallel, ExecutionMode::Sequential] {
            let settings = SwarmSettings { mode, ..SwarmSettings::default() }.clamped(4, Some(0));
            assert_eq!(settings.max_concurrent, 0);
            assert_eq!(settings.batch_size(), 0);
        }
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut settings = SwarmSettings { max_concurrent: 6, ..SwarmSettings::default() };
        let flags = SettingsOverride { review_threshold: Some(5), ..SettingsOverride::default() };
        flags.apply(&mut settings);
        assert_eq!(settings.max_concurrent, 6);
        assert_eq!(settings.review_threshold, 5);
        assert_eq!(settings.mode, ExecutionMode::Parallel);
    }

    #[test]
    fn load_candidates_filters_and_sorts() {
        let fake = FakeBackend::new();
        {
            let mut st = fake.state.lock().unwrap();
            for (id, ready, total) in [("e-1", 0, 3), ("e-2", 2, 5), ("e-3", 4, 4), ("e-4", 2, 8)] {
                st.tasks.push(epic(id, 0, 0).task);
                st.children.insert(
                    id.to_string(),
                    EpicChildren {
                        children: vec![],
                        summary: ChildSummary { ready, in_progress: 0, total },
                    },
                );
            }
            st.tasks.push(task("e-5", "open"));
        }

        let ids = |focus| -> Vec<String> {
            load_candidates(&fake, focus).unwrap().into_iter().map(|e| e.task.id).collect()
        };
        assert_eq!(ids(None), vec!["e-3", "e-4", "e-2"]);
        assert_eq!(ids(Some("e-1")), vec!["e-3", "e-4", "e-2", "e-1"]);
    }

    #[test]
    fn child_failure_counts_as_not_ready() {
        let fake = FakeBackend::new();
        fake.state.lock().unwrap().tasks.push(epic("e-1", 0, 0).task);
        fake.fail("epic_children");
        assert!(load_candidates(&fake, None).unwrap().is_empty());
    }

    #[test]
    fn classify_children() {
        let mut waiting = task("c-2", "open");
        waiting.blocked_by = vec!["c-1".into()];
        assert_eq!(classify(&task("c-1", "open")), ChildState::Ready);
        assert_eq!(classify(&waiting), ChildState::Blocked);
        assert_eq!(classify(&task("c-3", "blocked")), ChildState::Blocked);
        assert_eq!(classify(&task("c-4", "in_progress")), ChildState::InProgress);
        assert_eq!(classify(&task("c-5", "closed")), ChildState::Closed);

        let children =
            vec![task("c-1", "open"), task("c-4", "in_progress"), task("c-3", "blocked")];
        assert_eq!(selectable(&children).len(), 2);
    }

    #[test]
    fn unknown_status_is_never_launched() {
        let deferred = task("c-9", "deferred");
        assert_eq!(classify(&deferred), ChildState::Unknown);
        assert!(selectable(std::slice::from_ref(&deferred)).is_empty());

        let eager = SwarmSettings { auto_spawn_blocked: true, ..SwarmSettings::default() };
        let plan = plan_launch(&[&deferred], &eager);
        assert!(plan.start.is_empty());
        assert!(plan.queued.is_empty());
        assert!(plan.held.is_empty());
    }

    #[test]
    fn plan_respects_mode_and_blocked_policy() {
        let ready_a = task("c-1", "open");
        let ready_b = task("c-2", "open");
        let blocked = task("c-3", "blocked");
        let selected = vec![&blocked, &ready_a, &ready_b];

        let parallel = SwarmSettings { max_concurrent: 2, ..SwarmSettings::default() };
        let plan = plan_launch(&selected, &parallel);
        assert_eq!(plan.start, vec!["c-1", "c-2"]);
        assert!(plan.queued.is_empty());
        assert_eq!(plan.held, vec!["c-3"]);

        let eager = SwarmSettings {
            max_concurrent: 2,
            auto_spawn_blocked: true,
            ..SwarmSettings::default()
        };
        let plan = plan_launch(&selected, &eager);
        assert_eq!(plan.start, vec!["c-1", "c-2"]);
        assert_eq!(plan.queued, vec!["c-3"]);

        let sequential =
            SwarmSettings { mode: ExecutionMode::Sequential, ..SwarmSettings::default() };
        let plan = plan_launch(&selected, &sequential);
        assert_eq!(plan.start, vec!["c-1"]);
        assert_eq!(plan.queued, vec!["c-2"]);
    }

    #[test]
    fn launch_tags_requests_with_epic() {
        let fake = FakeBackend::new();
        let spawner = StaggeredSpawner::new(&fake, Duration::ZERO, CancelFlag::new());
        let plan = LaunchPlan { start: vec!["c-1".into(), "c-2".into()], ..LaunchPlan::default() };
        let report =
            launch(&spawner, "e-1", &plan, &SwarmSettings::default(), Duration::ZERO, |_, _| {});
        assert_eq!(report.spawned.len(), 2);
        assert_eq!(fake.spawned(), vec!["c-1", "c-2"]);
    }

    fn epic_with_children(fake: &FakeBackend, ids: &[&str]) {
        let children = ids.iter().map(|id| task(id, "open")).collect();
        fake.state.lock().unwrap().children.insert(
            "e-1".into(),
            EpicChildren { children, summary: ChildSummary::default() },
        );
    }

    fn finish(fake: &FakeBackend, id: &str) {
        let mut state = fake.state.lock().unwrap();
        if let Some(epic) = state.children.get_mut("e-1")
            && let Some(child) = epic.children.iter_mut().find(|c| c.id == id)
        {
            child.status = TaskStatus::Closed;
        }
    }

    #[test]
    fn sequential_launch_drains_queue_one_at_a_time() {
        let fake = FakeBackend::new();
        epic_with_children(&fake, &["c-1", "c-2", "c-3"]);
        let refs = ["c-1", "c-2", "c-3"].map(|id| task(id, "open"));
        let selected: Vec<&Task> = refs.iter().collect();
        let settings =
            SwarmSettings { mode: ExecutionMode::Sequential, ..SwarmSettings::default() };
        let plan = plan_launch(&selected, &settings);
        assert_eq!(plan.queued, vec!["c-2", "c-3"]);

        let spawner = StaggeredSpawner::new(&fake, Duration::ZERO, CancelFlag::new());
        let mut open_when_spawned = Vec::new();
        let report = launch(&spawner, "e-1", &plan, &settings, POLL, |id, _| {
            let state = fake.state.lock().unwrap();
            let open = state.children["e-1"]
                .children
                .iter()
                .filter(|c| {
                    c.status != TaskStatus::Closed && state.spawns.iter().any(|(s, _)| s == &c.id)
                })
                .count();
            open_when_spawned.push(open);
            drop(state);
            finish(&fake, id);
        });

        assert_eq!(fake.spawned(), vec!["c-1", "c-2", "c-3"]);
        assert_eq!(report.spawned.len(), 3);
        assert!(report.skipped.is_empty());
        assert!(open_when_spawned.iter().all(|&n| n == 1));
    }

    #[test]
    fn queued_children_wait_for_a_free_session() {
        let fake = FakeBackend::new();
        epic_with_children(&fake, &["c-1", "c-2"]);
        fake.state.lock().unwrap().work = WorkStatus { active_sessions: 4, max_sessions: Some(4) };
        let plan = LaunchPlan {
            start: vec!["c-1".into()],
            queued: vec!["c-2".into()],
            ..LaunchPlan::default()
        };
        let settings = SwarmSettings { max_concurrent: 2, ..SwarmSettings::default() };
        let cancel = CancelFlag::new();
        let spawner = StaggeredSpawner::new(&fake, Duration::ZERO, cancel.clone());

        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(40));
                assert_eq!(fake.spawned(), vec!["c-1"]);
                fake.state.lock().unwrap().work.active_sessions = 3;
            });
            let report = launch(&spawner, "e-1", &plan, &settings, POLL, |_, _| {});
            assert_eq!(report.spawned.len(), 2);
        });
        assert_eq!(fake.spawned(), vec!["c-1", "c-2"]);
    }

    #[test]
    fn cancel_reports_queue_as_skipped() {
        let fake = FakeBackend::new();
        epic_with_children(&fake, &["c-1", "c-2", "c-3"]);
        let plan = LaunchPlan {
            start: vec!["c-1".into()],
            queued: vec!["c-2".into(), "c-3".into()],
            ..LaunchPlan::default()
        };
        let settings =
            SwarmSettings { mode: ExecutionMode::Sequential, ..SwarmSettings::default() };
        let cancel = CancelFlag::new();
        let spawner = StaggeredSpawner::new(&fake, Duration::ZERO, cancel.clone());
        let report = launch(&spawner, "e-1", &plan, &settings, POLL, |_, _| cancel.cancel());

        assert_eq!(fake.spawned(), vec!["c-1"]);
        assert_eq!(report.skipped, vec!["c-2", "c-3"]);
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let s: SwarmSettings = serde_json::from_str(r#"{"mode":"sequential"}"#).unwrap();
        assert_eq!(s.mode, ExecutionMode::Sequential);
        assert_eq!(s.max_concurrent, 3);
        assert!(!s.auto_spawn_blocked);
    }
}
