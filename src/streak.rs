//! Completion streaks computed from closed tasks.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::model::Task;

const ROLLING_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreakStats {
    /// Consecutive days with a completion, ending today.
    pub current: u32,
    pub best: u32,
    /// Completions per day over the last 30 days, today included.
    pub average_30d: f64,
    pub top_agent: Option<String>,
    /// Completions per day, for the calendar.
    pub by_day: BTreeMap<NaiveDate, u32>,
}

pub fn compute(tasks: &[Task], today: NaiveDate) -> StreakStats {
    let mut by_day: BTreeMap<NaiveDate, u32> = BTreeMap::new();
    let mut per_agent: HashMap<&str, u32> = HashMap::new();
    for task in tasks {
        let Some(day) = task.completed_on() else { continue };
        *by_day.entry(day).or_default() += 1;
        if let Some(agent) = task.assignee.as_deref() {
            *per_agent.entry(agent).or_default() += 1;
        }
    }

    let days: BTreeSet<NaiveDate> = by_day.keys().copied().collect();
    let window_start = today - Duration::days(i64::from(ROLLING_DAYS) - 1);
    let recent: u32 = by_day.range(window_start..=today).map(|(_, n)| n).sum();

    let top_agent = per_agent
        .into_iter()
        .max_by(|(a_name, a), (b_name, b)| a.cmp(b).then_with(|| b_name.cmp(a_name)))
        .map(|(name, _)| name.to_string());

    StreakStats {
        current: current_streak(&days, today),
        best: best_streak(&days),
        average_30d: f64::from(recent) / f64::from(ROLLING_DAYS),
        top_agent,
        by_day,
    }
}

/// Days in the run ending at `today`; zero if today has no completion.
pub fn current_streak(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut count = 0;
    let mut day = today;
    while days.contains(&day) {
        count += 1;
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    count
}

/// Longest run of consecutive days.
pub fn best_streak(days: &BTreeSet<NaiveDate>) -> u32 {
    let mut best = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;
    for &day in days {
        run = match prev {
            Some(p) if p.succ_opt() == Some(day) => run + 1,
            _ => 1,
        };
        best = best.max(run);
        prev = Some(day);
    }
    best
}

#[cfg(test)]
mod tests {
    use chrono::{Local, SecondsFormat, TimeZone, Utc};

    use super::*;
    use crate::model::TaskStatus;

    fn closed_on(id: &str, day: NaiveDate, agent: Option<&str>) -> Task {
        // Local noon, so the completion lands on `day` in any zone.
        let noon = Local
            .from_local_datetime(&day.and_hms_opt(12, 0, 0).unwrap())
            .single()
            .unwrap()
            .with_timezone(&Utc);
        Task {
            id: id.into(),
            status: TaskStatus::Closed,
            closed_at: Some(noon.to_rfc3339_opts(SecondsFormat::Secs, true)),
            assignee: agent.map(Into::into),
            ..Task::default()
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn gap_ends_current_streak() {
        let today = day(2026, 5, 10);
        let days: BTreeSet<_> = [today, day(2026, 5, 9), day(2026, 5, 8), day(2026, 5, 6)].into();
        assert_eq!(current_streak(&days, today), 3);
    }

    #[test]
    fn no_completion_today_means_zero() {
        let today = day(2026, 5, 10);
        let days: BTreeSet<_> = [day(2026, 5, 9), day(2026, 5, 8)].into();
        assert_eq!(current_streak(&days, today), 0);
        assert_eq!(best_streak(&days), 2);
    }

    #[test]
    fn best_streak_never_decreases() {
        let mut days = BTreeSet::new();
        let mut last = 0;
        for d in [3, 4, 9, 5, 1, 10, 11, 12, 2, 20] {
            days.insert(day(2026, 1, d));
            let best = best_streak(&days);
            assert!(best >= last);
            last = best;
        }
        assert_eq!(last, 5);
    }

    #[test]
    fn compute_counts_closed_tasks_only() {
        let today = day(2026, 5, 10);
        let mut open = closed_on("a-9", today, Some("zed"));
        open.status = TaskStatus::Open;
        let tasks = vec![
            closed_on("a-1", today, Some("bolt")),
            closed_on("a-2", today, Some("amber")),
            closed_on("a-3", day(2026, 5, 9), Some("amber")),
            closed_on("a-4", day(2026, 5, 9), Some("bolt")),
            closed_on("a-5", day(2026, 3, 1), None),
            open,
        ];
        let stats = compute(&tasks, today);
        assert_eq!(stats.current, 2);
        assert_eq!(stats.best, 2);
        assert!((stats.average_30d - 4.0 / 30.0).abs() < 1e-9);
        // Tie broken by name.
        assert_eq!(stats.top_agent.as_deref(), Some("amber"));
        assert_eq!(stats.by_day.get(&today), Some(&2));
        assert_eq!(stats.by_day.values().sum::<u32>(), 5);
    }

    #[test]
    fn empty_history() {
        let stats = compute(&[], day(2026, 5, 10));
        assert_eq!(stats.current, 0);
        assert_eq!(stats.best, 0);
        assert!(stats.top_agent.is_none());
    }
}
