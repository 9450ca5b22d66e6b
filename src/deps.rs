//! Dependency editing for a single task.

use crate::client::Backend;
use crate::error::ApiError;
use crate::model::{Task, TaskFilter, TaskPatch, project_prefix};

/// Tasks `task` may depend on, drawn from `pool`.
///
/// Candidates share the task's project prefix, are open or in progress, and
/// are neither the task itself nor already selected.
pub fn candidates<'a>(task_id: &str, selected: &[String], pool: &'a [Task]) -> Vec<&'a Task> {
    let prefix = project_prefix(task_id);
    pool.iter()
        .filter(|t| t.id != task_id)
        .filter(|t| project_prefix(&t.id) == prefix)
        .filter(|t| t.status.is_active())
        .filter(|t| !selected.iter().any(|s| s == &t.id))
        .collect()
}

/// Re-fetch the pool and return the current candidates for `task`.
pub fn fetch_candidates(backend: &dyn Backend, task: &Task) -> Result<Vec<Task>, ApiError> {
    let filter = TaskFilter {
        project: task.project.clone(),
        ..TaskFilter::default()
    };
    let pool = backend.list_tasks(&filter)?;
    Ok(candidates(&task.id, &task.depends_on, &pool)
        .into_iter()
        .cloned()
        .collect())
}

/// Add `dep_id` to `task`'s dependencies.
///
/// The pool is fetched fresh so that a dependency closed in the meantime is
/// refused here rather than by the server.
pub fn add_dependency(backend: &dyn Backend, task: &Task, dep_id: &str) -> Result<Task, ApiError> {
    let pool = fetch_candidates(backend, task)?;
    if !pool.iter().any(|t| t.id == dep_id) {
        return Err(ApiError::Validation(format!(
            "{dep_id} cannot be a dependency of {}: \
             it must be an open or in-progress task in project {}",
            task.id,
            task.project_prefix()
        )));
    }
    let mut depends_on = task.depends_on.clone();
    depends_on.push(dep_id.to_string());
    tracing::info!(task = %task.id, dependency = dep_id, "adding dependency");
    let patch = TaskPatch { depends_on: Some(depends_on), ..TaskPatch::default() };
    backend.patch_task(&task.id, &patch)
}

pub fn remove_dependency(
    backend: &dyn Backend,
    task: &Task,
    dep_id: &str,
) -> Result<Task, ApiError> {
    if !task.depends_on.iter().any(|d| d == dep_id) {
        return Err(ApiError::Validation(format!("{} does not depend on {dep_id}", task.id)));
    }
    let depends_on: Vec<String> = task
        .depends_on
        .iter()
        .filter(|d| *d != dep_id)
        .cloned()
        .collect();
    tracing::info!(task = %task.id, dependency = dep_id, "removing dependency");
    let patch = TaskPatch { depends_on: Some(depends_on), ..TaskPatch::default() };
    backend.patch_task(&task.id, &patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, task};

    fn pool() -> Vec<Task> {
        vec![
            task("web-1", "open"),
            task("web-2", "in_progress"),
            task("web-3", "closed"),
            task("web-4", "blocked"),
            task("api-1", "open"),
            task("web-5", "open"),
        ]
    }

    #[test]
    fn candidates_scoped_to_project_and_active() {
        let pool = pool();
        let ids: Vec<&str> = candidates("web-1", &["web-5".into()], &pool)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids, vec!["web-2"]);
    }

    #[test]
    fn add_refuses_closed_task() {
        let fake = FakeBackend::with_tasks(pool());
        let me = task("web-1", "open");
        let err = add_dependency(&fake, &me, "web-3").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(fake.patches().is_empty());
    }

    #[test]
    fn add_refetches_and_patches() {
        let fake = FakeBackend::with_tasks(pool());
        let mut me = task("web-1", "open");
        me.depends_on = vec!["web-5".into()];
        let updated = add_dependency(&fake, &me, "web-2").unwrap();
        assert_eq!(updated.depends_on, vec!["web-5", "web-2"]);
        assert!(fake.calls().iter().any(|c| c == "list_tasks"));
    }

    #[test]
    fn remove_drops_only_that_edge() {
        let mut tasks = pool();
        tasks[0].depends_on = vec!["web-2".into(), "web-5".into()];
        let me = tasks[0].clone();
        let fake = FakeBackend::with_tasks(tasks);
        let updated = remove_dependency(&fake, &me, "web-2").unwrap();
        assert_eq!(updated.depends_on, vec!["web-5"]);
    }

    #[test]
    fn remove_unknown_dependency_is_rejected() {
        let fake = FakeBackend::with_tasks(pool());
        let me = task("web-1", "open");
        assert!(remove_dependency(&fake, &me, "web-9").is_err());
    }
}
