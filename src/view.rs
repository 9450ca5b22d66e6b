//! Task detail loading with abort-on-navigate.
//!
//! Every navigation bumps a generation counter. A fetch carries the token of
//! the generation it started in; if the user moved on before it finished, its
//! result is dropped so a slow response for an earlier task never replaces the
//! task currently on screen.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::client::Backend;
use crate::error::ApiError;
use crate::model::{Attachment, HistoryEvent, SessionLog, Task};

/// Handle to the navigation generation a request belongs to.
#[derive(Debug, Clone)]
pub struct AbortToken {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl AbortToken {
    pub fn is_aborted(&self) -> bool {
        self.current.load(Ordering::SeqCst) != self.generation
    }

    /// `Err(Aborted)` once a newer navigation has started.
    pub fn check(&self) -> Result<(), ApiError> {
        if self.is_aborted() {
            Err(ApiError::Aborted)
        } else {
            Ok(())
        }
    }
}

/// Issues abort tokens; each new token aborts all earlier ones.
#[derive(Debug, Default, Clone)]
pub struct Navigator {
    current: Arc<AtomicU64>,
}

impl Navigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn navigate(&self) -> AbortToken {
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        AbortToken { generation, current: Arc::clone(&self.current) }
    }

    /// Abort whatever is in flight without starting anything new.
    pub fn abort(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }
}

/// Everything the detail panel shows for one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub task: Task,
    pub history: Vec<HistoryEvent>,
    pub images: Vec<Attachment>,
    pub logs: Vec<SessionLog>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// The currently viewed task.
pub struct TaskView {
    backend: Arc<dyn Backend>,
    nav: Navigator,
    current: Mutex<Option<TaskDetail>>,
}

impl TaskView {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend, nav: Navigator::new(), current: Mutex::new(None) }
    }

    pub fn current(&self) -> Option<TaskDetail> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    /// Switch to task `id`, aborting any earlier load.
    ///
    /// Returns `Err(ApiError::Aborted)` when another navigation overtook this
    /// one; callers drop that silently.
    pub fn open(&self, id: &str) -> Result<TaskDetail, ApiError> {
        let token = self.nav.navigate();
        let detail = fetch_detail(self.backend.as_ref(), id, &token)?;

        let mut current = self
            .current
            .lock()
            .map_err(|_| ApiError::Transport("view state poisoned".into()))?;
        token.check()?;
        *current = Some(detail.clone());
        Ok(detail)
    }

    /// Close the panel: abort in-flight loads and clear the view.
    pub fn close(&self) {
        let mut current = self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.nav.abort();
        *current = None;
    }
}

/// Fetch the task and its side panels concurrently.
///
/// The task itself must load; history, images and logs degrade to empty with
/// a warning.
pub fn fetch_detail(
    backend: &dyn Backend,
    id: &str,
    token: &AbortToken,
) -> Result<TaskDetail, ApiError> {
    let (task, history, images, logs) = std::thread::scope(|s| {
        let history = s.spawn(|| backend.task_history(id));
        let images = s.spawn(|| backend.task_images(id));
        let logs = s.spawn(|| backend.task_logs(id));
        let task = backend.get_task(id);
        (
            task,
            join_or_panic_error(history.join()),
            join_or_panic_error(images.join()),
            join_or_panic_error(logs.join()),
        )
    });
    token.check()?;
    let task = task?;

    let mut warnings = Vec::new();
    let history = degrade(history, "history", &mut warnings);
    let images = degrade(images, "images", &mut warnings);
    let logs = degrade(logs, "logs", &mut warnings);
    Ok(TaskDetail { task, history, images, logs, warnings })
}

fn join_or_panic_error<T>(joined: std::thread::Result<Result<T, ApiError>>) -> Result<T, ApiError> {
    joined.unwrap_or_else(|_| Err(ApiError::Transport("fetch thread panicked".into())))
}

fn degrade<T>(result: Result<Vec<T>, ApiError>, what: &str, warnings: &mut Vec<String>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        tracing::warn!(what, error = %e, "detail section failed to load");
        warnings.push(format!("{what}: {e}"));
        Vec::new()
    })
}
