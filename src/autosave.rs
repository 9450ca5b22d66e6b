//! Debounced auto-save of task field edits with optimistic update and rollback.
//!
//! Edits land in the displayed draft immediately. Each edit restarts the
//! debounce; once it elapses every pending field goes out in one PATCH. A
//! failed PATCH restores the affected fields to their last committed values,
//! unless the user edited them again while the request was in flight.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::client::Backend;
use crate::error::ApiError;
use crate::events::{EventBus, Notice, Notifier, TaskEvent};
use crate::model::{Task, TaskPatch, TaskStatus, validate_fields};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Field {
    Title,
    Description,
    Status,
    Priority,
    Type,
    Assignee,
    Labels,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Title => "title",
            Field::Description => "description",
            Field::Status => "status",
            Field::Priority => "priority",
            Field::Type => "type",
            Field::Assignee => "assignee",
            Field::Labels => "labels",
        })
    }
}

/// A single user edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Title(String),
    Description(String),
    Status(TaskStatus),
    Priority(u8),
    Type(String),
    Assignee(Option<String>),
    Labels(Vec<String>),
}

impl Edit {
    pub const fn field(&self) -> Field {
        match self {
            Edit::Title(_) => Field::Title,
            Edit::Description(_) => Field::Description,
            Edit::Status(_) => Field::Status,
            Edit::Priority(_) => Field::Priority,
            Edit::Type(_) => Field::Type,
            Edit::Assignee(_) => Field::Assignee,
            Edit::Labels(_) => Field::Labels,
        }
    }
}

/// The editable fields of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFields {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: u8,
    pub issue_type: String,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
}

impl From<&Task> for TaskFields {
    fn from(t: &Task) -> Self {
        Self {
            title: t.title.clone(),
            description: t.description.clone(),
            status: t.status.clone(),
            priority: t.priority,
            issue_type: t.issue_type.clone(),
            assignee: t.assignee.clone(),
            labels: t.labels.clone(),
        }
    }
}

impl TaskFields {
    fn apply(&mut self, edit: Edit) {
        match edit {
            Edit::Title(v) => self.title = v,
            Edit::Description(v) => self.description = v,
            Edit::Status(v) => self.status = v,
            Edit::Priority(v) => self.priority = v,
            Edit::Type(v) => self.issue_type = v,
            Edit::Assignee(v) => self.assignee = v,
            Edit::Labels(v) => self.labels = v,
        }
    }

    fn copy_field(&mut self, from: &Self, field: Field) {
        match field {
            Field::Title => self.title.clone_from(&from.title),
            Field::Description => self.description.clone_from(&from.description),
            Field::Status => self.status = from.status.clone(),
            Field::Priority => self.priority = from.priority,
            Field::Type => self.issue_type.clone_from(&from.issue_type),
            Field::Assignee => self.assignee.clone_from(&from.assignee),
            Field::Labels => self.labels.clone_from(&from.labels),
        }
    }

    fn patch_for(&self, fields: &BTreeSet<Field>) -> TaskPatch {
        let mut patch = TaskPatch::default();
        for field in fields {
            match field {
                Field::Title => patch.title = Some(self.title.clone()),
                Field::Description => patch.description = Some(self.description.clone()),
                Field::Status => patch.status = Some(self.status.clone()),
                Field::Priority => patch.priority = Some(self.priority),
                Field::Type => patch.issue_type = Some(self.issue_type.clone()),
                Field::Assignee => {
                    patch.assignee = Some(self.assignee.clone().unwrap_or_default());
                }
                Field::Labels => patch.labels = Some(self.labels.clone()),
            }
        }
        patch
    }

    /// Form rules enforced before anything is sent.
    pub fn validate(&self) -> Result<(), String> {
        validate_fields(&self.title, &self.issue_type, self.priority)
    }
}

/// What the driver should do next.
#[derive(Debug, PartialEq)]
pub enum SaveStep {
    Idle,
    Send(TaskPatch),
    Rejected(Notice),
}

struct InFlight {
    fields: BTreeSet<Field>,
}

/// Pure debounce/rollback state. Time is passed in so tests control it.
pub struct AutoSaveState {
    task_id: String,
    debounce: Duration,
    committed: TaskFields,
    displayed: TaskFields,
    pending: BTreeSet<Field>,
    deadline: Option<Instant>,
    in_flight: Option<InFlight>,
}

impl AutoSaveState {
    pub fn new(task: &Task, debounce: Duration) -> Self {
        let fields = TaskFields::from(task);
        Self {
            task_id: task.id.clone(),
            debounce,
            committed: fields.clone(),
            displayed: fields,
            pending: BTreeSet::new(),
            deadline: None,
            in_flight: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub const fn displayed(&self) -> &TaskFields {
        &self.displayed
    }

    pub const fn committed(&self) -> &TaskFields {
        &self.committed
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub const fn is_saving(&self) -> bool {
        self.in_flight.is_some()
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Apply an edit optimistically and restart the debounce.
    pub fn edit(&mut self, edit: Edit, now: Instant) {
        let field = edit.field();
        self.displayed.apply(edit);
        if self.displayed_matches_committed(field) && !self.in_flight_covers(field) {
            self.pending.remove(&field);
        } else {
            self.pending.insert(field);
        }
        self.deadline = if self.pending.is_empty() {
            None
        } else {
            Some(now + self.debounce)
        };
    }

    fn displayed_matches_committed(&self, field: Field) -> bool {
        let mut merged = self.committed.clone();
        merged.copy_field(&self.displayed, field);
        merged == self.committed
    }

    fn in_flight_covers(&self, field: Field) -> bool {
        self.in_flight.as_ref().is_some_and(|f| f.fields.contains(&field))
    }

    /// True once the debounce elapsed and no save is outstanding.
    pub fn is_due(&self, now: Instant) -> bool {
        self.in_flight.is_none() && self.deadline.is_some_and(|d| now >= d)
    }

    /// Move pending fields into flight, or reject them if the form is invalid.
    pub fn begin_save(&mut self) -> SaveStep {
        if self.in_flight.is_some() || self.pending.is_empty() {
            return SaveStep::Idle;
        }
        self.deadline = None;
        let fields = std::mem::take(&mut self.pending);

        if let Err(reason) = self.displayed.validate() {
            for field in &fields {
                self.displayed.copy_field(&self.committed, *field);
            }
            return SaveStep::Rejected(Notice::error(format!("Not saved: {reason}")));
        }

        let patch = self.displayed.patch_for(&fields);
        self.in_flight = Some(InFlight { fields });
        SaveStep::Send(patch)
    }

    /// Settle the in-flight save. Returns the notice to show, if any.
    pub fn finish(&mut self, result: &Result<Task, ApiError>) -> Option<Notice> {
        let in_flight = self.in_flight.take()?;
        match result {
            Ok(saved) => {
                let server = TaskFields::from(saved);
                for field in &in_flight.fields {
                    self.committed.copy_field(&server, *field);
                    if !self.pending.contains(field) {
                        self.displayed.copy_field(&server, *field);
                    }
                }
                None
            }
            Err(e) if e.is_aborted() => None,
            Err(e) => {
                let mut rolled_back = Vec::new();
                for field in &in_flight.fields {
                    if !self.pending.contains(field) {
                        self.displayed.copy_field(&self.committed, *field);
                        rolled_back.push(field.to_string());
                    }
                }
                Some(Notice::error(format!(
                    "Failed to save {}: {e}",
                    if rolled_back.is_empty() {
                        "changes".to_string()
                    } else {
                        rolled_back.join(", ")
                    }
                )))
            }
        }
    }
}

struct Inner {
    save: AutoSaveState,
    closed: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Background auto-saver for one task view.
///
/// Dropping it cancels the debounce timer: edits still pending at teardown are
/// discarded rather than written to a task nobody is looking at. Call
/// [`AutoSaver::flush`] first to keep them.
pub struct AutoSaver {
    shared: Arc<Shared>,
    backend: Arc<dyn Backend>,
    notifier: Arc<dyn Notifier>,
    bus: Option<Arc<EventBus>>,
    worker: Option<JoinHandle<()>>,
}

impl AutoSaver {
    pub fn spawn(
        backend: Arc<dyn Backend>,
        task: &Task,
        debounce: Duration,
        notifier: Arc<dyn Notifier>,
        bus: Option<Arc<EventBus>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                save: AutoSaveState::new(task, debounce),
                closed: false,
            }),
            wake: Condvar::new(),
        });
        let worker = {
            let shared = Arc::clone(&shared);
            let backend = Arc::clone(&backend);
            let notifier = Arc::clone(&notifier);
            let bus = bus.clone();
            std::thread::spawn(move || {
                run_worker(&shared, backend.as_ref(), notifier.as_ref(), bus.as_deref());
            })
        };
        Self { shared, backend, notifier, bus, worker: Some(worker) }
    }

    pub fn edit(&self, edit: Edit) {
        tracing::trace!(field = %edit.field(), "field edited");
        self.shared.lock().save.edit(edit, Instant::now());
        self.shared.wake.notify_all();
    }

    pub fn displayed(&self) -> TaskFields {
        self.shared.lock().save.displayed().clone()
    }

    /// Save pending edits now, on the calling thread.
    pub fn flush(&self) -> Result<(), ApiError> {
        let mut inner = self.shared.lock();
        while inner.save.is_saving() {
            inner = self
                .shared
                .wake
                .wait(inner)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        let step = inner.save.begin_save();
        let task_id = inner.save.task_id().to_string();
        drop(inner);

        let result = settle(
            &self.shared,
            step,
            &task_id,
            self.backend.as_ref(),
            self.notifier.as_ref(),
            self.bus.as_deref(),
        );
        self.shared.wake.notify_all();
        result
    }

    /// Stop the worker, discarding anything still pending.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.lock().closed = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        let inner = self.shared.lock();
        if inner.save.has_pending() {
            tracing::debug!(task = inner.save.task_id(), "auto-save closed with unsaved edits");
        }
    }
}

impl Drop for AutoSaver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn settle(
    shared: &Shared,
    step: SaveStep,
    task_id: &str,
    backend: &dyn Backend,
    notifier: &dyn Notifier,
    bus: Option<&EventBus>,
) -> Result<(), ApiError> {
    match step {
        SaveStep::Idle => Ok(()),
        SaveStep::Rejected(notice) => {
            let message = notice.message.clone();
            notifier.notify(notice);
            Err(ApiError::Validation(message))
        }
        SaveStep::Send(patch) => {
            tracing::debug!(task = task_id, ?patch, "auto-saving");
            let result = backend.patch_task(task_id, &patch);
            let notice = shared.lock().save.finish(&result);
            if let Some(notice) = notice {
                notifier.notify(notice);
            }
            result.map(|_| {
                if let Some(bus) = bus {
                    bus.publish(&TaskEvent::Updated { id: task_id.to_string() });
                }
            })
        }
    }
}

fn run_worker(
    shared: &Shared,
    backend: &dyn Backend,
    notifier: &dyn Notifier,
    bus: Option<&EventBus>,
) {
    let mut inner = shared.lock();
    loop {
        if inner.closed {
            return;
        }
        let now = Instant::now();
        if inner.save.is_due(now) {
            let step = inner.save.begin_save();
            let task_id = inner.save.task_id().to_string();
            drop(inner);
            let _ = settle(shared, step, &task_id, backend, notifier, bus);
            shared.wake.notify_all();
            inner = shared.lock();
            continue;
        }
        let wait = match inner.save.deadline() {
            Some(deadline) if !inner.save.is_saving() => deadline.saturating_duration_since(now),
            _ => Duration::from_secs(3600),
        };
        inner = shared
            .wake
            .wait_timeout(inner, wait)
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .0;
    }
}
