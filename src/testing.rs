//! In-memory backend for unit tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::client::Backend;
use crate::error::ApiError;
use crate::model::{
    Agent, Attachment, CloseEligibleResult, EpicChildren, HistoryEvent, MigrateResult, NewTask,
    SessionLog, Sessions, SparklinePoint, SpawnRequest, SpawnResult, Task, TaskFilter, TaskPatch,
    UploadResult, UsageMetrics, WorkStatus,
};

#[derive(Default)]
pub struct FakeState {
    pub tasks: Vec<Task>,
    pub ready: Vec<Task>,
    pub children: HashMap<String, EpicChildren>,
    pub agents: Vec<Agent>,
    pub usage: UsageMetrics,
    pub sparkline: Vec<SparklinePoint>,
    pub work: WorkStatus,
    pub failing: HashSet<&'static str>,
    pub get_delays: HashMap<String, Duration>,
    pub calls: Vec<String>,
    pub patches: Vec<(String, TaskPatch)>,
    pub spawns: Vec<(String, Instant)>,
}

#[derive(Default)]
pub struct FakeBackend {
    pub state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let fake = Self::new();
        fake.state.lock().unwrap().tasks = tasks;
        fake
    }

    pub fn fail(&self, op: &'static str) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn recover(&self, op: &'static str) {
        self.state.lock().unwrap().failing.remove(op);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn patches(&self) -> Vec<(String, TaskPatch)> {
        self.state.lock().unwrap().patches.clone()
    }

    pub fn spawned(&self) -> Vec<String> {
        self.state.lock().unwrap().spawns.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn spawn_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().spawns.iter().map(|(_, t)| *t).collect()
    }

    fn enter(
        &self,
        op: &'static str,
        detail: &str,
    ) -> Result<std::sync::MutexGuard<'_, FakeState>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{op} {detail}").trim_end().to_string());
        if state.failing.contains(op) {
            return Err(ApiError::Status { status: 500, message: format!("{op} failed") });
        }
        Ok(state)
    }
}

pub fn task(id: &str, status: &str) -> Task {
    Task {
        id: id.to_string(),
        title: format!("task {id}"),
        status: status.to_string().into(),
        issue_type: "task".into(),
        priority: 2,
        ..Task::default()
    }
}

impl Backend for FakeBackend {
    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ApiError> {
        let state = self.enter("list_tasks", "")?;
        Ok(state
            .tasks
            .iter()
            .filter(|t| filter.status.as_ref().is_none_or(|s| &t.status == s))
            .filter(|t| filter.issue_type.as_ref().is_none_or(|k| &t.issue_type == k))
            .cloned()
            .collect())
    }

    fn create_task(&self, new: &NewTask) -> Result<Task, ApiError> {
        let mut state = self.enter("create_task", &new.title)?;
        let prefix = new.project.clone().unwrap_or_else(|| "proj".into());
        let task = Task {
            id: format!("{prefix}-{}", state.tasks.len() + 1),
            title: new.title.clone(),
            description: new.description.clone(),
            issue_type: new.issue_type.clone(),
            priority: new.priority,
            ..Task::default()
        };
        state.tasks.push(task.clone());
        Ok(task)
    }

    fn get_task(&self, id: &str) -> Result<Task, ApiError> {
        let delay = {
            let state = self.enter("get_task", id)?;
            state.get_delays.get(id).copied()
        };
        if let Some(d) = delay {
            std::thread::sleep(d);
        }
        let state = self.state.lock().unwrap();
        state
            .tasks
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(ApiError::Status { status: 404, message: "not found".into() })
    }

    fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<Task, ApiError> {
        let mut state = self.enter("patch_task", id)?;
        state.patches.push((id.to_string(), patch.clone()));
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(ApiError::Status { status: 404, message: "not found".into() })?;
        if let Some(v) = &patch.title {
            task.title.clone_from(v);
        }
        if let Some(v) = &patch.description {
            task.description.clone_from(v);
        }
        if let Some(v) = &patch.status {
            task.status = v.clone();
        }
        if let Some(v) = patch.priority {
            task.priority = v;
        }
        if let Some(v) = &patch.issue_type {
            task.issue_type.clone_from(v);
        }
        if let Some(v) = &patch.depends_on {
            task.depends_on.clone_from(v);
        }
        Ok(task.clone())
    }

    fn replace_task(&self, task: &Task) -> Result<Task, ApiError> {
        let mut state = self.enter("replace_task", &task.id)?;
        if let Some(t) = state.tasks.iter_mut().find(|t| t.id == task.id) {
            *t = task.clone();
        }
        Ok(task.clone())
    }

    fn delete_task(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.enter("delete_task", id)?;
        state.tasks.retain(|t| t.id != id);
        Ok(())
    }

    fn task_history(&self, id: &str) -> Result<Vec<HistoryEvent>, ApiError> {
        self.enter("task_history", id)?;
        Ok(vec![HistoryEvent {
            timestamp: "2026-01-01T00:00:00Z".into(),
            kind: "task".into(),
            actor: None,
            summary: format!("created {id}"),
        }])
    }

    fn task_images(&self, id: &str) -> Result<Vec<Attachment>, ApiError> {
        self.enter("task_images", id)?;
        Ok(Vec::new())
    }

    fn attach_image(&self, id: &str, path: &str) -> Result<Vec<Attachment>, ApiError> {
        self.enter("attach_image", id)?;
        Ok(vec![Attachment { path: path.to_string(), name: None, uploaded_at: None }])
    }

    fn task_logs(&self, id: &str) -> Result<Vec<SessionLog>, ApiError> {
        self.enter("task_logs", id)?;
        Ok(Vec::new())
    }

    fn task_log(&self, id: &str, file: &str) -> Result<String, ApiError> {
        self.enter("task_log", &format!("{id}/{file}"))?;
        Ok(String::new())
    }

    fn migrate_task(&self, id: &str, project: &str) -> Result<MigrateResult, ApiError> {
        self.enter("migrate_task", id)?;
        Ok(MigrateResult { new_id: format!("{project}-1") })
    }

    fn ready_tasks(&self) -> Result<Vec<Task>, ApiError> {
        let state = self.enter("ready_tasks", "")?;
        Ok(state.ready.clone())
    }

    fn epic_children(&self, id: &str) -> Result<EpicChildren, ApiError> {
        let state = self.enter("epic_children", id)?;
        Ok(state.children.get(id).cloned().unwrap_or_default())
    }

    fn close_eligible_epics(&self) -> Result<CloseEligibleResult, ApiError> {
        self.enter("close_eligible_epics", "")?;
        Ok(CloseEligibleResult::default())
    }

    fn list_agents(&self) -> Result<Vec<Agent>, ApiError> {
        let state = self.enter("list_agents", "")?;
        Ok(state.agents.clone())
    }

    fn message_agent(&self, agent: &str, _message: &str) -> Result<(), ApiError> {
        self.enter("message_agent", agent)?;
        Ok(())
    }

    fn agent_sparkline(&self, range: &str) -> Result<Vec<SparklinePoint>, ApiError> {
        let state = self.enter("agent_sparkline", range)?;
        Ok(state.sparkline.clone())
    }

    fn usage_metrics(&self) -> Result<UsageMetrics, ApiError> {
        let state = self.enter("usage_metrics", "")?;
        Ok(state.usage.clone())
    }

    fn work_status(&self) -> Result<WorkStatus, ApiError> {
        let state = self.enter("work_status", "")?;
        Ok(state.work)
    }

    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnResult, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("spawn {}", request.task_id));
        state.spawns.push((request.task_id.clone(), Instant::now()));
        if state.failing.contains("spawn") {
            return Err(ApiError::Status { status: 503, message: "no capacity".into() });
        }
        Ok(SpawnResult { session: Some(format!("s-{}", request.task_id)), agent: None })
    }

    fn upload_image(&self, file: &Path) -> Result<UploadResult, ApiError> {
        self.enter("upload_image", &file.display().to_string())?;
        Ok(UploadResult { path: format!("/uploads/{}", file.display()) })
    }

    fn sessions(&self) -> Result<Sessions, ApiError> {
        self.enter("sessions", "")?;
        Ok(Sessions::default())
    }

    fn pause_all(&self) -> Result<(), ApiError> {
        self.enter("pause_all", "")?;
        Ok(())
    }
}
