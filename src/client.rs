use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;
use crate::model::{
    Agent, Attachment, CloseEligibleResult, EpicChildren, HistoryEvent, MigrateResult, NewTask,
    SessionLog, Sessions, SparklinePoint, SpawnRequest, SpawnResult, Task, TaskFilter, TaskPatch,
    UploadResult, UsageMetrics, WorkStatus,
};

/// The dashboard backend as seen by the client.
///
/// Every domain module goes through this trait; `ApiClient` speaks HTTP and
/// tests substitute an in-memory fake.
pub trait Backend: Send + Sync {
    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ApiError>;
    fn create_task(&self, task: &NewTask) -> Result<Task, ApiError>;
    fn get_task(&self, id: &str) -> Result<Task, ApiError>;
    fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<Task, ApiError>;
    fn replace_task(&self, task: &Task) -> Result<Task, ApiError>;
    fn delete_task(&self, id: &str) -> Result<(), ApiError>;
    fn task_history(&self, id: &str) -> Result<Vec<HistoryEvent>, ApiError>;
    fn task_images(&self, id: &str) -> Result<Vec<Attachment>, ApiError>;
    fn attach_image(&self, id: &str, path: &str) -> Result<Vec<Attachment>, ApiError>;
    fn task_logs(&self, id: &str) -> Result<Vec<SessionLog>, ApiError>;
    fn task_log(&self, id: &str, file: &str) -> Result<String, ApiError>;
    fn migrate_task(&self, id: &str, project: &str) -> Result<MigrateResult, ApiError>;
    fn ready_tasks(&self) -> Result<Vec<Task>, ApiError>;
    fn epic_children(&self, id: &str) -> Result<EpicChildren, ApiError>;
    fn close_eligible_epics(&self) -> Result<CloseEligibleResult, ApiError>;
    fn list_agents(&self) -> Result<Vec<Agent>, ApiError>;
    fn message_agent(&self, agent: &str, message: &str) -> Result<(), ApiError>;
    fn agent_sparkline(&self, range: &str) -> Result<Vec<SparklinePoint>, ApiError>;
    fn usage_metrics(&self) -> Result<UsageMetrics, ApiError>;
    fn work_status(&self) -> Result<WorkStatus, ApiError>;
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnResult, ApiError>;
    fn upload_image(&self, file: &Path) -> Result<UploadResult, ApiError>;
    fn sessions(&self) -> Result<Sessions, ApiError>;
    fn pause_all(&self) -> Result<(), ApiError>;
}

#[derive(Debug, Clone, Copy)]
enum Method {
    Post,
    Put,
    Patch,
}

impl Method {
    const fn as_str(self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
        }
    }
}

/// Blocking HTTP client for the dashboard API.
pub struct ApiClient {
    base: String,
    agent: ureq::Agent,
}

impl ApiClient {
    /// Create a client for `base_url` (e.g. `http://localhost:3333`).
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            base: base_url.trim_end_matches('/').to_string(),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn get_value(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ApiError> {
        tracing::debug!(method = "GET", path, "api request");
        let mut req = self.agent.get(self.url(path)).header("Accept", "application/json");
        for (k, v) in query {
            req = req.query(*k, *v);
        }
        let resp = req.call().map_err(transport)?;
        decode(path, resp)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        from_value(self.get_value(path, &[])?)
    }

    /// GET a collection that may come bare or wrapped as `{"<key>": [...]}`.
    fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, ApiError> {
        unwrap_list(self.get_value(path, query)?, key)
    }

    fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        tracing::debug!(method = method.as_str(), path, "api request");
        let url = self.url(path);
        let req = match method {
            Method::Post => self.agent.post(url),
            Method::Put => self.agent.put(url),
            Method::Patch => self.agent.patch(url),
        };
        let resp = req
            .header("Accept", "application/json")
            .send_json(body)
            .map_err(transport)?;
        from_value(decode(path, resp)?)
    }

    fn delete(&self, path: &str) -> Result<(), ApiError> {
        tracing::debug!(method = "DELETE", path, "api request");
        let resp = self.agent.delete(self.url(path)).call().map_err(transport)?;
        decode(path, resp).map(|_| ())
    }
}

impl Backend for ApiClient {
    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ApiError> {
        let mut query = Vec::new();
        if let Some(status) = &filter.status {
            query.push(("status", status.as_str()));
        }
        if let Some(project) = &filter.project {
            query.push(("project", project.as_str()));
        }
        if let Some(kind) = &filter.issue_type {
            query.push(("type", kind.as_str()));
        }
        self.get_list("/api/tasks", "tasks", &query)
    }

    fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        let value: Value = self.send_json(Method::Post, "/api/tasks", task)?;
        unwrap_object(value, "task")
    }

    fn get_task(&self, id: &str) -> Result<Task, ApiError> {
        let value = self.get_value(&format!("/api/tasks/{}", encode_segment(id)), &[])?;
        unwrap_object(value, "task")
    }

    fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<Task, ApiError> {
        let path = format!("/api/tasks/{}", encode_segment(id));
        let value: Value = self.send_json(Method::Patch, &path, patch)?;
        unwrap_object(value, "task")
    }

    fn replace_task(&self, task: &Task) -> Result<Task, ApiError> {
        let path = format!("/api/tasks/{}", encode_segment(&task.id));
        let value: Value = self.send_json(Method::Put, &path, task)?;
        unwrap_object(value, "task")
    }

    fn delete_task(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/api/tasks/{}", encode_segment(id)))
    }

    fn task_history(&self, id: &str) -> Result<Vec<HistoryEvent>, ApiError> {
        let path = format!("/api/tasks/{}/history", encode_segment(id));
        self.get_list(&path, "events", &[])
    }

    fn task_images(&self, id: &str) -> Result<Vec<Attachment>, ApiError> {
        let path = format!("/api/tasks/{}/image", encode_segment(id));
        self.get_list(&path, "images", &[])
    }

    fn attach_image(&self, id: &str, image_path: &str) -> Result<Vec<Attachment>, ApiError> {
        let path = format!("/api/tasks/{}/image", encode_segment(id));
        let body = serde_json::json!({ "path": image_path });
        let value: Value = self.send_json(Method::Put, &path, &body)?;
        unwrap_list(value, "images")
    }

    fn task_logs(&self, id: &str) -> Result<Vec<SessionLog>, ApiError> {
        let path = format!("/api/tasks/{}/logs", encode_segment(id));
        self.get_list(&path, "logs", &[])
    }

    fn task_log(&self, id: &str, file: &str) -> Result<String, ApiError> {
        let path = format!("/api/tasks/{}/logs/{}", encode_segment(id), encode_segment(file));
        tracing::debug!(method = "GET", path = %path, "api request");
        let resp = self.agent.get(self.url(&path)).call().map_err(transport)?;
        let status = resp.status().as_u16();
        let body = resp
            .into_body()
            .read_to_string()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        if (200..300).contains(&status) {
            Ok(body)
        } else {
            Err(status_error(status, &body))
        }
    }

    fn migrate_task(&self, id: &str, project: &str) -> Result<MigrateResult, ApiError> {
        let path = format!("/api/tasks/{}/migrate", encode_segment(id));
        let body = serde_json::json!({ "project": project });
        self.send_json(Method::Post, &path, &body)
    }

    fn ready_tasks(&self) -> Result<Vec<Task>, ApiError> {
        self.get_list("/api/tasks/ready", "tasks", &[])
    }

    fn epic_children(&self, id: &str) -> Result<EpicChildren, ApiError> {
        self.get_json(&format!("/api/epics/{}/children", encode_segment(id)))
    }

    fn close_eligible_epics(&self) -> Result<CloseEligibleResult, ApiError> {
        self.send_json(Method::Post, "/api/epics/close-eligible", &serde_json::json!({}))
    }

    fn list_agents(&self) -> Result<Vec<Agent>, ApiError> {
        self.get_list("/api/agents", "agents", &[])
    }

    fn message_agent(&self, agent: &str, message: &str) -> Result<(), ApiError> {
        let body = serde_json::json!({ "agent": agent, "message": message });
        let _: Value = self.send_json(Method::Post, "/api/agents/message", &body)?;
        Ok(())
    }

    fn agent_sparkline(&self, range: &str) -> Result<Vec<SparklinePoint>, ApiError> {
        self.get_list("/api/agents/sparkline", "data", &[("range", range)])
    }

    fn usage_metrics(&self) -> Result<UsageMetrics, ApiError> {
        self.get_json("/api/claude/usage")
    }

    fn work_status(&self) -> Result<WorkStatus, ApiError> {
        self.get_json("/api/work")
    }

    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnResult, ApiError> {
        self.send_json(Method::Post, "/api/work/spawn", request)
    }

    fn upload_image(&self, file: &Path) -> Result<UploadResult, ApiError> {
        let bytes = std::fs::read(file)
            .map_err(|e| ApiError::Validation(format!("reading {}: {e}", file.display())))?;
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.png");
        let boundary = format!("fleetdeck-{:016x}", rand::random::<u64>());
        let body = multipart_body(&boundary, name, content_type_for(name), &bytes);

        let path = "/api/work/upload-image";
        tracing::debug!(method = "POST", path, size = bytes.len(), "api upload");
        let resp = self
            .agent
            .post(self.url(path))
            .header("Content-Type", &format!("multipart/form-data; boundary={boundary}"))
            .send(&body[..])
            .map_err(transport)?;
        from_value(decode(path, resp)?)
    }

    fn sessions(&self) -> Result<Sessions, ApiError> {
        self.get_json("/api/sessions")
    }

    fn pause_all(&self) -> Result<(), ApiError> {
        let _: Value =
            self.send_json(Method::Post, "/api/sessions/pause-all", &serde_json::json!({}))?;
        Ok(())
    }
}

fn transport(e: ureq::Error) -> ApiError {
    ApiError::Transport(e.to_string())
}

fn decode(path: &str, resp: ureq::http::Response<ureq::Body>) -> Result<Value, ApiError> {
    let status = resp.status().as_u16();
    let body = resp
        .into_body()
        .read_to_string()
        .map_err(|e| ApiError::Transport(e.to_string()))?;
    tracing::debug!(path, status, "api response");

    if !(200..300).contains(&status) {
        return Err(status_error(status, &body));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| ApiError::Decode(format!("{path}: {e}")))
}

/// Map a non-2xx response to an error, preferring the server's own message.
fn status_error(status: u16, body: &str) -> ApiError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());
    if status == 409 {
        ApiError::Conflict(message)
    } else {
        ApiError::Status { status, message }
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Accept both `[...]` and `{"<key>": [...]}` collection shapes.
pub(crate) fn unwrap_list<T: DeserializeOwned>(
    value: Value,
    key: &str,
) -> Result<Vec<T>, ApiError> {
    match value {
        Value::Array(_) => from_value(value),
        Value::Null => Ok(Vec::new()),
        Value::Object(mut map) => match map.remove(key) {
            Some(inner) => from_value(inner),
            None => Err(ApiError::Decode(format!("expected a list under {key:?}"))),
        },
        other => Err(ApiError::Decode(format!("expected a list, got {other}"))),
    }
}

/// Accept both a bare object and `{"<key>": {...}}`.
fn unwrap_object<T: DeserializeOwned>(value: Value, key: &str) -> Result<T, ApiError> {
    match value {
        Value::Object(mut map) if map.get(key).is_some_and(Value::is_object) => {
            from_value(map.remove(key).unwrap_or_default())
        }
        other => from_value(other),
    }
}

/// Percent-encode a single path segment.
pub fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

fn content_type_for(name: &str) -> &'static str {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/png"
    }
}

fn multipart_body(boundary: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let filename = filename.replace('"', "_");
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
