//! Client-side copies of the entities the dashboard backend owns.
//!
//! Everything here is a denormalized snapshot for display. Unknown JSON
//! fields are ignored and absent optional fields fall back to defaults, so a
//! newer server never breaks an older client.

use std::fmt;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest and highest task priority accepted by the backend.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<u8> = 0..=4;

/// Task status. Strings the client does not know survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Blocked,
    Closed,
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Closed => "closed",
            TaskStatus::Other(s) => s,
        }
    }

    /// Open or in progress: the statuses a dependency target may have.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Open | TaskStatus::InProgress)
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "open" => TaskStatus::Open,
            "in_progress" | "in-progress" => TaskStatus::InProgress,
            "blocked" => TaskStatus::Blocked,
            "closed" | "done" => TaskStatus::Closed,
            _ => TaskStatus::Other(s),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(s: TaskStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default, alias = "type")]
    pub issue_type: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, alias = "dependsOn")]
    pub depends_on: Vec<String>,
    #[serde(default, alias = "blockedBy")]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<String>,
    #[serde(default, alias = "closedAt")]
    pub closed_at: Option<String>,
}

fn default_priority() -> u8 {
    2
}

impl Task {
    /// Text before the first `-` of the id (`web-42` -> `web`).
    pub fn project_prefix(&self) -> &str {
        project_prefix(&self.id)
    }

    pub fn is_epic(&self) -> bool {
        self.issue_type == "epic"
    }

    /// Local calendar day the task was completed on, if it is closed.
    ///
    /// Uses `closed_at`, falling back to `updated_at` for servers that do not
    /// record a close time.
    pub fn completed_on(&self) -> Option<NaiveDate> {
        if self.status != TaskStatus::Closed {
            return None;
        }
        self.closed_at
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| self.updated_at.as_deref().and_then(parse_timestamp))
            .map(|ts| ts.with_timezone(&Local).date_naive())
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }
}

/// Project prefix of a task id.
pub fn project_prefix(id: &str) -> &str {
    id.split('-').next().unwrap_or(id)
}

/// Parse the timestamp formats the backend emits: RFC 3339, or a naive
/// `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS` taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Partial task update sent with PATCH. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(rename = "issue_type", skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "issue_type")]
    pub issue_type: String,
    pub priority: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl NewTask {
    pub fn validate(&self) -> Result<(), String> {
        validate_fields(&self.title, &self.issue_type, self.priority)
    }
}

/// Form rules shared by task creation and editing.
pub fn validate_fields(title: &str, issue_type: &str, priority: u8) -> Result<(), String> {
    if title.trim().is_empty() {
        return Err("title is required".into());
    }
    if issue_type.trim().is_empty() {
        return Err("type is required".into());
    }
    if !PRIORITY_RANGE.contains(&priority) {
        return Err(format!(
            "priority must be between {} and {}",
            PRIORITY_RANGE.start(),
            PRIORITY_RANGE.end()
        ));
    }
    Ok(())
}

/// Filters accepted by `GET /api/tasks`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub project: Option<String>,
    pub issue_type: Option<String>,
}

/// Readiness counts of an epic's children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSummary {
    #[serde(default)]
    pub ready: u32,
    #[serde(default, alias = "inProgress")]
    pub in_progress: u32,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpicChildren {
    #[serde(default)]
    pub children: Vec<Task>,
    #[serde(default)]
    pub summary: ChildSummary,
}

/// An epic annotated with its child readiness.
#[derive(Debug, Clone, Serialize)]
pub struct Epic {
    pub task: Task,
    pub summary: ChildSummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageWindow {
    #[serde(default, alias = "totalTokens", alias = "tokens")]
    pub total_tokens: u64,
    #[serde(default)]
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentUsage {
    #[serde(default)]
    pub today: UsageWindow,
    #[serde(default)]
    pub week: UsageWindow,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    #[serde(default, alias = "active")]
    pub online: bool,
    #[serde(default, alias = "sessionState")]
    pub session_state: Option<String>,
    #[serde(default, alias = "lastActivity")]
    pub last_activity: Option<String>,
    #[serde(default)]
    pub usage: AgentUsage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierLimits {
    #[serde(default, alias = "dailyTokens")]
    pub daily_tokens: Option<u64>,
    #[serde(default, alias = "weeklyTokens")]
    pub weekly_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default, alias = "usedTokens")]
    pub used_tokens: u64,
    #[serde(default, alias = "limitTokens")]
    pub limit_tokens: u64,
    #[serde(default, alias = "resetsAt")]
    pub resets_at: Option<String>,
}

impl SessionContext {
    /// Fraction of the session budget consumed, `0.0` when no limit is known.
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        if self.limit_tokens == 0 {
            0.0
        } else {
            self.used_tokens as f64 / self.limit_tokens as f64
        }
    }
}

/// Subscription tier and rate-limit counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub limits: TierLimits,
    #[serde(default)]
    pub today: UsageWindow,
    #[serde(default)]
    pub week: UsageWindow,
    #[serde(default)]
    pub session: Option<SessionContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparklinePoint {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub cost: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryEvent {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default, alias = "message")]
    pub summary: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    pub path: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "uploadedAt")]
    pub uploaded_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionLog {
    #[serde(alias = "name")]
    pub file: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkStatus {
    #[serde(default, alias = "activeSessions", alias = "count")]
    pub active_sessions: u32,
    #[serde(default, alias = "maxSessions")]
    pub max_sessions: Option<u32>,
}

impl WorkStatus {
    /// Free session slots, `None` when the server publishes no maximum.
    pub fn free_slots(&self) -> Option<u32> {
        self.max_sessions
            .map(|max| max.saturating_sub(self.active_sessions))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnRequest {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "epicId", skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    #[serde(rename = "reviewThreshold", skip_serializing_if = "Option::is_none")]
    pub review_threshold: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnResult {
    #[serde(default, alias = "sessionId", alias = "session_id")]
    pub session: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrateResult {
    #[serde(alias = "newId", alias = "id")]
    pub new_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseEligibleResult {
    #[serde(default)]
    pub closed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(alias = "name")]
    pub id: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default, alias = "status")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sessions {
    #[serde(default)]
    pub sessions: Vec<SessionInfo>,
    #[serde(default)]
    pub projects: Vec<ProjectInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadResult {
    pub path: String,
}
