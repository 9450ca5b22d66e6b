//! Client-side preferences kept between runs.
//!
//! One JSON file, last write wins. A missing or unreadable file yields the
//! defaults; nothing here is worth failing a command over.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::model::{Task, parse_timestamp};
use crate::swarm::SwarmSettings;

pub const STATE_FILE: &str = "state.json";

/// Task list ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Priority,
    Updated,
    Created,
    Id,
}

impl SortKey {
    /// Priority and ids ascending; timestamps newest first.
    pub fn sort(self, tasks: &mut [Task]) {
        match self {
            SortKey::Priority => {
                tasks.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
            }
            SortKey::Updated => tasks.sort_by(|a, b| {
                b.updated_at
                    .as_deref()
                    .and_then(parse_timestamp)
                    .cmp(&a.updated_at.as_deref().and_then(parse_timestamp))
            }),
            SortKey::Created => tasks.sort_by(|a, b| b.created().cmp(&a.created())),
            SortKey::Id => tasks.sort_by(|a, b| a.id.cmp(&b.id)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    /// Swarm settings keyed by epic id.
    #[serde(default)]
    pub swarm: BTreeMap<String, SwarmSettings>,
}

impl Preferences {
    pub fn swarm_settings(&self, epic_id: &str) -> SwarmSettings {
        self.swarm.get(epic_id).cloned().unwrap_or_default()
    }

    pub fn set_swarm_settings(&mut self, epic_id: &str, settings: SwarmSettings) {
        self.swarm.insert(epic_id.to_string(), settings);
    }

    /// Forget an epic's settings. Returns true if any were stored.
    pub fn reset_swarm_settings(&mut self, epic_id: &str) -> bool {
        self.swarm.remove(epic_id).is_some()
    }
}

/// Default location: `<data dir>/fleetdeck/state.json`.
pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("fleetdeck").join(STATE_FILE))
}

/// Preferences bound to a file.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    pub prefs: Preferences,
}

impl Store {
    /// Load from `path`. Missing or corrupt files give defaults.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let prefs = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt state file");
                Preferences::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Preferences::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not read state file");
                Preferences::default()
            }
        };
        Self { path, prefs }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the preferences, replacing the file atomically.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.prefs).context("serializing preferences")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), "preferences saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::ExecutionMode;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("nope.json"));
        assert_eq!(store.prefs, Preferences::default());
    }

    #[test]
    fn corrupt_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATE_FILE);
        std::fs::write(&path, "{not json").unwrap();
        let store = Store::open(&path);
        assert_eq!(store.prefs, Preferences::default());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(STATE_FILE);
        let mut store = Store::open(&path);
        store.prefs.theme = Some("dracula".into());
        store.prefs.sort = SortKey::Updated;
        store.prefs.set_swarm_settings(
            "web-1",
            SwarmSettings { mode: ExecutionMode::Sequential, ..SwarmSettings::default() },
        );
        store.save().unwrap();

        let reloaded = Store::open(&path);
        assert_eq!(reloaded.prefs, store.prefs);
        assert_eq!(reloaded.prefs.swarm_settings("web-1").mode, ExecutionMode::Sequential);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn unknown_epic_gets_default_settings_and_reset_forgets() {
        let mut prefs = Preferences::default();
        assert_eq!(prefs.swarm_settings("api-9"), SwarmSettings::default());
        let settings = SwarmSettings { max_concurrent: 5, ..SwarmSettings::default() };
        prefs.set_swarm_settings("api-9", settings);
        assert!(prefs.reset_swarm_settings("api-9"));
        assert!(!prefs.reset_swarm_settings("api-9"));
        assert_eq!(prefs.swarm_settings("api-9").max_concurrent, 3);
    }

    #[test]
    fn sort_keys_order_tasks() {
        let mk = |id: &str, priority: u8, created: &str| Task {
            id: id.into(),
            priority,
            created_at: Some(created.into()),
            ..Task::default()
        };
        let mut tasks = vec![
            mk("web-3", 1, "2026-01-03T00:00:00Z"),
            mk("web-1", 2, "2026-01-01T00:00:00Z"),
            mk("web-2", 1, "2026-01-02T00:00:00Z"),
        ];
        let ids = |t: &[Task]| t.iter().map(|t| t.id.clone()).collect::<Vec<_>>();

        SortKey::Priority.sort(&mut tasks);
        assert_eq!(ids(&tasks), vec!["web-2", "web-3", "web-1"]);
        SortKey::Created.sort(&mut tasks);
        assert_eq!(ids(&tasks), vec!["web-3", "web-2", "web-1"]);
        SortKey::Id.sort(&mut tasks);
        assert_eq!(ids(&tasks), vec!["web-1", "web-2", "web-3"]);
    }

    #[test]
    fn sort_key_serializes_lowercase() {
        let prefs = Preferences { sort: SortKey::Created, ..Preferences::default() };
        let json = serde_json::to_value(&prefs).unwrap();
        assert_eq!(json["sort"], "created");
    }
}
