use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;
use crate::sparkline::TimeWindow;
use crate::swarm::MAX_CONCURRENT_CAP;

/// Config file name in the working directory.
pub const CONFIG_TOML: &str = ".fleetdeck.toml";

/// Environment override for `server.url`.
pub const URL_ENV: &str = "FLEETDECK_URL";

/// Find the config file: `./.fleetdeck.toml`, then the user config dir.
/// Returns None if neither exists.
pub fn find_config(dir: &Path) -> Option<PathBuf> {
    let local = dir.join(CONFIG_TOML);
    if local.exists() {
        return Some(local);
    }
    user_config_path().filter(|p| p.exists())
}

/// `~/.config/fleetdeck/config.toml` (platform equivalent).
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fleetdeck").join("config.toml"))
}

/// Top-level fleetdeck config. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub autosave: AutosaveConfig,
    #[serde(default)]
    pub usage: UsageConfig,
    #[serde(default)]
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ServerConfig {
    /// Dashboard backend base URL.
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { url: default_url(), timeout_secs: default_timeout_secs() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AutosaveConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self { debounce_ms: default_debounce_ms() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UsageConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// One of 1h, 24h, 7d, 30d, all, or FROM..TO dates.
    #[serde(default = "default_range")]
    pub default_range: String,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            default_range: default_range(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SwarmConfig {
    /// Delay between consecutive spawn requests.
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
    #[serde(default = "default_max_concurrent_cap")]
    pub max_concurrent_cap: u32,
    /// How often a running swarm checks for finished children.
    #[serde(default = "default_swarm_poll_secs")]
    pub poll_secs: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            stagger_ms: default_stagger_ms(),
            max_concurrent_cap: default_max_concurrent_cap(),
            poll_secs: default_swarm_poll_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UiConfig {
    #[serde(default)]
    pub theme: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoreConfig {
    /// Preferences file; defaults to the platform data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_url() -> String { "http://localhost:3000".into() }
fn default_timeout_secs() -> u64 { 30 }
fn default_debounce_ms() -> u64 { 500 }
fn default_poll_interval_secs() -> u64 { 30 }
fn default_range() -> String { "24h".into() }
fn default_stagger_ms() -> u64 { 2000 }
fn default_max_concurrent_cap() -> u32 { MAX_CONCURRENT_CAP }
fn default_swarm_poll_secs() -> u64 { 15 }

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse_toml(&contents)
    }

    /// Load from the standard locations, defaults when none exists, then
    /// apply the environment override.
    pub fn discover(dir: &Path) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let path = find_config(dir);
        let mut config = match &path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        if let Ok(url) = std::env::var(URL_ENV)
            && !url.trim().is_empty()
        {
            config.server.url = url.trim().to_string();
        }
        config.validate()?;
        Ok((config, path))
    }

    /// Parse config from a TOML string.
    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| ExitError::Config(format!("invalid {CONFIG_TOML}: {e}")).into())
    }

    /// Reject values that would make commands misbehave.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = &self.server.url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(
                ExitError::Config(format!("server.url must be http(s), got '{url}'")).into()
            );
        }
        if self.swarm.max_concurrent_cap == 0
            || self.swarm.max_concurrent_cap > MAX_CONCURRENT_CAP
        {
            return Err(ExitError::Config(format!(
                "swarm.max_concurrent_cap must be between 1 and {MAX_CONCURRENT_CAP}"
            ))
            .into());
        }
        self.default_range()?;
        Ok(())
    }

    /// Serialize config to a TOML string with helpful comments.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        let raw = toml::to_string_pretty(self).context("serializing config to TOML")?;

        let mut doc: toml_edit::DocumentMut = raw
            .parse()
            .context("parsing generated TOML for comment injection")?;

        doc.decor_mut()
            .set_prefix("# fleetdeck configuration\n# FLEETDECK_URL overrides server.url\n\n");

        fn set_table_comment(doc: &mut toml_edit::DocumentMut, key: &str, comment: &str) {
            if let Some(tbl) = doc.get_mut(key).and_then(toml_edit::Item::as_table_mut) {
                tbl.decor_mut().set_prefix(comment);
            }
        }

        set_table_comment(&mut doc, "server", "# Dashboard backend\n");
        set_table_comment(&mut doc, "autosave", "\n# Delay before edited task fields are saved\n");
        set_table_comment(&mut doc, "usage", "\n# Usage polling and default sparkline range\n");
        set_table_comment(&mut doc, "swarm", "\n# Epic swarm launches\n");
        set_table_comment(&mut doc, "ui", "\n# Display\n");
        set_table_comment(&mut doc, "store", "\n# Local preferences file\n");

        Ok(doc.to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.autosave.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.usage.poll_interval_secs.max(1))
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.swarm.stagger_ms)
    }

    pub fn swarm_poll(&self) -> Duration {
        Duration::from_secs(self.swarm.poll_secs.max(1))
    }

    pub fn default_range(&self) -> anyhow::Result<TimeWindow> {
        self.usage
            .default_range
            .parse()
            .map_err(|e: String| ExitError::Config(format!("usage.default_range: {e}")).into())
    }

    /// Preferences file path, from config or the platform data dir.
    pub fn store_path(&self) -> Option<PathBuf> {
        self.store.path.clone().or_else(crate::store::default_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_toml_config() {
        let toml_str = r#"
[server]
url = "https://deck.internal:8443"
timeout_secs = 5

[autosave]
debounce_ms = 250

[usage]
poll_interval_secs = 10
default_range = "7d"

[swarm]
stagger_ms = 1500
max_concurrent_cap = 4

[ui]
theme = "nord"

[store]
path = "/tmp/fleetdeck-state.json"
"#;

        let config = Config::parse_toml(toml_str).unwrap();
        assert_eq!(config.server.url, "https://deck.internal:8443");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.default_range().unwrap(), TimeWindow::Week);
        assert_eq!(config.stagger(), Duration::from_millis(1500));
        assert_eq!(config.swarm.max_concurrent_cap, 4);
        assert_eq!(config.ui.theme.as_deref(), Some("nord"));
        assert_eq!(config.store_path(), Some(PathBuf::from("/tmp/fleetdeck-state.json")));
        config.validate().unwrap();
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server.url, "http://localhost:3000");
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.stagger(), Duration::from_millis(2000));
        assert_eq!(config.swarm_poll(), Duration::from_secs(15));
        assert_eq!(config.swarm.max_concurrent_cap, 8);
        assert_eq!(config.default_range().unwrap(), TimeWindow::Day);
    }

    #[test]
    fn parse_missing_optional_fields() {
        let config = Config::parse_toml("[server]\ntimeout_secs = 3\n").unwrap();
        assert_eq!(config.server.url, "http://localhost:3000");
        assert_eq!(config.server.timeout_secs, 3);
    }

    #[test]
    fn parse_malformed_toml() {
        let err = Config::parse_toml("not valid toml [[[").unwrap_err();
        assert!(err.to_string().contains("invalid .fleetdeck.toml"));
        assert!(err.downcast_ref::<ExitError>().is_some());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.server.url = "localhost:3000".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.swarm.max_concurrent_cap = 12;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.usage.default_range = "fortnight".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn roundtrip_toml() {
        let mut config = Config::default();
        config.ui.theme = Some("dracula".into());
        config.swarm.stagger_ms = 750;
        let output = config.to_toml().unwrap();
        assert_eq!(Config::parse_toml(&output).unwrap(), config);
    }

    #[test]
    fn to_toml_includes_comments() {
        let output = Config::default().to_toml().unwrap();
        assert!(output.contains("# fleetdeck configuration"));
        assert!(output.contains("# Epic swarm launches"));
    }

    #[test]
    fn find_config_prefers_local_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_TOML), "").unwrap();
        let found = find_config(dir.path()).unwrap();
        assert!(found.ends_with(CONFIG_TOML));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_TOML);
        std::fs::write(&path, "[ui]\ntheme = \"light\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.ui.theme.as_deref(), Some("light"));
    }
}
