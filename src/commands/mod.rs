pub mod agents;
pub mod config_cmd;
pub mod doctor;
pub mod epics;
pub mod schema;
pub mod sessions;
pub mod status;
pub mod streak;
pub mod tasks;
pub mod usage;
pub mod work;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;

use crate::client::{ApiClient, Backend};
use crate::config::Config;
use crate::error::{ApiError, ExitError};
use crate::events::EventBus;
use crate::pacing::CancelFlag;
use crate::store::Store;

/// Theme name that disables colour output.
pub const MONO_THEME: &str = "mono";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Text,
    Json,
}

impl OutputFormat {
    /// Explicit choice, else pretty on a terminal and text when piped.
    pub fn resolve(choice: Option<Self>) -> Self {
        choice.unwrap_or_else(|| {
            if std::io::stdout().is_terminal() {
                Self::Pretty
            } else {
                Self::Text
            }
        })
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Loaded config plus a client for the configured server.
pub struct Deck {
    pub config: Config,
    pub config_path: Option<PathBuf>,
    pub events: Arc<EventBus>,
    client: Arc<ApiClient>,
}

impl Deck {
    pub fn connect() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().context("could not determine current directory")?;
        let (config, config_path) = Config::discover(&cwd)?;
        tracing::debug!(url = %config.server.url, config = ?config_path, "connecting");
        let client = Arc::new(ApiClient::new(&config.server.url, config.timeout()));
        Ok(Self { config, config_path, events: Arc::new(EventBus::new()), client })
    }

    pub fn api(&self) -> &dyn Backend {
        self.client.as_ref()
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.client) as Arc<dyn Backend>
    }

    pub fn store(&self) -> Option<Store> {
        self.config.store_path().map(Store::open)
    }

    /// Stored theme preference, else the configured one.
    pub fn theme(&self) -> Option<String> {
        self.store()
            .and_then(|s| s.prefs.theme)
            .or_else(|| self.config.ui.theme.clone())
    }

    /// ANSI colours on a terminal unless the theme is `mono`.
    pub fn colors(&self) -> bool {
        std::io::stdout().is_terminal() && self.theme().as_deref() != Some(MONO_THEME)
    }

    /// Convert an API failure into the matching process exit error.
    pub fn fail(&self, e: ApiError) -> anyhow::Error {
        match e {
            ApiError::Transport(message) => ExitError::Unreachable {
                url: self.config.server.url.clone(),
                message,
            }
            .into(),
            other => ExitError::from(other).into(),
        }
    }
}

/// A cancel flag tripped by Ctrl-C.
///
/// Only one handler can be installed per process; later calls get a flag
/// that is never set by the signal.
pub fn cancel_on_ctrlc() -> CancelFlag {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || flag.cancel()) {
        tracing::debug!(error = %e, "ctrl-c handler not installed");
    }
    cancel
}

pub(crate) fn prompt_confirm(prompt: &str, default: bool) -> anyhow::Result<bool> {
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()
        .context("reading user confirmation")
}

pub(crate) fn prompt_multi_select(
    prompt: &str,
    items: &[String],
    defaults: &[bool],
) -> anyhow::Result<Vec<usize>> {
    dialoguer::MultiSelect::new()
        .with_prompt(prompt)
        .items(items)
        .defaults(defaults)
        .interact()
        .context("reading user selection")
}

pub(crate) fn prompt_input(prompt: &str, default: &str) -> anyhow::Result<String> {
    dialoguer::Input::<String>::new()
        .with_prompt(prompt)
        .default(default.to_string())
        .allow_empty(true)
        .interact_text()
        .context("reading user input")
}

/// Shorten `s` to `max` characters, marking the cut.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('\u{2026}');
        out
    }
}

/// Group digits: 1234567 -> 1,234,567.
pub(crate) fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer title", 6), "a lon\u{2026}");
    }

    #[test]
    fn thousands_groups_digits() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn explicit_format_wins() {
        assert_eq!(OutputFormat::resolve(Some(OutputFormat::Json)), OutputFormat::Json);
    }
}
