use std::path::PathBuf;

use anyhow::Context;
use clap::Subcommand;

use super::{Deck, OutputFormat, print_json};
use crate::config::{CONFIG_TOML, Config, user_config_path};
use crate::error::ExitError;
use crate::events::{Notice, Notifier, StderrNotifier};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a commented default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
        /// Write the per-user config instead of ./.fleetdeck.toml
        #[arg(long)]
        global: bool,
    },
    /// Print the effective config (file, env override, defaults)
    Show {
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Show or remember the colour theme (`mono` disables colours)
    Theme {
        name: Option<String>,
        /// Forget the remembered theme
        #[arg(long, conflicts_with = "name")]
        clear: bool,
    },
}

impl ConfigCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        match self {
            ConfigCommand::Init { force, global } => {
                let path = init_target(global)?;
                if path.exists() && !force {
                    return Err(ExitError::Config(format!(
                        "{} already exists (use --force to overwrite)",
                        path.display()
                    ))
                    .into());
                }
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                let contents = Config::default().to_toml()?;
                std::fs::write(&path, contents)
                    .with_context(|| format!("writing {}", path.display()))?;
                tracing::info!(path = %path.display(), "config written");
                StderrNotifier.notify(Notice::success(format!("wrote {}", path.display())));
                Ok(())
            }
            ConfigCommand::Show { format } => {
                let cwd = std::env::current_dir().context("could not determine current directory")?;
                let (config, path) = Config::discover(&cwd)?;
                match OutputFormat::resolve(format) {
                    OutputFormat::Json => print_json(&config)?,
                    _ => {
                        match &path {
                            Some(p) => println!("# loaded from {}", p.display()),
                            None => println!("# no config file found, using defaults"),
                        }
                        let rendered =
                            toml::to_string_pretty(&config).context("serializing config")?;
                        print!("{rendered}");
                    }
                }
                Ok(())
            }
            ConfigCommand::Theme { name, clear } => {
                let deck = Deck::connect()?;
                if name.is_none() && !clear {
                    println!("{}", deck.theme().as_deref().unwrap_or("default"));
                    return Ok(());
                }
                let mut store = deck
                    .store()
                    .ok_or_else(|| ExitError::Config("no data directory; set store.path".into()))?;
                store.prefs.theme = name.filter(|n| !n.trim().is_empty());
                store.save()?;
                tracing::info!(
                    theme = ?store.prefs.theme,
                    path = %store.path().display(),
                    "theme saved"
                );
                Ok(())
            }
        }
    }
}

fn init_target(global: bool) -> anyhow::Result<PathBuf> {
    if global {
        user_config_path().ok_or_else(|| {
            ExitError::Config("no user config directory on this platform".into()).into()
        })
    } else {
        Ok(std::env::current_dir()
            .context("could not determine current directory")?
            .join(CONFIG_TOML))
    }
}
