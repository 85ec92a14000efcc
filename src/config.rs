use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::constants::constants;

/// User preferences persisted as `config.toml` in the platform config dir.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Config {
  pub theme_name: Option<String>,
  /// Directory handed to the player (working dir and screenshot target).
  pub default_directory: Option<PathBuf>,
  pub player: Option<String>,
  pub player_args: Option<Vec<String>>,
  /// Passed to mpv as `--ytdl-format`, e.g. `bestvideo[height<=720]+bestaudio`.
  /// A selected quality other than `best` takes precedence.
  pub ytdl_format: Option<String>,
  pub quality: Option<String>,
  pub provider: Option<String>,
  pub page_size: Option<usize>,
  /// Recent queries, oldest first.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub history: Vec<String>,
  /// Where this config was loaded from; `save` is a no-op without one.
  #[serde(skip)]
  pub(crate) path: Option<PathBuf>,
}

impl Config {
  pub fn path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "ytw").map(|dirs| dirs.config_dir().join("config.toml"))
  }

  pub fn load() -> Self {
    Self::path().map(|p| Self::load_from(&p)).unwrap_or_default()
  }

  /// Missing or unreadable files fall back to defaults.
  pub fn load_from(path: &Path) -> Self {
    let mut config = match std::fs::read_to_string(path) {
      Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
        warn!(path = %path.display(), err = %e, "config: invalid file, using defaults");
        Self::default()
      }),
      Err(_) => Self::default(),
    };
    config.path = Some(path.to_path_buf());
    config
  }

  pub fn save(&self) {
    let Some(ref path) = self.path else {
      debug!("config: not backed by a file, skipping save");
      return;
    };
    if let Err(e) = self.save_to(path) {
      warn!(err = %format!("{:#}", e), "config: failed to save");
    }
  }

  pub fn save_to(&self, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
      std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let content = toml::to_string(self).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
  }

  pub fn default_directory(&self) -> Option<&Path> {
    self.default_directory.as_deref()
  }

  pub fn set_default_directory(&mut self, dir: impl Into<PathBuf>) {
    self.default_directory = Some(dir.into());
  }

  /// Record a query as the most recent, dropping an earlier copy and the
  /// oldest entries past `history_capacity`.
  pub fn push_history(&mut self, query: &str) {
    let query = query.trim();
    if query.is_empty() {
      return;
    }
    self.history.retain(|q| q != query);
    self.history.push(query.to_string());
    let cap = constants().history_capacity;
    if self.history.len() > cap {
      let excess = self.history.len() - cap;
      self.history.drain(..excess);
    }
  }
}
