//! Application constants loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!` so it's always available,
//! no runtime file I/O. Parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

/// All tuneable application constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // Search
  pub page_size: usize,
  pub user_agent: String,
  pub web_client_version: String,

  // Playback
  pub player: String,
  pub player_args: Vec<String>,
  pub stop_grace_ms: u64,
  pub startup_timeout_ms: u64,
  pub drain_timeout_ms: u64,

  // Console
  pub console_capacity: usize,
  pub error_display_secs: u64,

  // Config
  pub history_capacity: usize,
}

impl Constants {
  pub fn stop_grace(&self) -> Duration {
    Duration::from_millis(self.stop_grace_ms)
  }

  pub fn startup_timeout(&self) -> Duration {
    Duration::from_millis(self.startup_timeout_ms)
  }

  pub fn drain_timeout(&self) -> Duration {
    Duration::from_millis(self.drain_timeout_ms)
  }
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Safety: the RON file is embedded at compile time; if it's malformed this is a build-time error.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed application constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}
