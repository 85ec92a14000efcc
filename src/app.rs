use ratatui::widgets::ListState;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::Config;
use crate::console::{Console, ConsoleSink};
use crate::constants::constants;
use crate::pagination::{PageError, PageEvent, Pagination};
use crate::playback::{PlaybackManager, PlayerCommand, SessionState};
use crate::quality::Quality;
use crate::search::{SearchCoordinator, SearchProvider, VideoSummary};
use crate::theme::THEMES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
  Input,
  Results,
}

/// Player work queued by a key press and run after the next draw, so the
/// busy message is on screen while a previous player is being reaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
  Watch(VideoSummary),
  Stop,
}

/// Assemble the player invocation from config, with an optional CLI override
/// for the binary. Default arguments and format selection only apply to mpv.
pub fn player_command(config: &Config, player_override: Option<&str>, quality: Quality) -> PlayerCommand {
  let c = constants();
  let program = player_override.or(config.player.as_deref()).unwrap_or(&c.player);
  let is_mpv = PlayerCommand::new(program).source_tag() == "mpv";

  let args = match config.player_args {
    Some(ref args) => args.clone(),
    None if is_mpv => c.player_args.clone(),
    None => Vec::new(),
  };
  let mut command = PlayerCommand::new(program).args(args);
  let format = quality.ytdl_format().or(config.ytdl_format.as_deref());
  if is_mpv && let Some(format) = format {
    command = command.arg(format!("--ytdl-format={}", format));
  }
  if let Some(dir) = config.default_directory() {
    if is_mpv {
      command = command.arg(format!("--screenshot-directory={}", dir.display()));
    }
    command = command.working_dir(dir);
  }
  command
}

pub struct App {
  pub input: String,
  pub cursor_position: usize,
  pub input_scroll: usize,
  pub mode: AppMode,
  pub theme_index: usize,
  pub quality: Quality,
  pub list_state: ListState,
  pub pagination: Pagination,
  pub playback: PlaybackManager,
  pub console: Console,
  pub config: Config,
  pub last_error: Option<String>,
  pub status_message: Option<String>,
  /// Informational message, shown with lower priority than status/error.
  pub info_message: Option<String>,
  /// Shown while a pending player action runs.
  pub busy_message: Option<String>,
  pub should_quit: bool,
  pending_action: Option<PendingAction>,
  /// Index into `config.history` while recalling, plus the text typed before.
  history_cursor: Option<usize>,
  history_draft: String,
  sink: ConsoleSink,
  player_override: Option<String>,
  /// When the last error was set, for auto-dismiss.
  error_time: Option<Instant>,
}

impl App {
  pub fn new(config: Config, provider: Arc<dyn SearchProvider>, player_override: Option<String>) -> Self {
    let theme_index = if let Some(ref name) = config.theme_name {
      THEMES.iter().position(|t| t.name == name.as_str()).unwrap_or(0)
    } else {
      0
    };
    let quality = config.quality.as_deref().and_then(Quality::from_label).unwrap_or_default();
    let console = Console::new(constants().console_capacity);
    let sink = console.sink();
    let playback = PlaybackManager::new(player_command(&config, player_override.as_deref(), quality), console.sink());
    let pagination = Pagination::new(SearchCoordinator::new(provider));
    info!(
      provider = pagination.provider_name(),
      player = %playback.command().program,
      quality = quality.label(),
      "app: ready"
    );

    Self {
      input: String::new(),
      cursor_position: 0,
      input_scroll: 0,
      mode: AppMode::Input,
      theme_index,
      quality,
      list_state: ListState::default(),
      pagination,
      playback,
      console,
      config,
      last_error: None,
      status_message: None,
      info_message: None,
      busy_message: None,
      should_quit: false,
      pending_action: None,
      history_cursor: None,
      history_draft: String::new(),
      sink,
      player_override,
      error_time: None,
    }
  }

  pub fn theme(&self) -> &'static crate::theme::Theme {
    // theme_index is kept in range by next_theme() and new().
    &THEMES[self.theme_index]
  }

  pub fn next_theme(&mut self) {
    self.theme_index = (self.theme_index + 1) % THEMES.len();
    self.config.theme_name = Some(self.theme().name.to_string());
    self.config.save();
  }

  fn refresh_player_command(&mut self) {
    self.playback.set_command(player_command(&self.config, self.player_override.as_deref(), self.quality));
  }

  /// Step to the next quality. Applies from the next video on.
  pub fn cycle_quality(&mut self) {
    self.quality = self.quality.next();
    self.config.quality = Some(self.quality.label().to_string());
    self.config.save();
    self.refresh_player_command();
    self.sink.info("app", format!("Switching quality to {}", self.quality.label()));
    self.info_message = Some(format!("Quality: {} (applies to the next video)", self.quality.label()));
  }

  /// Set an error message with auto-dismiss tracking.
  pub fn set_error(&mut self, msg: String) {
    self.last_error = Some(msg);
    self.error_time = Some(Instant::now());
  }

  pub fn clear_error(&mut self) {
    self.last_error = None;
    self.error_time = None;
  }

  /// Clear stale error messages.
  pub fn expire_error(&mut self) {
    if let Some(t) = self.error_time
      && t.elapsed() >= Duration::from_secs(constants().error_display_secs)
    {
      self.last_error = None;
      self.error_time = None;
    }
  }

  pub fn results(&self) -> &[VideoSummary] {
    self.pagination.last_result().map_or(&[], |r| r.items.as_slice())
  }

  pub fn selected(&self) -> Option<&VideoSummary> {
    self.list_state.selected().and_then(|i| self.results().get(i))
  }

  // --- Input history ---

  fn set_input(&mut self, text: String) {
    self.cursor_position = text.chars().count();
    self.input = text;
    self.input_scroll = 0;
  }

  /// Replace the input with the previous query in history. Returns false
  /// when there is no history.
  pub fn recall_older(&mut self) -> bool {
    let len = self.config.history.len();
    if len == 0 {
      return false;
    }
    let idx = match self.history_cursor {
      None => {
        self.history_draft = self.input.clone();
        len - 1
      }
      Some(i) => i.saturating_sub(1),
    };
    self.history_cursor = Some(idx);
    let text = self.config.history[idx].clone();
    self.set_input(text);
    true
  }

  /// Step back toward the text typed before recalling. Returns false when
  /// not recalling.
  pub fn recall_newer(&mut self) -> bool {
    let Some(i) = self.history_cursor else { return false };
    if i + 1 < self.config.history.len() {
      self.history_cursor = Some(i + 1);
      let text = self.config.history[i + 1].clone();
      self.set_input(text);
    } else {
      self.history_cursor = None;
      let draft = std::mem::take(&mut self.history_draft);
      self.set_input(draft);
    }
    true
  }

  /// Editing the recalled text makes it a fresh draft.
  pub fn stop_recalling(&mut self) {
    self.history_cursor = None;
  }

  /// Drain every background channel. Called once per loop turn.
  pub fn check_pending(&mut self) {
    if let Some(event) = self.pagination.poll() {
      self.status_message = None;
      match event {
        PageEvent::Loaded { query, count } => {
          self.sink.info("search", format!("Search finished: {} results for '{}' (page {})", count, query.text, query.page));
          if count == 0 {
            self.list_state.select(None);
            self.set_error("No results found.".to_string());
          } else {
            self.list_state.select(Some(0));
            self.mode = AppMode::Results;
          }
        }
        PageEvent::Failed { query, error } => {
          if error.is_user_visible() {
            self.sink.warn("search", format!("Search for '{}' (page {}) failed: {}", query.text, query.page, error));
            self.set_error(format!("Search failed: {}", error));
          }
        }
      }
    }

    if let Some(state) = self.playback.poll() {
      debug!(state = ?state, "app: playback state changed");
      if let SessionState::Exited(_) = state {
        self.info_message = Some(format!("Playback {}", state.label()));
      }
    }

    self.console.drain();
    self.expire_error();
  }

  fn report_page_error(&mut self, err: PageError) {
    debug!(err = %err, "app: navigation rejected");
    let mut msg = err.to_string();
    if let Some(first) = msg.get_mut(0..1) {
      first.make_ascii_uppercase();
    }
    self.set_error(format!("{}.", msg));
  }

  pub fn trigger_search(&mut self) {
    let query = self.input.trim().to_string();
    match self.pagination.search(&query) {
      Ok(()) => {
        info!(query = %query, "search triggered");
        self.clear_error();
        self.info_message = None;
        self.list_state.select(None);
        self.status_message = Some(format!("Searching '{}'…", query));
        self.sink.info("search", format!("Starting search for: {}", query));
        self.history_cursor = None;
        self.config.push_history(&query);
        self.config.save();
      }
      Err(e) => self.report_page_error(e),
    }
  }

  pub fn next_page(&mut self) {
    match self.pagination.next_page() {
      Ok(()) => self.status_message = Some(format!("Loading page {}…", self.pagination.page())),
      Err(e) => self.report_page_error(e),
    }
  }

  pub fn prev_page(&mut self) {
    match self.pagination.prev_page() {
      Ok(()) => self.status_message = Some(format!("Loading page {}…", self.pagination.page())),
      Err(e) => self.report_page_error(e),
    }
  }

  pub fn cancel_search(&mut self) {
    if self.pagination.in_flight() {
      self.pagination.cancel();
      self.status_message = None;
      self.info_message = Some("Search cancelled.".to_string());
    }
  }

  // --- Playback ---

  /// Queue playback of the selected result, replacing whatever is playing.
  pub fn request_watch(&mut self) {
    let Some(target) = self.selected().cloned() else { return };
    let msg = if self.playback.is_playing() { "Stopping current player…" } else { "Starting player…" };
    self.busy_message = Some(msg.to_string());
    self.pending_action = Some(PendingAction::Watch(target));
  }

  pub fn request_stop(&mut self) {
    if self.playback.is_playing() {
      self.busy_message = Some("Stopping player…".to_string());
      self.pending_action = Some(PendingAction::Stop);
    }
  }

  /// Run the queued player action, if any. Called after drawing.
  pub async fn run_pending_action(&mut self) {
    let Some(action) = self.pending_action.take() else { return };
    match action {
      PendingAction::Watch(target) => self.watch(target).await,
      PendingAction::Stop => self.stop_playback().await,
    }
    self.busy_message = None;
  }

  async fn watch(&mut self, target: VideoSummary) {
    self.clear_error();
    self.sink.info(
      "app",
      format!("Playing video: {} ({})", target.playable_reference(), self.quality.label()),
    );
    match self.playback.play(target).await {
      Ok(session) => {
        self.info_message = Some(format!("Playing: {}", session.target.title));
      }
      Err(e) => {
        self.set_error(format!("Playback error: {}", e));
      }
    }
  }

  async fn stop_playback(&mut self) {
    if let Some(state) = self.playback.stop().await {
      self.info_message = Some(format!("Playback {}", state.label()));
    }
  }

  /// Use the input box contents as the player's default directory.
  pub fn set_default_directory_from_input(&mut self) {
    let raw = self.input.trim();
    if raw.is_empty() {
      self.set_error("Type a directory in the input box first.".to_string());
      return;
    }
    let dir = Path::new(raw);
    if !dir.is_dir() {
      self.set_error(format!("Not a directory: {}", raw));
      return;
    }
    let dir = dir.to_path_buf();
    info!(dir = %dir.display(), "app: default directory changed");
    self.config.set_default_directory(dir.clone());
    self.config.save();
    self.refresh_player_command();
    self.info_message = Some(format!("Default directory: {}", dir.display()));
  }

  /// Deterministic teardown: drop any pending search, reap the player.
  pub async fn shutdown(&mut self) {
    self.pending_action = None;
    self.pagination.cancel();
    self.playback.shutdown().await;
    self.console.drain();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::console::Level;
  use crate::search::testing::{StubProvider, eventually};
  use std::path::PathBuf;

  fn app_with(config: Config, provider: Arc<StubProvider>) -> App {
    App::new(config, provider, None)
  }

  async fn settle_search(app: &mut App) {
    eventually(|| {
      app.check_pending();
      (!app.pagination.in_flight()).then_some(())
    })
    .await;
  }

  async fn watch_selected(app: &mut App) {
    app.request_watch();
    assert!(app.busy_message.is_some());
    app.run_pending_action().await;
    assert!(app.busy_message.is_none());
  }

  // --- player_command ---

  #[test]
  fn mpv_gets_default_args_and_directory() {
    let config = Config {
      default_directory: Some(PathBuf::from("/tmp/shots")),
      ytdl_format: Some("best[height<=720]".into()),
      ..Config::default()
    };
    let cmd = player_command(&config, Some("mpv"), Quality::Best);
    assert_eq!(cmd.program, "mpv");
    assert!(cmd.args.starts_with(&constants().player_args));
    assert!(cmd.args.contains(&"--ytdl-format=best[height<=720]".to_string()));
    assert!(cmd.args.contains(&"--screenshot-directory=/tmp/shots".to_string()));
    assert_eq!(cmd.working_dir, Some(PathBuf::from("/tmp/shots")));
  }

  #[test]
  fn selected_quality_overrides_configured_format() {
    let config = Config { ytdl_format: Some("worst".into()), ..Config::default() };
    let cmd = player_command(&config, Some("mpv"), Quality::P720);
    let formats: Vec<_> = cmd.args.iter().filter(|a| a.starts_with("--ytdl-format=")).collect();
    assert_eq!(formats.len(), 1);
    assert!(formats[0].contains("height<=720"));

    let cmd = player_command(&Config::default(), Some("mpv"), Quality::Best);
    assert!(!cmd.args.iter().any(|a| a.starts_with("--ytdl-format=")));
  }

  #[test]
  fn other_players_only_get_configured_args() {
    let config = Config { player: Some("vlc".into()), ytdl_format: Some("best".into()), ..Config::default() };
    let cmd = player_command(&config, None, Quality::P480);
    assert_eq!(cmd.program, "vlc");
    assert!(cmd.args.is_empty());

    let config = Config { player_args: Some(vec!["--fullscreen".into()]), ..config };
    assert_eq!(player_command(&config, None, Quality::Best).args, vec!["--fullscreen".to_string()]);
  }

  #[test]
  fn cli_override_wins_over_config() {
    let config = Config { player: Some("vlc".into()), ..Config::default() };
    assert_eq!(player_command(&config, Some("/opt/mpv/bin/mpv"), Quality::Best).program, "/opt/mpv/bin/mpv");
  }

  // --- App ---

  #[test]
  fn quality_comes_from_config_and_cycles() {
    let config = Config { quality: Some("480p".into()), ..Config::default() };
    let mut app = app_with(config, Arc::new(StubProvider::new(1, 1)));
    assert_eq!(app.quality, Quality::P480);

    app.cycle_quality();
    assert_eq!(app.quality, Quality::P360);
    assert_eq!(app.config.quality.as_deref(), Some("360p"));
    assert!(app.playback.command().args.iter().any(|a| a.contains("height<=360")));

    app.cycle_quality();
    assert_eq!(app.quality, Quality::Best);
    assert!(!app.playback.command().args.iter().any(|a| a.starts_with("--ytdl-format=")));
  }

  #[tokio::test]
  async fn blank_search_reports_error() {
    let mut app = app_with(Config::default(), Arc::new(StubProvider::new(2, 2)));
    app.input = "   ".into();
    app.trigger_search();
    assert_eq!(app.last_error.as_deref(), Some("Enter a search term."));
    assert!(!app.pagination.in_flight());
    assert!(app.config.history.is_empty());
  }

  #[tokio::test]
  async fn search_and_page_through_results() {
    let mut app = app_with(Config::default(), Arc::new(StubProvider::new(2, 3)));
    app.input = "lofi".into();
    app.trigger_search();
    assert!(app.status_message.is_some());
    settle_search(&mut app).await;

    assert_eq!(app.mode, AppMode::Results);
    assert_eq!(app.results().len(), 3);
    assert_eq!(app.selected().map(|v| v.id.as_str()), Some("lofi-p1-0"));

    app.next_page();
    settle_search(&mut app).await;
    assert_eq!(app.pagination.page(), 2);
    assert_eq!(app.selected().map(|v| v.id.as_str()), Some("lofi-p2-0"));

    app.next_page();
    assert_eq!(app.last_error.as_deref(), Some("No more results."));
    assert!(app.console.lines().any(|l| l.line == "Starting search for: lofi"));
  }

  #[tokio::test]
  async fn searches_are_recalled_newest_first() {
    let mut app = app_with(Config::default(), Arc::new(StubProvider::new(1, 1)));
    for query in ["lofi", "jazz"] {
      app.input = query.into();
      app.trigger_search();
      settle_search(&mut app).await;
    }
    assert_eq!(app.config.history, vec!["lofi".to_string(), "jazz".to_string()]);

    app.input = "dra".into();
    assert!(app.recall_older());
    assert_eq!(app.input, "jazz");
    assert_eq!(app.cursor_position, 4);
    assert!(app.recall_older());
    assert_eq!(app.input, "lofi");
    assert!(app.recall_older());
    assert_eq!(app.input, "lofi");

    assert!(app.recall_newer());
    assert_eq!(app.input, "jazz");
    assert!(app.recall_newer());
    assert_eq!(app.input, "dra");
    assert!(!app.recall_newer());
  }

  #[test]
  fn recall_without_history_does_nothing() {
    let mut app = app_with(Config::default(), Arc::new(StubProvider::new(1, 1)));
    app.input = "typed".into();
    assert!(!app.recall_older());
    assert!(!app.recall_newer());
    assert_eq!(app.input, "typed");
  }

  #[tokio::test]
  async fn busy_navigation_is_reported_not_queued() {
    let provider = Arc::new(StubProvider::gated(3, 1));
    let mut app = app_with(Config::default(), provider.clone());
    app.input = "lofi".into();
    app.trigger_search();
    app.trigger_search();
    assert_eq!(app.last_error.as_deref(), Some("A search is already in progress."));

    app.cancel_search();
    assert!(!app.pagination.in_flight());
    assert_eq!(app.info_message.as_deref(), Some("Search cancelled."));
    provider.release(1);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn app_stays_usable_after_player_fails() {
    let config = Config {
      player: Some("sh".into()),
      player_args: Some(vec!["-c".into(), "echo boom >&2; exit 1".into()]),
      ..Config::default()
    };
    let mut app = app_with(config, Arc::new(StubProvider::new(1, 2)));
    app.input = "lofi".into();
    app.trigger_search();
    settle_search(&mut app).await;

    watch_selected(&mut app).await;
    assert!(app.last_error.is_none());
    eventually(|| {
      app.check_pending();
      matches!(app.playback.session().map(|s| &s.state), Some(SessionState::Exited(1))).then_some(())
    })
    .await;

    assert_eq!(app.console.lines().filter(|l| l.level == Level::Warn).count(), 1);
    assert!(app.console.lines().any(|l| l.line == "boom"));
    assert_eq!(app.info_message.as_deref(), Some("Playback exited (1)"));

    app.input = "jazz".into();
    app.trigger_search();
    settle_search(&mut app).await;
    assert_eq!(app.selected().map(|v| v.id.as_str()), Some("jazz-p1-0"));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn stop_is_queued_behind_a_busy_message() {
    let config = Config {
      player: Some("sh".into()),
      player_args: Some(vec!["-c".into(), "sleep 5".into()]),
      ..Config::default()
    };
    let mut app = app_with(config, Arc::new(StubProvider::new(1, 1)));
    app.input = "lofi".into();
    app.trigger_search();
    settle_search(&mut app).await;
    watch_selected(&mut app).await;
    assert!(app.playback.is_playing());

    app.request_stop();
    assert_eq!(app.busy_message.as_deref(), Some("Stopping player…"));
    assert_eq!(app.pending_action, Some(PendingAction::Stop));
    assert!(app.playback.is_playing());

    app.run_pending_action().await;
    assert!(!app.playback.is_playing());
    assert!(app.busy_message.is_none());
    assert_eq!(app.info_message.as_deref(), Some("Playback exited (143)"));
  }

  #[tokio::test]
  async fn missing_player_is_reported_once() {
    let config = Config { player: Some("/nonexistent/ytw-player".into()), ..Config::default() };
    let mut app = app_with(config, Arc::new(StubProvider::new(1, 1)));
    app.input = "lofi".into();
    app.trigger_search();
    settle_search(&mut app).await;

    watch_selected(&mut app).await;
    assert!(app.last_error.as_deref().is_some_and(|e| e.starts_with("Playback error:")));
    assert!(!app.playback.is_playing());
  }

  #[test]
  fn default_directory_must_exist() {
    let mut app = app_with(Config::default(), Arc::new(StubProvider::new(1, 1)));
    app.input = "/definitely/not/a/dir".into();
    app.set_default_directory_from_input();
    assert_eq!(app.last_error.as_deref(), Some("Not a directory: /definitely/not/a/dir"));
    assert!(app.config.default_directory.is_none());
  }
}
