use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::{
  io::{AsyncBufReadExt, AsyncRead, BufReader as TokioBufReader},
  process::{Child as TokioChild, ChildStderr, ChildStdout, Command},
  sync::{mpsc, oneshot},
  task::JoinHandle,
  time::Instant,
};
use tracing::{debug, info, warn};

use crate::console::ConsoleSink;
use crate::constants::constants;
use crate::search::VideoSummary;

/// How to launch the external player. The playable reference is appended last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerCommand {
  pub program: String,
  pub args: Vec<String>,
  pub working_dir: Option<PathBuf>,
}

impl PlayerCommand {
  pub fn new(program: impl Into<String>) -> Self {
    Self { program: program.into(), args: Vec::new(), working_dir: None }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.working_dir = Some(dir.into());
    self
  }

  /// Tag used for this player's lines in the console.
  pub fn source_tag(&self) -> String {
    std::path::Path::new(&self.program)
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or(&self.program)
      .to_string()
  }

  fn build(&self, reference: &str) -> Command {
    let mut cmd = Command::new(&self.program);
    cmd.args(&self.args).arg(reference);
    if let Some(ref dir) = self.working_dir
      && dir.is_dir()
    {
      cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    // Both pipes are drained by the supervisor; an undrained pipe would block the player.
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    cmd
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
  Starting,
  Running,
  Exited(i32),
  Failed(String),
}

impl SessionState {
  pub fn is_live(&self) -> bool {
    matches!(self, SessionState::Starting | SessionState::Running)
  }

  pub fn label(&self) -> String {
    match self {
      SessionState::Starting => "starting".to_string(),
      SessionState::Running => "playing".to_string(),
      SessionState::Exited(0) => "finished".to_string(),
      SessionState::Exited(code) => format!("exited ({})", code),
      SessionState::Failed(reason) => format!("failed: {}", reason),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
  #[error("{program} not found. Install it with: brew install mpv (macOS) or apt install mpv (Linux)")]
  PlayerNotFound { program: String },
  #[error("failed to start {program}: {reason}")]
  Spawn { program: String, reason: String },
  #[error("player exited abnormally with code {code}")]
  AbnormalExit { code: i32 },
}

impl PlaybackError {
  fn spawn(program: &str, e: std::io::Error) -> Self {
    if e.kind() == std::io::ErrorKind::NotFound {
      PlaybackError::PlayerNotFound { program: program.to_string() }
    } else {
      PlaybackError::Spawn { program: program.to_string(), reason: e.to_string() }
    }
  }
}

/// Bookkeeping for one player invocation. The process itself stays private
/// to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSession {
  pub id: u64,
  pub target: VideoSummary,
  pub state: SessionState,
}

#[derive(Debug)]
enum SessionEvent {
  Running { id: u64 },
  Exited { id: u64, code: i32 },
}

struct LiveProcess {
  stop_tx: Option<oneshot::Sender<()>>,
  task: JoinHandle<i32>,
}

pub struct PlaybackManager {
  command: PlayerCommand,
  sink: ConsoleSink,
  session: Option<PlaybackSession>,
  live: Option<LiveProcess>,
  events_tx: mpsc::UnboundedSender<SessionEvent>,
  events_rx: mpsc::UnboundedReceiver<SessionEvent>,
  next_id: u64,
  grace: Duration,
  startup_timeout: Duration,
  drain_timeout: Duration,
}

impl PlaybackManager {
  pub fn new(command: PlayerCommand, sink: ConsoleSink) -> Self {
    let c = constants();
    Self::with_timeouts(command, sink, c.stop_grace(), c.startup_timeout(), c.drain_timeout())
  }

  pub fn with_timeouts(
    command: PlayerCommand,
    sink: ConsoleSink,
    grace: Duration,
    startup_timeout: Duration,
    drain_timeout: Duration,
  ) -> Self {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    Self {
      command,
      sink,
      session: None,
      live: None,
      events_tx,
      events_rx,
      next_id: 1,
      grace,
      startup_timeout,
      drain_timeout,
    }
  }

  pub fn command(&self) -> &PlayerCommand {
    &self.command
  }

  /// Applies to the next `play`; a live session keeps its original command.
  pub fn set_command(&mut self, command: PlayerCommand) {
    self.command = command;
  }

  /// The current or most recent session.
  pub fn session(&self) -> Option<&PlaybackSession> {
    self.session.as_ref()
  }

  pub fn is_playing(&self) -> bool {
    self.live.is_some()
  }

  /// Stop whatever is playing, then launch the player for `target`.
  ///
  /// Spawn failures are returned here once and recorded as a `Failed` session.
  pub async fn play(&mut self, target: VideoSummary) -> Result<PlaybackSession, PlaybackError> {
    self.stop().await;

    let id = self.next_id;
    self.next_id += 1;
    let reference = target.playable_reference();
    let program = self.command.program.clone();

    let mut child = match self.command.build(&reference).spawn() {
      Ok(child) => child,
      Err(e) => {
        let err = PlaybackError::spawn(&program, e);
        warn!(id, program = %program, err = %err, "playback: spawn failed");
        self.session = Some(PlaybackSession { id, target, state: SessionState::Failed(err.to_string()) });
        return Err(err);
      }
    };

    info!(id, program = %program, reference = %reference, pid = ?child.id(), "playback: started");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stop_tx, stop_rx) = oneshot::channel();
    let supervisor = Supervisor {
      id,
      source: self.command.source_tag(),
      sink: self.sink.clone(),
      events: self.events_tx.clone(),
      grace: self.grace,
      startup_timeout: self.startup_timeout,
      drain_timeout: self.drain_timeout,
    };
    let task = tokio::spawn(supervisor.run(child, stdout, stderr, stop_rx));

    let session = PlaybackSession { id, target, state: SessionState::Starting };
    self.session = Some(session.clone());
    self.live = Some(LiveProcess { stop_tx: Some(stop_tx), task });
    Ok(session)
  }

  /// Terminate the live session, if any, and wait until it is reaped.
  ///
  /// Sends a graceful termination request, escalating to a kill once the
  /// grace period runs out. Returns the final state of the stopped session.
  pub async fn stop(&mut self) -> Option<SessionState> {
    let mut live = self.live.take()?;
    if let Some(tx) = live.stop_tx.take() {
      let _ = tx.send(());
    }

    let budget = self.grace + self.drain_timeout + Duration::from_secs(1);
    let code = match tokio::time::timeout(budget, &mut live.task).await {
      Ok(Ok(code)) => code,
      Ok(Err(e)) => {
        warn!(err = %e, "playback: supervisor task failed");
        -1
      }
      Err(_) => {
        warn!("playback: supervisor did not finish in time, aborting");
        live.task.abort();
        let _ = live.task.await;
        -1
      }
    };

    // Events for this session are now stale; the final state is set directly.
    while self.events_rx.try_recv().is_ok() {}
    let state = SessionState::Exited(code);
    if let Some(ref mut session) = self.session {
      session.state = state.clone();
    }
    info!(code, "playback: stopped");
    Some(state)
  }

  /// Apply supervisor events. Returns the latest state transition, if any.
  pub fn poll(&mut self) -> Option<SessionState> {
    let mut changed = None;
    while let Ok(event) = self.events_rx.try_recv() {
      let Some(session) = self.session.as_mut() else { continue };
      match event {
        SessionEvent::Running { id } if id == session.id && session.state == SessionState::Starting => {
          session.state = SessionState::Running;
          changed = Some(session.state.clone());
        }
        SessionEvent::Exited { id, code } if id == session.id => {
          session.state = SessionState::Exited(code);
          changed = Some(session.state.clone());
          // The supervisor has reaped the child; release the handle.
          self.live = None;
        }
        _ => {}
      }
    }
    changed
  }

  /// Deterministic teardown for application exit.
  pub async fn shutdown(&mut self) {
    if self.live.is_some() {
      info!("playback: shutting down live session");
      self.stop().await;
    }
  }
}

/// Owns the child process for the lifetime of one session.
struct Supervisor {
  id: u64,
  source: String,
  sink: ConsoleSink,
  events: mpsc::UnboundedSender<SessionEvent>,
  grace: Duration,
  startup_timeout: Duration,
  drain_timeout: Duration,
}

impl Supervisor {
  async fn run(
    self,
    mut child: TokioChild,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    mut stop_rx: oneshot::Receiver<()>,
  ) -> i32 {
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let mut readers = Vec::new();
    if let Some(out) = stdout {
      readers.push(tokio::spawn(forward_lines(out, line_tx.clone())));
    }
    if let Some(err) = stderr {
      readers.push(tokio::spawn(forward_lines(err, line_tx.clone())));
    }
    drop(line_tx);

    let far = Instant::now() + Duration::from_secs(60 * 60 * 24 * 365);
    let startup = tokio::time::sleep(self.startup_timeout);
    let kill_deadline = tokio::time::sleep_until(far);
    let drain_deadline = tokio::time::sleep_until(far);
    tokio::pin!(startup, kill_deadline, drain_deadline);

    let mut running = false;
    let mut stop_requested = false;
    let mut kill_armed = false;
    let mut drained = false;
    let mut exit: Option<i32> = None;

    loop {
      if exit.is_some() && drained {
        break;
      }
      tokio::select! {
        status = child.wait(), if exit.is_none() => {
          let code = match status {
            Ok(status) => exit_code(status),
            Err(e) => {
              warn!(id = self.id, err = %e, "playback: failed to wait on player");
              -1
            }
          };
          exit = Some(code);
          drain_deadline.as_mut().reset(Instant::now() + self.drain_timeout);
        }
        line = line_rx.recv(), if !drained => match line {
          Some(line) => {
            if !running {
              running = true;
              let _ = self.events.send(SessionEvent::Running { id: self.id });
            }
            self.sink.info(&self.source, line);
          }
          None => drained = true,
        },
        () = &mut startup, if !running => {
          debug!(id = self.id, "playback: no output before startup timeout");
          running = true;
          let _ = self.events.send(SessionEvent::Running { id: self.id });
        }
        // Also fires when the manager is dropped without calling stop.
        _ = &mut stop_rx, if !stop_requested => {
          stop_requested = true;
          debug!(id = self.id, "playback: termination requested");
          request_terminate(&mut child);
          kill_armed = true;
          kill_deadline.as_mut().reset(Instant::now() + self.grace);
        }
        () = &mut kill_deadline, if kill_armed && exit.is_none() => {
          kill_armed = false;
          warn!(id = self.id, "playback: player ignored termination, killing");
          if let Err(e) = child.start_kill() {
            warn!(id = self.id, err = %e, "playback: kill failed");
          }
        }
        () = &mut drain_deadline, if exit.is_some() && !drained => {
          debug!(id = self.id, "playback: output still open after exit, abandoning readers");
          break;
        }
      }
    }

    for reader in readers {
      reader.abort();
    }

    let code = exit.unwrap_or(-1);
    if code != 0 && !stop_requested {
      let err = PlaybackError::AbnormalExit { code };
      self.sink.warn(&self.source, err.to_string());
    } else {
      info!(id = self.id, code, stop_requested, "playback: player exited");
    }
    let _ = self.events.send(SessionEvent::Exited { id: self.id, code });
    code
  }
}

/// Forward UTF-8 (lossy) lines from `reader` until EOF.
async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<String>) {
  let mut chunks = TokioBufReader::new(reader).split(b'\n');
  loop {
    match chunks.next_segment().await {
      Ok(Some(bytes)) => {
        let line = String::from_utf8_lossy(&bytes).trim_end_matches('\r').to_string();
        if tx.send(line).is_err() {
          break;
        }
      }
      Ok(None) => break,
      Err(e) => {
        debug!(err = %e, "playback: output read failed");
        break;
      }
    }
  }
}

#[cfg(unix)]
fn request_terminate(child: &mut TokioChild) {
  if let Some(pid) = child.id() {
    // Safety: `pid` belongs to a child we have not reaped yet, so it cannot
    // have been recycled for an unrelated process.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
      debug!(pid, err = %std::io::Error::last_os_error(), "playback: SIGTERM failed");
    }
  }
}

#[cfg(not(unix))]
fn request_terminate(child: &mut TokioChild) {
  let _ = child.start_kill();
}

/// Exit code, or `128 + signal` for a signal-terminated process.
fn exit_code(status: ExitStatus) -> i32 {
  if let Some(code) = status.code() {
    return code;
  }
  #[cfg(unix)]
  {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
      return 128 + signal;
    }
  }
  -1
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::console::{Console, Level};

  fn target(id: &str) -> VideoSummary {
    VideoSummary {
      id: id.to_string(),
      title: format!("video {}", id),
      author: None,
      duration_seconds: 10,
      thumbnail: String::new(),
    }
  }

  fn manager(console: &Console, script: &str) -> PlaybackManager {
    PlaybackManager::with_timeouts(
      PlayerCommand::new("sh").arg("-c").arg(script),
      console.sink(),
      Duration::from_millis(300),
      Duration::from_millis(200),
      Duration::from_millis(300),
    )
  }

  async fn wait_for(manager: &mut PlaybackManager, pred: impl Fn(&SessionState) -> bool) -> SessionState {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
      manager.poll();
      if let Some(state) = manager.session().map(|s| s.state.clone())
        && pred(&state)
      {
        return state;
      }
      assert!(Instant::now() < deadline, "session never reached expected state");
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  }

  #[test]
  fn source_tag_is_program_file_name() {
    assert_eq!(PlayerCommand::new("/usr/bin/mpv").source_tag(), "mpv");
    assert_eq!(PlayerCommand::new("mpv").source_tag(), "mpv");
  }

  #[test]
  fn state_labels() {
    assert_eq!(SessionState::Exited(0).label(), "finished");
    assert_eq!(SessionState::Exited(2).label(), "exited (2)");
    assert!(SessionState::Starting.is_live());
    assert!(!SessionState::Exited(0).is_live());
  }

  #[cfg(unix)]
  #[test]
  fn exit_code_maps_signals() {
    use std::os::unix::process::ExitStatusExt;
    assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
    assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
    assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
  }

  #[tokio::test]
  async fn missing_player_fails_to_spawn() {
    let console = Console::new(16);
    let mut manager = PlaybackManager::new(PlayerCommand::new("/nonexistent/ytw-test-player"), console.sink());
    let err = manager.play(target("a")).await.unwrap_err();
    assert_eq!(err, PlaybackError::PlayerNotFound { program: "/nonexistent/ytw-test-player".to_string() });
    assert!(matches!(manager.session().unwrap().state, SessionState::Failed(_)));
    assert!(!manager.is_playing());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn clean_exit_forwards_every_line_in_order() {
    let mut console = Console::new(64);
    let mut manager = manager(&console, "for i in 1 2 3 4 5; do echo line$i; done; exit 0");
    let session = manager.play(target("a")).await.unwrap();
    assert_eq!(session.state, SessionState::Starting);

    let state = wait_for(&mut manager, |s| matches!(s, SessionState::Exited(_))).await;
    assert_eq!(state, SessionState::Exited(0));
    assert!(!manager.is_playing());

    console.drain();
    let lines: Vec<_> = console.lines().map(|l| l.line.clone()).collect();
    assert_eq!(lines, vec!["line1", "line2", "line3", "line4", "line5"]);
    assert!(console.lines().all(|l| l.level == Level::Info && l.source == "sh"));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn abnormal_exit_warns_once() {
    let mut console = Console::new(64);
    let mut manager = manager(&console, "echo failing >&2; exit 1");
    manager.play(target("a")).await.unwrap();

    let state = wait_for(&mut manager, |s| matches!(s, SessionState::Exited(_))).await;
    assert_eq!(state, SessionState::Exited(1));

    console.drain();
    let warnings: Vec<_> = console.lines().filter(|l| l.level == Level::Warn).collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].line, PlaybackError::AbnormalExit { code: 1 }.to_string());
    assert_eq!(console.lines().next().unwrap().line, "failing");

    // Still usable afterwards.
    manager.set_command(PlayerCommand::new("sh").arg("-c").arg("exit 0"));
    manager.play(target("b")).await.unwrap();
    assert_eq!(wait_for(&mut manager, |s| matches!(s, SessionState::Exited(_))).await, SessionState::Exited(0));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn silent_player_becomes_running_after_startup_timeout() {
    let console = Console::new(8);
    let mut manager = manager(&console, "sleep 5");
    manager.play(target("a")).await.unwrap();
    let state = wait_for(&mut manager, |s| *s != SessionState::Starting).await;
    assert_eq!(state, SessionState::Running);
    manager.stop().await;
    assert!(!manager.is_playing());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn play_replaces_live_session_after_reaping_it() {
    let mut console = Console::new(64);
    let mut manager = manager(
      &console,
      "trap 'echo terminated; exit 0' TERM; echo ready; while :; do sleep 0.05; done",
    );
    let first = manager.play(target("a")).await.unwrap();
    wait_for(&mut manager, |s| *s == SessionState::Running).await;

    manager.set_command(PlayerCommand::new("sh").arg("-c").arg("sleep 5"));
    let second = manager.play(target("b")).await.unwrap();

    // The first player saw the termination request before the second started.
    console.drain();
    let lines: Vec<_> = console.lines().map(|l| l.line.clone()).collect();
    assert_eq!(lines, vec!["ready", "terminated"]);

    let current = manager.session().unwrap();
    assert_eq!(current.id, second.id);
    assert_ne!(current.id, first.id);
    assert_eq!(current.target, target("b"));
    assert!(manager.is_playing());

    manager.shutdown().await;
    assert!(!manager.is_playing());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn stop_escalates_to_kill_when_termination_is_ignored() {
    let console = Console::new(8);
    let mut manager = manager(&console, "trap '' TERM; echo ready; while :; do sleep 0.05; done");
    manager.play(target("a")).await.unwrap();
    wait_for(&mut manager, |s| *s == SessionState::Running).await;

    let started = Instant::now();
    let state = manager.stop().await.unwrap();
    assert_eq!(state, SessionState::Exited(128 + libc::SIGKILL));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!manager.is_playing());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn requested_stop_is_not_reported_as_abnormal() {
    let mut console = Console::new(8);
    let mut manager = manager(&console, "sleep 5");
    manager.play(target("a")).await.unwrap();
    let state = manager.stop().await.unwrap();
    assert_eq!(state, SessionState::Exited(128 + libc::SIGTERM));
    console.drain();
    assert!(console.lines().all(|l| l.level != Level::Warn));
  }
}
